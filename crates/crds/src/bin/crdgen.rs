//! Prints the CSISnapshotController CRD manifest as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crds/csisnapshotcontroller.yaml`

use crds::CSISnapshotController;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crd = CSISnapshotController::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
