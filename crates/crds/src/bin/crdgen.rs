//! Prints the HostIPAM CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/hostipam.yaml`

use crds::HostIPAM;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = HostIPAM::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
