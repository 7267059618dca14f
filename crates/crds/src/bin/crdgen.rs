//! Prints every CustomResourceDefinition owned or consumed by the controller
//! as a multi-document YAML stream.
//!
//! ```sh
//! crdgen > config/crds.yaml
//! ```

use crds::gateway_api::{Gateway, GatewayClass, ReferenceGrant, TCPRoute};
use crds::{backend, defaults, global, tcp, Frontend};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        global::v1::Global::crd(),
        global::v3::Global::crd(),
        defaults::v1::Defaults::crd(),
        defaults::v3::Defaults::crd(),
        backend::v1::Backend::crd(),
        backend::v3::Backend::crd(),
        tcp::v1::TCP::crd(),
        tcp::v3::TCP::crd(),
        Frontend::crd(),
        GatewayClass::crd(),
        Gateway::crd(),
        TCPRoute::crd(),
        ReferenceGrant::crd(),
    ];

    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
