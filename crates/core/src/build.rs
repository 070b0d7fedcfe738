//! Descriptor builder: normalized configuration → static resource descriptors.
//!
//! Pure data transformation; never talks to the provisioning engine. The
//! caller submits the returned descriptors and wires the endpoint's selector
//! to the workload's realized labels through the deferred graph.

use crate::config::Config;
use crate::{
    AllocationMode, ContainerPortSpec, ContainerSpec, EndpointDescriptor, LabelSet, PlacementSpec,
    PortMapping, WorkloadDescriptor,
};

/// Build the workload descriptor and the endpoint descriptor template for a
/// component. The label set is produced exactly once here and stamped onto
/// the workload; the endpoint template deliberately has no selector to set.
pub fn build(name: &str, cfg: &Config) -> (WorkloadDescriptor, EndpointDescriptor) {
    let labels = LabelSet::for_component(name);

    let container = ContainerSpec {
        name: name.to_string(),
        image: cfg.image.clone(),
        resources: cfg.resources.clone(),
        env: cfg.env.clone(),
        ports: cfg
            .ports
            .iter()
            .map(|p| ContainerPortSpec {
                container_port: p.container_port,
            })
            .collect(),
    };

    let workload = WorkloadDescriptor {
        name: name.to_string(),
        namespace: cfg.namespace.clone(),
        replicas: cfg.replicas,
        labels,
        container,
        placement: PlacementSpec {
            node_selector: cfg.node_selector.clone(),
        },
    };

    let endpoint = EndpointDescriptor {
        name: name.to_string(),
        namespace: cfg.namespace.clone(),
        ports: cfg
            .ports
            .iter()
            .filter(|p| p.exposed)
            .map(|p| PortMapping {
                port: p.host_port,
                target_port: p.container_port,
            })
            .collect(),
        allocation: if cfg.allocate_address {
            AllocationMode::ExternallyRoutable
        } else {
            AllocationMode::ClusterLocal
        },
    };

    (workload, endpoint)
}
