//! Rendering of tether descriptors into orchestrator resource manifests.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use tether_core::{AllocationMode, EndpointDescriptor, LabelSet, WorkloadDescriptor};

fn label_map(labels: &LabelSet) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn quantity_map(q: &tether_core::ResourceQuantities) -> BTreeMap<String, Quantity> {
    let mut out = BTreeMap::new();
    if let Some(cpu) = &q.cpu {
        out.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &q.memory {
        out.insert("memory".to_string(), Quantity(memory.clone()));
    }
    out
}

fn resources(r: &tether_core::ResourceRequirements) -> ResourceRequirements {
    ResourceRequirements {
        requests: r.requests.as_ref().map(quantity_map),
        limits: r.limits.as_ref().map(quantity_map),
        ..Default::default()
    }
}

/// Workload descriptor → `apps/v1` Deployment. Selector and pod template
/// labels come from the same LabelSet, so they are identical by construction.
pub fn workload_manifest(desc: &WorkloadDescriptor) -> Deployment {
    let labels = label_map(&desc.labels);

    let container = Container {
        name: desc.container.name.clone(),
        image: Some(desc.container.image.clone()),
        resources: Some(resources(&desc.container.resources)),
        env: Some(
            desc.container
                .env
                .iter()
                .map(|e| EnvVar {
                    name: e.name.clone(),
                    value: Some(e.value.clone()),
                    ..Default::default()
                })
                .collect(),
        ),
        ports: Some(
            desc.container
                .ports
                .iter()
                .map(|p| ContainerPort {
                    container_port: p.container_port,
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(desc.name.clone()),
            namespace: Some(desc.namespace.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(desc.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: (!desc.placement.node_selector.is_empty())
                        .then(|| desc.placement.node_selector.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Endpoint descriptor + resolved selector → `v1` Service. The selector is
/// always the workload's realized label set; this function has no way to
/// accept an independently authored one.
pub fn endpoint_manifest(desc: &EndpointDescriptor, selector: &LabelSet) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(desc.name.clone()),
            namespace: Some(desc.namespace.clone()),
            labels: Some(label_map(selector)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(
                desc.ports
                    .iter()
                    .map(|p| ServicePort {
                        port: p.port,
                        target_port: Some(IntOrString::Int(p.target_port)),
                        ..Default::default()
                    })
                    .collect(),
            ),
            selector: Some(label_map(selector)),
            type_: match desc.allocation {
                AllocationMode::ExternallyRoutable => Some("LoadBalancer".to_string()),
                AllocationMode::ClusterLocal => None,
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::build::build;
    use tether_core::config::{normalize, RawConfig, RawPort};
    use tether_core::EnvVar as TetherEnvVar;

    fn descriptors(allocate: bool) -> (WorkloadDescriptor, EndpointDescriptor) {
        let cfg = normalize(RawConfig {
            namespace: Some("default".into()),
            image: Some("gcr.io/guestbook/frontend:v5".into()),
            replicas: Some(2),
            ports: vec![RawPort {
                container_port: 8080,
                host_port: Some(80),
                exposed: true,
            }],
            env: vec![TetherEnvVar {
                name: "MODE".into(),
                value: "frontend".into(),
            }],
            node_selector: [("disktype".to_string(), "ssd".to_string())].into(),
            allocate_address: allocate,
            ..RawConfig::default()
        })
        .unwrap();
        build("frontend", &cfg)
    }

    #[test]
    fn deployment_selector_equals_template_labels() {
        let (workload, _) = descriptors(false);
        let dep = workload_manifest(&workload);
        let spec = dep.spec.unwrap();
        let selector = spec.selector.match_labels.unwrap();
        let template = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(selector, template);
        assert_eq!(selector.get("app").map(String::as_str), Some("frontend"));
    }

    #[test]
    fn deployment_carries_container_in_input_order() {
        let (workload, _) = descriptors(false);
        let dep = workload_manifest(&workload);
        let pod = dep.spec.unwrap().template.spec.unwrap();
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some("gcr.io/guestbook/frontend:v5"));
        let env: Vec<&str> = c
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(env, vec!["MODE", "GET_HOSTS_FROM"]);
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 8080);
        let requests = c.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests.get("cpu").unwrap().0, "100m");
        assert_eq!(requests.get("memory").unwrap().0, "100Mi");
        assert_eq!(
            pod.node_selector.as_ref().unwrap().get("disktype").unwrap(),
            "ssd"
        );
    }

    #[test]
    fn service_selector_is_the_resolved_label_set() {
        let (workload, endpoint) = descriptors(true);
        let svc = endpoint_manifest(&endpoint, &workload.labels);
        let spec = svc.spec.unwrap();
        assert_eq!(
            spec.selector.unwrap().get("app").map(String::as_str),
            Some("frontend")
        );
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn service_type_tracks_allocation_mode() {
        let (workload, endpoint) = descriptors(true);
        let svc = endpoint_manifest(&endpoint, &workload.labels);
        assert_eq!(svc.spec.unwrap().type_.as_deref(), Some("LoadBalancer"));

        let (workload, endpoint) = descriptors(false);
        let svc = endpoint_manifest(&endpoint, &workload.labels);
        assert_eq!(svc.spec.unwrap().type_, None);
    }
}
