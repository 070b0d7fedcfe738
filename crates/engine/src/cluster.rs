//! Kube-backed provisioning engine: server-side apply of the rendered
//! manifests, plus an ingress watch for externally routable endpoints.

use anyhow::{anyhow, Context, Result};
use futures::TryStreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::watcher::{self, Event},
    Client,
};
use metrics::{counter, histogram};
use tracing::{info, warn};
use uuid::Uuid;

use tether_core::{
    AllocationMode, EndpointDescriptor, EndpointStatus, Error, IngressEntry, LabelSet, Uid,
    WorkloadDescriptor, WorkloadStatus,
};
use tether_flow::Deferred;

use crate::manifest;

const FIELD_MANAGER: &str = "tether";

fn ingress_timeout() -> std::time::Duration {
    let secs = std::env::var("TETHER_INGRESS_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(300);
    std::time::Duration::from_secs(secs)
}

/// Engine implementation against the current kube context.
pub struct KubeEngine {
    client: Client,
}

impl KubeEngine {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("building kube client from current context")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl crate::Engine for KubeEngine {
    async fn submit_workload(&self, desc: WorkloadDescriptor) -> Deferred<WorkloadStatus> {
        let (handle, value) = Deferred::pending();
        let client = self.client.clone();
        tokio::spawn(async move {
            let t0 = std::time::Instant::now();
            counter!("workload_submit_attempts", 1u64);
            match apply_workload(client, &desc).await {
                Ok(status) => {
                    histogram!("workload_submit_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                    counter!("workload_submit_ok", 1u64);
                    handle.resolve(status);
                }
                Err(e) => {
                    counter!("workload_submit_err", 1u64);
                    handle.fail(Error::provisioning(format!("{e:#}")));
                }
            }
        });
        value
    }

    async fn submit_endpoint(
        &self,
        desc: EndpointDescriptor,
        selector: Deferred<LabelSet>,
    ) -> Deferred<EndpointStatus> {
        let (handle, value) = Deferred::pending();
        let client = self.client.clone();
        tokio::spawn(async move {
            // The endpoint is never created before the workload's labels are
            // reported; awaiting the selector serializes the two creations.
            let labels = match selector.wait().await {
                Ok(l) => l,
                Err(e) => {
                    handle.fail(e);
                    return;
                }
            };
            let t0 = std::time::Instant::now();
            counter!("endpoint_submit_attempts", 1u64);
            match apply_endpoint(client, &desc, &labels).await {
                Ok(status) => {
                    histogram!("endpoint_submit_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                    counter!("endpoint_submit_ok", 1u64);
                    handle.resolve(status);
                }
                Err(e) => {
                    counter!("endpoint_submit_err", 1u64);
                    handle.fail(Error::provisioning(format!("{e:#}")));
                }
            }
        });
        value
    }
}

async fn apply_workload(client: Client, desc: &WorkloadDescriptor) -> Result<WorkloadStatus> {
    let api: Api<Deployment> = Api::namespaced(client, &desc.namespace);
    let obj = api
        .patch(
            &desc.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Apply(&manifest::workload_manifest(desc)),
        )
        .await
        .with_context(|| format!("server-side apply of workload {}", desc.name))?;
    info!(workload = %desc.name, ns = %desc.namespace, "workload applied");

    // Realized labels come from what the server persisted, not from the
    // descriptor we sent.
    let labels = obj
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.as_ref())
        .map(|m| LabelSet::from_entries(m.iter().map(|(k, v)| (k.clone(), v.clone()))))
        .ok_or_else(|| anyhow!("applied workload is missing pod template labels"))?;
    let uid = match obj.metadata.uid.as_deref() {
        Some(u) => Some(parse_uid(u)?),
        None => None,
    };
    let creation_ts = obj
        .metadata
        .creation_timestamp
        .map(|t| t.0.timestamp())
        .unwrap_or(0);
    Ok(WorkloadStatus {
        labels,
        uid,
        creation_ts,
    })
}

async fn apply_endpoint(
    client: Client,
    desc: &EndpointDescriptor,
    selector: &LabelSet,
) -> Result<EndpointStatus> {
    let api: Api<Service> = Api::namespaced(client, &desc.namespace);
    let obj = api
        .patch(
            &desc.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Apply(&manifest::endpoint_manifest(desc, selector)),
        )
        .await
        .with_context(|| format!("server-side apply of endpoint {}", desc.name))?;
    info!(endpoint = %desc.name, ns = %desc.namespace, "endpoint applied");

    match desc.allocation {
        AllocationMode::ClusterLocal => Ok(ingress_of(&obj)),
        AllocationMode::ExternallyRoutable => {
            let observed = ingress_of(&obj);
            if !observed.ingress.is_empty() {
                return Ok(observed);
            }
            wait_for_ingress(api, &desc.name).await
        }
    }
}

fn ingress_of(svc: &Service) -> EndpointStatus {
    let ingress = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|entries| {
            entries
                .iter()
                .map(|i| IngressEntry {
                    ip: i.ip.clone(),
                    hostname: i.hostname.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    EndpointStatus { ingress }
}

/// Watch the endpoint until an ingress entry appears. On timeout the last
/// observed status is returned as terminal (possibly with an empty ingress
/// list, which downstream consumers surface as a distinct data error rather
/// than an address).
async fn wait_for_ingress(api: Api<Service>, name: &str) -> Result<EndpointStatus> {
    let cfg = watcher::Config::default().fields(&format!("metadata.name={name}"));
    let stream = watcher::watcher(api, cfg);
    futures::pin_mut!(stream);
    let deadline = tokio::time::sleep(ingress_timeout());
    tokio::pin!(deadline);
    let mut last = EndpointStatus::default();
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(endpoint = %name, "ingress wait timed out; resolving with last observed status");
                return Ok(last);
            }
            ev = stream.try_next() => {
                match ev.context("watching endpoint status")? {
                    Some(Event::Applied(svc)) => {
                        let st = ingress_of(&svc);
                        if !st.ingress.is_empty() {
                            return Ok(st);
                        }
                        last = st;
                    }
                    Some(Event::Restarted(list)) => {
                        for svc in &list {
                            let st = ingress_of(svc);
                            if !st.ingress.is_empty() {
                                return Ok(st);
                            }
                            last = st;
                        }
                    }
                    Some(Event::Deleted(_)) => {}
                    None => {
                        warn!(endpoint = %name, "endpoint watch ended before ingress appeared");
                        return Ok(last);
                    }
                }
            }
        }
    }
}

fn parse_uid(uid_str: &str) -> Result<Uid> {
    let u = Uuid::parse_str(uid_str).context("parsing metadata.uid as uuid")?;
    Ok(*u.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};

    #[test]
    fn ingress_of_reads_load_balancer_entries_in_order() {
        let svc = Service {
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![
                        LoadBalancerIngress {
                            ip: Some("10.0.0.5".into()),
                            ..Default::default()
                        },
                        LoadBalancerIngress {
                            hostname: Some("lb.example.com".into()),
                            ..Default::default()
                        },
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let st = ingress_of(&svc);
        assert_eq!(st.ingress[0].ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(st.ingress[1].hostname.as_deref(), Some("lb.example.com"));
    }

    #[test]
    fn ingress_of_is_empty_without_status() {
        assert!(ingress_of(&Service::default()).ingress.is_empty());
    }

    #[test]
    fn uid_parses_from_kube_form() {
        let uid = parse_uid("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        assert_eq!(uid.len(), 16);
        assert!(parse_uid("not-a-uid").is_err());
    }
}
