//! Tether component glue: one configuration in, a paired workload and
//! endpoint out, with the externally reachable address as the single
//! derived output.
//!
//! Ordering is structural: the endpoint's selector is a projection of the
//! workload's status, so the engine cannot create the endpoint before the
//! workload's label-bearing fields are declared. Everything after
//! normalization communicates failure through the deferred channel only.

#![forbid(unsafe_code)]

use tracing::info;

use tether_core::config::{normalize, RawConfig};
use tether_core::{build::build, EndpointStatus, Result, WorkloadStatus};
use tether_engine::Engine;
use tether_flow::Deferred;

pub mod address;

/// Handles to a submitted component. `endpoint` is `None` when the
/// configuration exposes no ports – workload-only creation is a valid,
/// detectable terminal outcome.
pub struct ServiceDeployment {
    pub workload: Deferred<WorkloadStatus>,
    pub endpoint: Option<Deferred<EndpointStatus>>,
    /// Resolved address: first ingress ip, else hostname, else empty; empty
    /// immediately when allocation was not requested. The surrounding tool
    /// waits on this before reporting success.
    pub address: Deferred<String>,
}

impl ServiceDeployment {
    /// Normalize, build descriptors and submit them. Configuration errors
    /// fail here, synchronously, before anything reaches the engine.
    pub async fn up(name: &str, raw: RawConfig, engine: &dyn Engine) -> Result<Self> {
        let cfg = normalize(raw)?;
        let (workload_desc, endpoint_desc) = build(name, &cfg);

        info!(component = %name, ns = %cfg.namespace, replicas = cfg.replicas, "submitting workload");
        let workload = engine.submit_workload(workload_desc).await;

        // Live binding, not a copy: whatever label policy the build step
        // applies, the endpoint tracks it through this projection.
        let selector = workload.project(|status| status.labels);

        let (endpoint, address) = if cfg.exposes_ports() {
            info!(component = %name, allocate = cfg.allocate_address, "submitting endpoint");
            let status = engine.submit_endpoint(endpoint_desc, selector).await;
            let address = address::resolve(&status, cfg.allocate_address);
            (Some(status), address)
        } else {
            (None, Deferred::ready(String::new()))
        };

        Ok(Self {
            workload,
            endpoint,
            address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::config::RawPort;
    use tether_core::{Error, IngressEntry, LabelSet};
    use tether_engine::{MockEngine, Submission};

    fn raw(allocate: bool) -> RawConfig {
        RawConfig {
            namespace: Some("default".into()),
            image: Some("gcr.io/guestbook/frontend:v5".into()),
            ports: vec![RawPort {
                container_port: 8080,
                host_port: Some(80),
                exposed: true,
            }],
            allocate_address: allocate,
            ..RawConfig::default()
        }
    }

    fn ingress(ip: &str, hostname: &str) -> IngressEntry {
        IngressEntry {
            ip: (!ip.is_empty()).then(|| ip.to_string()),
            hostname: (!hostname.is_empty()).then(|| hostname.to_string()),
        }
    }

    #[tokio::test]
    async fn invalid_configuration_submits_nothing() {
        let engine = MockEngine::new();
        let err = ServiceDeployment::up("web", RawConfig::default(), &engine)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)), "{err}");
        assert!(engine.submissions().is_empty());
    }

    #[tokio::test]
    async fn selector_equals_workload_labels_exactly() {
        let engine = MockEngine::new().with_ingress(vec![ingress("10.0.0.5", "")]);
        let d = ServiceDeployment::up("web", raw(true), &engine).await.unwrap();
        // Forcing the address forces the selector binding underneath it.
        d.address.wait().await.unwrap();
        let realized = d.workload.wait().await.unwrap().labels;
        assert_eq!(realized, LabelSet::for_component("web"));
        assert_eq!(engine.resolved_selectors(), vec![realized]);
    }

    #[tokio::test]
    async fn endpoint_is_submitted_after_the_workload() {
        let engine = MockEngine::new();
        let _ = ServiceDeployment::up("web", raw(false), &engine).await.unwrap();
        let log = engine.submissions();
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0], Submission::Workload(_)));
        assert!(matches!(log[1], Submission::Endpoint(_)));
    }

    #[tokio::test]
    async fn address_prefers_ip() {
        let engine = MockEngine::new().with_ingress(vec![ingress("10.0.0.5", "")]);
        let d = ServiceDeployment::up("web", raw(true), &engine).await.unwrap();
        assert_eq!(d.address.wait().await.unwrap(), "10.0.0.5");
    }

    #[tokio::test]
    async fn address_falls_back_to_hostname() {
        let engine = MockEngine::new().with_ingress(vec![ingress("", "svc.example.com")]);
        let d = ServiceDeployment::up("web", raw(true), &engine).await.unwrap();
        assert_eq!(d.address.wait().await.unwrap(), "svc.example.com");
    }

    #[tokio::test]
    async fn empty_ingress_is_a_data_error_not_an_empty_address() {
        let engine = MockEngine::new();
        let d = ServiceDeployment::up("web", raw(true), &engine).await.unwrap();
        assert_eq!(d.address.wait().await.unwrap_err(), Error::AddressUnavailable);
    }

    #[tokio::test]
    async fn unallocated_address_resolves_empty() {
        let engine = MockEngine::new();
        let d = ServiceDeployment::up("web", raw(false), &engine).await.unwrap();
        assert_eq!(d.address.try_resolved().unwrap().unwrap(), "");
    }

    #[tokio::test]
    async fn workload_failure_suppresses_endpoint_errors() {
        let engine = MockEngine::new()
            .failing_workload("workload quota exceeded")
            .failing_endpoint("endpoint would also fail");
        let d = ServiceDeployment::up("web", raw(true), &engine).await.unwrap();
        let err = d.address.wait().await.unwrap_err();
        assert!(err.to_string().contains("workload quota exceeded"), "{err}");
        // The endpoint handle reports the same upstream failure.
        let err = d.endpoint.unwrap().wait().await.unwrap_err();
        assert!(err.to_string().contains("workload quota exceeded"), "{err}");
    }

    #[tokio::test]
    async fn endpoint_failure_reaches_the_address() {
        let engine = MockEngine::new().failing_endpoint("endpoint create failed");
        let d = ServiceDeployment::up("web", raw(true), &engine).await.unwrap();
        let err = d.address.wait().await.unwrap_err();
        assert!(err.to_string().contains("endpoint create failed"), "{err}");
    }

    /// Engine that gives up before ever reporting the workload created.
    struct AbandoningEngine;

    #[async_trait::async_trait]
    impl Engine for AbandoningEngine {
        async fn submit_workload(
            &self,
            _desc: tether_core::WorkloadDescriptor,
        ) -> Deferred<WorkloadStatus> {
            let (handle, value) = Deferred::pending();
            drop(handle);
            value
        }

        async fn submit_endpoint(
            &self,
            _desc: tether_core::EndpointDescriptor,
            selector: Deferred<LabelSet>,
        ) -> Deferred<EndpointStatus> {
            selector.try_project(|_| Ok(EndpointStatus::default()))
        }
    }

    #[tokio::test]
    async fn abandoned_workload_cancels_selector_and_address() {
        let d = ServiceDeployment::up("web", raw(true), &AbandoningEngine)
            .await
            .unwrap();
        assert_eq!(d.address.wait().await.unwrap_err(), Error::Cancelled);
        assert_eq!(
            d.endpoint.unwrap().wait().await.unwrap_err(),
            Error::Cancelled
        );
    }

    #[tokio::test]
    async fn no_exposed_ports_means_workload_only() {
        let mut cfg = raw(false);
        cfg.ports.clear();
        let engine = MockEngine::new();
        let d = ServiceDeployment::up("web", cfg, &engine).await.unwrap();
        assert!(d.endpoint.is_none());
        assert_eq!(d.address.wait().await.unwrap(), "");
        assert_eq!(engine.submissions().len(), 1);
    }
}
