//! Tether provisioning engine seam.
//!
//! The engine is an injected collaborator: it receives static descriptors
//! and reports observed resource state exclusively through deferred values.
//! Once a submission has started there is no out-of-band error path – every
//! failure travels the deferred failure channel.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use tether_core::{
    EndpointDescriptor, EndpointStatus, Error, IngressEntry, LabelSet, WorkloadDescriptor,
    WorkloadStatus,
};
use tether_flow::Deferred;

pub mod manifest;
mod cluster;

pub use cluster::KubeEngine;

/// Provisioning engine interface. Implementations guarantee exactly-once
/// terminal resolution (value or failure) per submitted resource.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    /// Submit the workload for creation. The returned cell resolves with the
    /// observed status (including the realized label set) once the engine
    /// reports the resource created.
    async fn submit_workload(&self, desc: WorkloadDescriptor) -> Deferred<WorkloadStatus>;

    /// Submit the endpoint for creation. `selector` is the live binding to
    /// the workload's labels; the engine must not create the endpoint before
    /// it resolves, which serializes the two creations.
    async fn submit_endpoint(
        &self,
        desc: EndpointDescriptor,
        selector: Deferred<LabelSet>,
    ) -> Deferred<EndpointStatus>;
}

/// What a [`MockEngine`] saw, in submission order.
#[derive(Debug, Clone)]
pub enum Submission {
    Workload(WorkloadDescriptor),
    Endpoint(EndpointDescriptor),
}

/// Deterministic in-memory engine for tests: resolves synchronously, records
/// submissions, and can be primed to fail either resource.
#[derive(Default)]
pub struct MockEngine {
    workload_error: Option<String>,
    endpoint_error: Option<String>,
    ingress: Vec<IngressEntry>,
    log: Mutex<Vec<Submission>>,
    seen_selectors: Arc<Mutex<Vec<LabelSet>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ingress(mut self, ingress: Vec<IngressEntry>) -> Self {
        self.ingress = ingress;
        self
    }

    pub fn failing_workload(mut self, msg: impl Into<String>) -> Self {
        self.workload_error = Some(msg.into());
        self
    }

    pub fn failing_endpoint(mut self, msg: impl Into<String>) -> Self {
        self.endpoint_error = Some(msg.into());
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.log.lock().expect("submission log poisoned").clone()
    }

    /// Selector label sets as they resolved at endpoint-creation time.
    pub fn resolved_selectors(&self) -> Vec<LabelSet> {
        self.seen_selectors
            .lock()
            .expect("selector log poisoned")
            .clone()
    }
}

#[async_trait::async_trait]
impl Engine for MockEngine {
    async fn submit_workload(&self, desc: WorkloadDescriptor) -> Deferred<WorkloadStatus> {
        let labels = desc.labels.clone();
        self.log
            .lock()
            .expect("submission log poisoned")
            .push(Submission::Workload(desc));
        match &self.workload_error {
            Some(msg) => Deferred::failed(Error::provisioning(msg.clone())),
            None => Deferred::ready(WorkloadStatus {
                labels,
                uid: None,
                creation_ts: 0,
            }),
        }
    }

    async fn submit_endpoint(
        &self,
        desc: EndpointDescriptor,
        selector: Deferred<LabelSet>,
    ) -> Deferred<EndpointStatus> {
        self.log
            .lock()
            .expect("submission log poisoned")
            .push(Submission::Endpoint(desc));
        let ingress = self.ingress.clone();
        let err = self.endpoint_error.clone();
        let seen = Arc::clone(&self.seen_selectors);
        // Deriving the status from the selector keeps the real engine's
        // semantics: a failed or cancelled workload reaches the endpoint's
        // consumers unchanged, and the endpoint's own failure only surfaces
        // when the selector actually resolved.
        selector.try_project(move |labels| {
            seen.lock().expect("selector log poisoned").push(labels);
            match err {
                Some(msg) => Err(Error::provisioning(msg)),
                None => Ok(EndpointStatus { ingress }),
            }
        })
    }
}
