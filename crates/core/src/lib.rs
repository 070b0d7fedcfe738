//! Tether core types: errors, labels, descriptors and engine-observed status.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod build;
pub mod config;

pub type Uid = [u8; 16];

/// Errors suitable for transport over the deferred failure channel.
///
/// `InvalidConfiguration` is the only synchronous variant: it is raised
/// before anything is submitted. Everything else travels through
/// `tether-flow` deferreds once submission has started.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("provisioning: {0}")]
    Provisioning(String),
    #[error("endpoint status carries no ingress entry")]
    AddressUnavailable,
    #[error("cancelled before resolution")]
    Cancelled,
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Key/value tags binding an endpoint's selector to a workload's instances.
///
/// Constructed once by the descriptor builder and read-only afterwards:
/// there is no mutator, so the pod template and the selector projection can
/// share one value without relabeling hazards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelSet {
    entries: SmallVec<[(String, String); 4]>,
}

impl LabelSet {
    /// The canonical label set for a component: `app: <name>`.
    pub fn for_component(name: &str) -> Self {
        let mut entries = SmallVec::new();
        entries.push(("app".to_string(), name.to_string()));
        Self { entries }
    }

    /// Label set as observed on a live resource (engine use).
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Container spec owned by a workload descriptor. Env and port order is the
/// configuration's input order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub resources: ResourceRequirements,
    pub env: Vec<EnvVar>,
    pub ports: Vec<ContainerPortSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPortSpec {
    pub container_port: i32,
}

/// Requests/limits as plain quantity strings ("100m", "100Mi"); rendering to
/// orchestrator quantity types happens at the engine boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantities>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceQuantities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Node placement constraints for the workload's instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacementSpec {
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub node_selector: std::collections::BTreeMap<String, String>,
}

/// Static description of the replicated workload to create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDescriptor {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    /// Generated at build time; the only field later consumers read.
    pub labels: LabelSet,
    pub container: ContainerSpec,
    pub placement: PlacementSpec,
}

/// How the endpoint's address is allocated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AllocationMode {
    ClusterLocal,
    ExternallyRoutable,
}

/// External port → target container port, in input order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub port: i32,
    pub target_port: i32,
}

/// Static description of the network-facing endpoint.
///
/// Deliberately carries no selector field: the selector reaches the engine
/// only as a deferred projection of the workload's realized labels, so the
/// two can never be authored apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub name: String,
    pub namespace: String,
    pub ports: Vec<PortMapping>,
    pub allocation: AllocationMode,
}

/// Observed state of a created workload, as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// The label set the orchestrator actually persisted on the pod template.
    pub labels: LabelSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default)]
    pub creation_ts: i64,
}

/// Externally reachable address assigned to an endpoint. At most one of
/// `ip`/`hostname` is meaningful.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngressEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Observed state of a created endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointStatus {
    pub ingress: Vec<IngressEntry>,
}

pub mod prelude {
    pub use super::{
        AllocationMode, ContainerSpec, EndpointDescriptor, EndpointStatus, EnvVar, Error,
        IngressEntry, LabelSet, PortMapping, Result, WorkloadDescriptor, WorkloadStatus,
    };
    pub use super::build::build;
    pub use super::config::{normalize, Config, RawConfig};
}
