//! Configuration surface and normalizer.
//!
//! `RawConfig` is the wire shape users author (YAML/JSON, camelCase);
//! `normalize` validates it and fills defaults, producing the fully-defaulted
//! `Config` every later stage consumes. Defaults are applied independently
//! per field; the only cross-field rule is that address allocation requires
//! at least one exposed port.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EnvVar, Error, ResourceQuantities, ResourceRequirements, Result};

/// Fixed env entry appended after all user entries. A user entry with the
/// same name is shadowed under last-write-wins env semantics, not rejected.
pub const HOSTS_ENV_NAME: &str = "GET_HOSTS_FROM";
pub const HOSTS_ENV_VALUE: &str = "dns";

pub const DEFAULT_CPU_REQUEST: &str = "100m";
pub const DEFAULT_MEMORY_REQUEST: &str = "100Mi";

/// Resource request input: either the `{cpu, memory}` shorthand or a fully
/// explicit requests/limits object. An explicit object wins outright; it is
/// never merged with the shorthand defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ResourceInput {
    Shorthand { cpu: String, memory: String },
    Explicit(ResourceRequirements),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawPort {
    pub container_port: i32,
    /// Defaults to this entry's `container_port` when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
    /// Whether the endpoint forwards to this port.
    #[serde(default = "default_exposed")]
    pub exposed: bool,
}

fn default_exposed() -> bool {
    true
}

/// User-supplied configuration, prior to validation and defaulting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<RawPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub allocate_address: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub container_port: i32,
    pub host_port: i32,
    pub exposed: bool,
}

/// Fully-defaulted configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub namespace: String,
    pub image: String,
    pub replicas: i32,
    pub resources: ResourceRequirements,
    pub ports: Vec<Port>,
    pub env: Vec<EnvVar>,
    pub node_selector: BTreeMap<String, String>,
    pub allocate_address: bool,
}

impl Config {
    pub fn exposes_ports(&self) -> bool {
        self.ports.iter().any(|p| p.exposed)
    }
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(ResourceQuantities {
            cpu: Some(DEFAULT_CPU_REQUEST.to_string()),
            memory: Some(DEFAULT_MEMORY_REQUEST.to_string()),
        }),
        limits: None,
    }
}

/// Validate and fill defaults. Fails fast with `InvalidConfiguration`;
/// nothing downstream runs on an invalid input.
pub fn normalize(raw: RawConfig) -> Result<Config> {
    let namespace = raw
        .namespace
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid("namespace is required"))?;
    let image = raw
        .image
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::invalid("image is required"))?;

    let replicas = raw.replicas.unwrap_or(1);
    if replicas < 1 {
        return Err(Error::invalid(format!(
            "replicas must be >= 1 (got {replicas})"
        )));
    }

    let resources = match raw.resources {
        None => default_resources(),
        Some(ResourceInput::Shorthand { cpu, memory }) => ResourceRequirements {
            requests: Some(ResourceQuantities {
                cpu: Some(cpu),
                memory: Some(memory),
            }),
            limits: None,
        },
        // Explicit object wins completely, never merged with defaults.
        Some(ResourceInput::Explicit(explicit)) => explicit,
    };

    let ports: Vec<Port> = raw
        .ports
        .iter()
        .map(|p| Port {
            container_port: p.container_port,
            host_port: p.host_port.unwrap_or(p.container_port),
            exposed: p.exposed,
        })
        .collect();

    if raw.allocate_address && !ports.iter().any(|p| p.exposed) {
        return Err(Error::invalid(
            "allocateAddress requires at least one exposed port",
        ));
    }

    let mut env = raw.env;
    env.push(EnvVar {
        name: HOSTS_ENV_NAME.to_string(),
        value: HOSTS_ENV_VALUE.to_string(),
    });

    Ok(Config {
        namespace,
        image,
        replicas,
        resources,
        ports,
        env,
        node_selector: raw.node_selector,
        allocate_address: raw.allocate_address,
    })
}
