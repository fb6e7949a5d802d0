//! Typed desired-state model.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifies the target environment for every Cloud API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIdentity {
    pub id: String,
    pub region: String,
    pub zone: String,
}

impl std::fmt::Display for ProjectIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.id, self.region, self.zone)
    }
}

/// The service kinds a document may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    ComputeFleet,
    RelayFleet,
    LoadBalancer,
    Database,
}

impl ServiceKind {
    /// Every known kind.
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Database,
        ServiceKind::ComputeFleet,
        ServiceKind::RelayFleet,
        ServiceKind::LoadBalancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::ComputeFleet => "compute_fleet",
            ServiceKind::RelayFleet => "relay_fleet",
            ServiceKind::LoadBalancer => "load_balancer",
            ServiceKind::Database => "database",
        }
    }

    /// Kinds whose failure must prevent this kind from being applied.
    ///
    /// The load balancer fronts both fleets' endpoints. Fleets are only
    /// sequenced after the database, they do not require it to exist.
    pub fn dependencies(&self) -> &'static [ServiceKind] {
        match self {
            ServiceKind::LoadBalancer => &[ServiceKind::ComputeFleet, ServiceKind::RelayFleet],
            ServiceKind::ComputeFleet | ServiceKind::RelayFleet | ServiceKind::Database => &[],
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown service kind '{s}' (expected one of: {})",
                    ServiceKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}

/// A fleet of stateless compute instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeFleetSpec {
    pub instances: u32,
    pub cpu: u32,
    pub memory_mb: u32,
    pub max_connections: u32,
}

/// A fleet of relay servers listening on a fixed port set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayFleetSpec {
    pub instances: u32,
    pub cpu: u32,
    pub memory_mb: u32,
    pub ports: BTreeSet<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerScope {
    Global,
    Regional,
}

impl LoadBalancerScope {
    pub const VALUES: &'static [&'static str] = &["global", "regional"];
}

impl FromStr for LoadBalancerScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "regional" => Ok(Self::Regional),
            other => Err(one_of(other, Self::VALUES)),
        }
    }
}

impl std::fmt::Display for LoadBalancerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadBalancerScope::Global => f.write_str("global"),
            LoadBalancerScope::Regional => f.write_str("regional"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslPolicy {
    Modern,
    Compatible,
    Legacy,
}

impl SslPolicy {
    pub const VALUES: &'static [&'static str] = &["modern", "compatible", "legacy"];
}

impl FromStr for SslPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modern" => Ok(Self::Modern),
            "compatible" => Ok(Self::Compatible),
            "legacy" => Ok(Self::Legacy),
            other => Err(one_of(other, Self::VALUES)),
        }
    }
}

impl std::fmt::Display for SslPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslPolicy::Modern => f.write_str("modern"),
            SslPolicy::Compatible => f.write_str("compatible"),
            SslPolicy::Legacy => f.write_str("legacy"),
        }
    }
}

fn one_of(value: &str, allowed: &[&str]) -> String {
    format!("unknown value '{value}' (expected one of: {})", allowed.join(", "))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerSpec {
    pub scope: LoadBalancerScope,
    pub ssl_policy: SslPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSpec {
    pub location: String,
}

/// Desired (or observed) shape of one service kind.
///
/// Serialized without a tag: the variants are distinguished by their field
/// sets, which keeps the serialized form identical to the document format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceSpec {
    ComputeFleet(ComputeFleetSpec),
    RelayFleet(RelayFleetSpec),
    LoadBalancer(LoadBalancerSpec),
    Database(DatabaseSpec),
}

impl ServiceSpec {
    pub fn kind(&self) -> ServiceKind {
        match self {
            ServiceSpec::ComputeFleet(_) => ServiceKind::ComputeFleet,
            ServiceSpec::RelayFleet(_) => ServiceKind::RelayFleet,
            ServiceSpec::LoadBalancer(_) => ServiceKind::LoadBalancer,
            ServiceSpec::Database(_) => ServiceKind::Database,
        }
    }

    /// One-line human-readable description.
    pub fn summary(&self) -> String {
        match self {
            ServiceSpec::ComputeFleet(s) => format!(
                "{} x {} cpu / {} MB, max {} connections",
                s.instances, s.cpu, s.memory_mb, s.max_connections
            ),
            ServiceSpec::RelayFleet(s) => format!(
                "{} x {} cpu / {} MB, ports {}",
                s.instances,
                s.cpu,
                s.memory_mb,
                s.ports
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            ServiceSpec::LoadBalancer(s) => {
                format!("{} scope, {} ssl policy", s.scope, s.ssl_policy)
            }
            ServiceSpec::Database(s) => format!("location {}", s.location),
        }
    }
}

/// The target configuration an operator wants the live environment to match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub project: ProjectIdentity,
    pub services: BTreeMap<ServiceKind, ServiceSpec>,
}

impl DesiredState {
    /// Create a desired state with no services.
    pub fn new(project: ProjectIdentity) -> Self {
        Self {
            project,
            services: BTreeMap::new(),
        }
    }

    /// Add (or replace) the spec for the spec's kind.
    pub fn with_service(mut self, spec: ServiceSpec) -> Self {
        self.services.insert(spec.kind(), spec);
        self
    }

    pub fn get(&self, kind: ServiceKind) -> Option<&ServiceSpec> {
        self.services.get(&kind)
    }

    pub fn contains(&self, kind: ServiceKind) -> bool {
        self.services.contains_key(&kind)
    }

    /// The built-in baseline used when no document exists.
    pub fn baseline() -> Self {
        DesiredState::new(ProjectIdentity {
            id: "talowa".to_string(),
            region: "us-central1".to_string(),
            zone: "us-central1-a".to_string(),
        })
        .with_service(ServiceSpec::ComputeFleet(ComputeFleetSpec {
            instances: 10,
            cpu: 2,
            memory_mb: 4096,
            max_connections: 10_000,
        }))
        .with_service(ServiceSpec::RelayFleet(RelayFleetSpec {
            instances: 5,
            cpu: 4,
            memory_mb: 8192,
            ports: BTreeSet::from([3478, 5349]),
        }))
        .with_service(ServiceSpec::LoadBalancer(LoadBalancerSpec {
            scope: LoadBalancerScope::Global,
            ssl_policy: SslPolicy::Modern,
        }))
        .with_service(ServiceSpec::Database(DatabaseSpec {
            location: "us-central".to_string(),
        }))
    }
}
