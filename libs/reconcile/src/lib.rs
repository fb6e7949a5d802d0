//! Reconciliation primitives.
//!
//! This library computes, per service kind, the minimal set of actions that
//! moves observed state to desired state, and dispatches them through the
//! [`CloudApi`] contract. Key concepts:
//!
//! - **Desired state**: what the operator wants (from the config document).
//! - **Observed state**: what the provider reports right now.
//! - **Convergence**: observed equals desired; nothing to do.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - At most one action per kind, and updates always replace the full spec
//! - Observed state is read fresh for every plan, never cached
//! - Provider failures are returned as values, never raised

pub mod cloud;
pub mod local;

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use stratus_model::{ProjectIdentity, ServiceKind, ServiceSpec};
use tracing::{debug, info, warn};

pub use cloud::{ApplyReceipt, CloudApi, ObservedState, ProviderError, ProviderErrorClass};
pub use local::LocalStateCloud;

/// Convergence status for a service kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Observed matches desired.
    Converged,

    /// No live resource exists yet.
    Missing,

    /// A live resource exists with a different configuration.
    Diverged,
}

impl ConvergenceStatus {
    /// Returns true if the kind has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// A spec hash for deterministic comparison in reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Compute the hash of a service spec.
    pub fn of(spec: &ServiceSpec) -> Self {
        Self::from_json(&serde_json::to_value(spec).unwrap_or_default())
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| {
                    format!("{}:{}", serde_json::Value::from(k.as_str()), canonical_json(v))
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// A mutating call to issue against the Cloud API.
///
/// Updates always carry the full desired spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create(ServiceSpec),
    Update(ServiceSpec),
}

impl Action {
    pub fn kind(&self) -> ServiceKind {
        self.spec().kind()
    }

    pub fn spec(&self) -> &ServiceSpec {
        match self {
            Action::Create(spec) | Action::Update(spec) => spec,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Action::Create(_) => "create",
            Action::Update(_) => "update",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.verb(), self.kind())
    }
}

/// Compute the actions needed to move `observed` to `desired`.
///
/// Returns at most one action: `Create` when nothing exists, `Update` when
/// the observed spec differs by value, nothing when they are equal.
pub fn diff(desired: &ServiceSpec, observed: Option<&ServiceSpec>) -> Vec<Action> {
    match observed {
        None => vec![Action::Create(desired.clone())],
        Some(observed) if observed != desired => vec![Action::Update(desired.clone())],
        Some(_) => Vec::new(),
    }
}

/// Describe which fields differ between two specs, e.g. `instances 3 -> 10`.
pub fn describe_changes(observed: &ServiceSpec, desired: &ServiceSpec) -> Vec<String> {
    fn change<T>(out: &mut Vec<String>, field: &str, old: T, new: T)
    where
        T: PartialEq + std::fmt::Display,
    {
        if old != new {
            out.push(format!("{field} {old} -> {new}"));
        }
    }

    fn ports(set: &std::collections::BTreeSet<u16>) -> String {
        let list: Vec<String> = set.iter().map(u16::to_string).collect();
        format!("[{}]", list.join(","))
    }

    let mut out = Vec::new();
    match (observed, desired) {
        (ServiceSpec::ComputeFleet(o), ServiceSpec::ComputeFleet(d)) => {
            change(&mut out, "instances", o.instances, d.instances);
            change(&mut out, "cpu", o.cpu, d.cpu);
            change(&mut out, "memory_mb", o.memory_mb, d.memory_mb);
            change(&mut out, "max_connections", o.max_connections, d.max_connections);
        }
        (ServiceSpec::RelayFleet(o), ServiceSpec::RelayFleet(d)) => {
            change(&mut out, "instances", o.instances, d.instances);
            change(&mut out, "cpu", o.cpu, d.cpu);
            change(&mut out, "memory_mb", o.memory_mb, d.memory_mb);
            change(&mut out, "ports", ports(&o.ports), ports(&d.ports));
        }
        (ServiceSpec::LoadBalancer(o), ServiceSpec::LoadBalancer(d)) => {
            change(&mut out, "scope", o.scope, d.scope);
            change(&mut out, "ssl_policy", o.ssl_policy, d.ssl_policy);
        }
        (ServiceSpec::Database(o), ServiceSpec::Database(d)) => {
            change(&mut out, "location", o.location.as_str(), d.location.as_str());
        }
        (o, d) => out.push(format!("kind {} -> {}", o.kind(), d.kind())),
    }
    out
}

/// Planning outcome for one service kind.
#[derive(Debug, Clone)]
pub struct Plan {
    pub kind: ServiceKind,
    pub status: ConvergenceStatus,
    pub actions: Vec<Action>,

    /// Human-readable description of the delta.
    pub detail: String,

    /// Hash of the desired spec.
    pub spec_hash: SpecHash,
}

/// Result of dispatching one action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action: Action,
    pub outcome: Result<ApplyReceipt, ProviderError>,
}

impl ActionResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Reconciler for one service kind.
///
/// Holds no observed state between calls; every plan starts from a fresh
/// observation.
#[derive(Clone)]
pub struct ServiceReconciler {
    kind: ServiceKind,
    cloud: Arc<dyn CloudApi>,
}

impl ServiceReconciler {
    pub fn new(kind: ServiceKind, cloud: Arc<dyn CloudApi>) -> Self {
        Self { kind, cloud }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Read the live state of this kind.
    pub async fn observe(
        &self,
        project: &ProjectIdentity,
    ) -> Result<Option<ObservedState>, ProviderError> {
        let observed = self.cloud.observe(project, self.kind).await?;
        if let Some(ref o) = observed {
            if o.spec.kind() != self.kind {
                warn!(
                    kind = %self.kind,
                    observed_kind = %o.spec.kind(),
                    resource_id = %o.resource_id,
                    "Provider returned a spec of a different kind"
                );
            }
        }
        Ok(observed)
    }

    /// Compute the plan for this kind. Does not touch the Cloud API.
    pub fn plan(&self, desired: &ServiceSpec, observed: Option<&ObservedState>) -> Plan {
        let observed_spec = observed.map(|o| &o.spec);
        let actions = diff(desired, observed_spec);

        let (status, detail) = match (observed_spec, actions.first()) {
            (_, None) => (ConvergenceStatus::Converged, "in sync".to_string()),
            (None, Some(_)) => (
                ConvergenceStatus::Missing,
                format!("create: {}", desired.summary()),
            ),
            (Some(observed), Some(_)) => (
                ConvergenceStatus::Diverged,
                format!("update: {}", describe_changes(observed, desired).join(", ")),
            ),
        };

        debug!(kind = %self.kind, ?status, action_count = actions.len(), "Planned");

        Plan {
            kind: self.kind,
            status,
            actions,
            detail,
            spec_hash: SpecHash::of(desired),
        }
    }

    /// Dispatch one action. Issues exactly one mutating call.
    pub async fn apply(&self, project: &ProjectIdentity, action: &Action) -> ActionResult {
        let outcome = self.cloud.apply(project, action).await;
        match &outcome {
            Ok(receipt) => info!(
                kind = %self.kind,
                action = action.verb(),
                resource_id = %receipt.resource_id,
                provider = self.cloud.provider(),
                "Action applied"
            ),
            Err(e) => warn!(
                kind = %self.kind,
                action = action.verb(),
                error = %e,
                transient = e.is_transient(),
                provider = self.cloud.provider(),
                "Action failed"
            ),
        }
        ActionResult {
            action: action.clone(),
            outcome,
        }
    }
}
