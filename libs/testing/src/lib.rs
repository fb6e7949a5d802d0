//! Scriptable in-memory Cloud API for tests.
//!
//! `FakeCloud` keeps observed state in memory, applies successful mutations
//! to it (so a second run converges), and can be told to fail or delay
//! specific kinds. Every call is recorded with the tokio clock so tests can
//! assert dispatch order under paused time.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use stratus_model::{DesiredState, ProjectIdentity, ServiceKind, ServiceSpec};
use stratus_reconcile::{Action, ApplyReceipt, CloudApi, ObservedState, ProviderError};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Which operation a recorded call was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOp {
    Observe,
    Create,
    Update,
}

impl CallOp {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, CallOp::Observe)
    }
}

/// A recorded Cloud API call.
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: ServiceKind,
    pub op: CallOp,
    pub project_id: String,
    pub started_at: Instant,
}

#[derive(Default)]
struct Inner {
    observed: BTreeMap<ServiceKind, ServiceSpec>,
    observe_failures: BTreeMap<ServiceKind, VecDeque<ProviderError>>,
    apply_failures: BTreeMap<ServiceKind, VecDeque<ProviderError>>,
    latency: BTreeMap<ServiceKind, Duration>,
    calls: Vec<Call>,
}

/// In-memory provider with scripted failures.
#[derive(Default)]
pub struct FakeCloud {
    inner: Mutex<Inner>,
}

impl FakeCloud {
    /// A provider with no live resources.
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose live state already equals `desired`.
    pub fn converged_with(desired: &DesiredState) -> Self {
        desired
            .services
            .values()
            .cloned()
            .fold(Self::new(), FakeCloud::with_observed)
    }

    /// Seed a live resource.
    pub fn with_observed(mut self, spec: ServiceSpec) -> Self {
        self.inner.get_mut().observed.insert(spec.kind(), spec);
        self
    }

    /// Fail the next apply for `kind` with `err`. Queued failures are
    /// consumed one per call.
    pub fn fail_apply(mut self, kind: ServiceKind, err: ProviderError) -> Self {
        self.inner
            .get_mut()
            .apply_failures
            .entry(kind)
            .or_default()
            .push_back(err);
        self
    }

    /// Fail the next observation of `kind` with `err`.
    pub fn fail_observe(mut self, kind: ServiceKind, err: ProviderError) -> Self {
        self.inner
            .get_mut()
            .observe_failures
            .entry(kind)
            .or_default()
            .push_back(err);
        self
    }

    /// Delay every apply for `kind` by `delay`.
    pub fn with_latency(mut self, kind: ServiceKind, delay: Duration) -> Self {
        self.inner.get_mut().latency.insert(kind, delay);
        self
    }

    /// All calls in the order they started.
    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    /// Mutating calls only, in the order they started.
    pub async fn mutations(&self) -> Vec<(ServiceKind, CallOp)> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.op.is_mutation())
            .map(|c| (c.kind, c.op))
            .collect()
    }

    /// Current live spec for `kind`.
    pub async fn observed(&self, kind: ServiceKind) -> Option<ServiceSpec> {
        self.inner.lock().await.observed.get(&kind).cloned()
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    fn provider(&self) -> &str {
        "fake"
    }

    async fn observe(
        &self,
        project: &ProjectIdentity,
        kind: ServiceKind,
    ) -> Result<Option<ObservedState>, ProviderError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(Call {
            kind,
            op: CallOp::Observe,
            project_id: project.id.clone(),
            started_at: Instant::now(),
        });

        if let Some(err) = inner.observe_failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            return Err(err);
        }

        Ok(inner.observed.get(&kind).map(|spec| ObservedState {
            resource_id: format!("fake/{kind}"),
            spec: spec.clone(),
        }))
    }

    async fn apply(
        &self,
        project: &ProjectIdentity,
        action: &Action,
    ) -> Result<ApplyReceipt, ProviderError> {
        let kind = action.kind();
        let latency = {
            let mut inner = self.inner.lock().await;
            inner.calls.push(Call {
                kind,
                op: match action {
                    Action::Create(_) => CallOp::Create,
                    Action::Update(_) => CallOp::Update,
                },
                project_id: project.id.clone(),
                started_at: Instant::now(),
            });
            inner.latency.get(&kind).copied()
        };

        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.apply_failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            return Err(err);
        }

        inner.observed.insert(kind, action.spec().clone());
        Ok(ApplyReceipt {
            resource_id: format!("fake/{kind}"),
            operation_id: None,
        })
    }
}
