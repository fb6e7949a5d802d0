//! Cloud API capability interface.
//!
//! The reconciler never talks to a provider SDK directly. Each provider is
//! an implementation of [`CloudApi`] injected at construction time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratus_model::{ProjectIdentity, ServiceKind, ServiceSpec};
use thiserror::Error;

use crate::Action;

/// Live configuration of one service kind as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Provider-assigned resource identifier.
    pub resource_id: String,

    /// The configuration currently in effect.
    pub spec: ServiceSpec,
}

/// Acknowledgement of a successful mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReceipt {
    pub resource_id: String,

    /// Provider operation identifier, when the provider exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

/// How the provider classified a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorClass {
    /// The call did not complete within the provider's limit.
    Timeout,
    /// The caller is being throttled.
    RateLimited,
    /// The request was understood and refused (validation).
    Rejected,
    PermissionDenied,
    QuotaExceeded,
    /// Anything else, including local I/O failures of simulated providers.
    Internal,
}

impl ProviderErrorClass {
    /// Transient failures are likely to succeed on immediate retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Rejected => "rejected",
            Self::PermissionDenied => "permission_denied",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ProviderErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed Cloud API call, with provider-supplied detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class}: {detail}")]
pub struct ProviderError {
    pub class: ProviderErrorClass,
    pub detail: String,
}

impl ProviderError {
    pub fn new(class: ProviderErrorClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ProviderErrorClass::Timeout, detail)
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::new(ProviderErrorClass::RateLimited, detail)
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self::new(ProviderErrorClass::Rejected, detail)
    }

    pub fn permission_denied(detail: impl Into<String>) -> Self {
        Self::new(ProviderErrorClass::PermissionDenied, detail)
    }

    pub fn quota_exceeded(detail: impl Into<String>) -> Self {
        Self::new(ProviderErrorClass::QuotaExceeded, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ProviderErrorClass::Internal, detail)
    }

    pub fn is_transient(&self) -> bool {
        self.class.is_transient()
    }
}

/// Cloud control plane operations the reconciler depends on.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Short provider name for logs and reports.
    fn provider(&self) -> &str;

    /// Read the live state of `kind` in `project`. `Ok(None)` means the
    /// resource does not exist.
    async fn observe(
        &self,
        project: &ProjectIdentity,
        kind: ServiceKind,
    ) -> Result<Option<ObservedState>, ProviderError>;

    /// Perform one mutating call.
    async fn apply(
        &self,
        project: &ProjectIdentity,
        action: &Action,
    ) -> Result<ApplyReceipt, ProviderError>;
}
