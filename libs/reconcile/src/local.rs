//! File-backed simulated provider.
//!
//! Keeps "live" resources in a JSON state file so that repeated runs against
//! the same file converge exactly as they would against a real control
//! plane. Writes are atomic (write to temp, rename).

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_model::{ProjectIdentity, ServiceKind, ServiceSpec};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cloud::{ApplyReceipt, CloudApi, ObservedState, ProviderError};
use crate::Action;

/// Persisted state file format version.
const STATE_VERSION: u32 = 1;

/// Persisted provider state.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedState {
    /// Format version.
    pub version: u32,

    /// Resources by project id, then kind.
    pub projects: BTreeMap<String, BTreeMap<ServiceKind, PersistedResource>>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            projects: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedResource {
    pub resource_id: String,
    pub spec: ServiceSpec,

    /// Incremented on every successful mutation.
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

/// Simulated provider backed by a local state file.
pub struct LocalStateCloud {
    state_path: PathBuf,

    /// Serializes read-modify-write cycles on the state file.
    write_lock: Mutex<()>,
}

impl LocalStateCloud {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Load state from disk.
    ///
    /// Returns empty state if the file doesn't exist.
    pub fn load(&self) -> Result<PersistedState> {
        let content = match std::fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.state_path.display(), "No state file, starting empty");
                return Ok(PersistedState::default());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read state file: {}", self.state_path.display())
                })
            }
        };

        let state: PersistedState = serde_json::from_str(&content).with_context(|| {
            format!("Failed to parse state file: {}", self.state_path.display())
        })?;

        if state.version != STATE_VERSION {
            anyhow::bail!(
                "state file {} has version {}, expected {}",
                self.state_path.display(),
                state.version,
                STATE_VERSION
            );
        }

        Ok(state)
    }

    /// Save state to disk atomically.
    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let tmp_path = self.state_path.with_extension("tmp");
        let content = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, &self.state_path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                tmp_path.display(),
                self.state_path.display()
            )
        })?;

        Ok(())
    }

    fn mutate(
        &self,
        project: &ProjectIdentity,
        action: &Action,
    ) -> Result<Result<ApplyReceipt, ProviderError>> {
        let mut state = self.load()?;
        let resources = state.projects.entry(project.id.clone()).or_default();
        let kind = action.kind();

        let resource = match action {
            Action::Create(spec) => {
                if let Some(existing) = resources.get(&kind) {
                    return Ok(Err(ProviderError::rejected(format!(
                        "{kind} already exists as {}",
                        existing.resource_id
                    ))));
                }
                let resource = PersistedResource {
                    resource_id: format!("{}/{}/{}", project.id, project.region, kind),
                    spec: spec.clone(),
                    generation: 1,
                    updated_at: Utc::now(),
                };
                resources.insert(kind, resource.clone());
                resource
            }
            Action::Update(spec) => {
                let Some(existing) = resources.get_mut(&kind) else {
                    return Ok(Err(ProviderError::rejected(format!("{kind} does not exist"))));
                };
                existing.spec = spec.clone();
                existing.generation += 1;
                existing.updated_at = Utc::now();
                existing.clone()
            }
        };

        self.save(&state)?;

        Ok(Ok(ApplyReceipt {
            operation_id: Some(format!("{}@{}", resource.resource_id, resource.generation)),
            resource_id: resource.resource_id,
        }))
    }
}

#[async_trait]
impl CloudApi for LocalStateCloud {
    fn provider(&self) -> &str {
        "local"
    }

    async fn observe(
        &self,
        project: &ProjectIdentity,
        kind: ServiceKind,
    ) -> Result<Option<ObservedState>, ProviderError> {
        let state = self
            .load()
            .map_err(|e| ProviderError::internal(format!("{e:#}")))?;

        Ok(state
            .projects
            .get(&project.id)
            .and_then(|resources| resources.get(&kind))
            .map(|r| ObservedState {
                resource_id: r.resource_id.clone(),
                spec: r.spec.clone(),
            }))
    }

    async fn apply(
        &self,
        project: &ProjectIdentity,
        action: &Action,
    ) -> Result<ApplyReceipt, ProviderError> {
        let _guard = self.write_lock.lock().await;

        match self.mutate(project, action) {
            Ok(result) => {
                if let Ok(ref receipt) = result {
                    info!(
                        path = %self.state_path.display(),
                        resource_id = %receipt.resource_id,
                        action = action.verb(),
                        "[LOCAL] Resource written"
                    );
                }
                result
            }
            Err(e) => {
                warn!(error = %e, "[LOCAL] State file update failed");
                Err(ProviderError::internal(format!("{e:#}")))
            }
        }
    }
}
