//! # stratus-model
//!
//! Desired-state model for the stratus reconciler.
//!
//! A desired-state document names the target project and, per service kind,
//! the shape that kind should converge to:
//!
//! ```yaml
//! project:
//!   id: talowa
//!   region: us-central1
//!   zone: us-central1-a
//! services:
//!   compute_fleet: { instances: 10, cpu: 2, memory: 4Gi, max_connections: 10000 }
//!   relay_fleet: { instances: 5, cpu: 4, memory_mb: 8192, ports: [3478, 5349] }
//!   load_balancer: { scope: global, ssl_policy: modern }
//!   database: { location: us-central }
//! ```
//!
//! ## Invariants
//!
//! - Every numeric field is strictly positive
//! - Each service kind appears at most once
//! - Unknown kinds and fields are rejected at load time, never dropped
//! - A `DesiredState` is read-only once constructed

mod error;
mod source;
mod types;
mod validate;

pub use error::{ConfigurationError, Violation};
pub use source::{ConfigSource, Loaded, Origin};
pub use types::*;
pub use validate::parse_document;
