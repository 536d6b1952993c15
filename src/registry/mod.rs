//! Model registry access
//!
//! Thin client for the MLflow tracking server REST API. Only the calls needed
//! to locate and download a run's model artifact are implemented.

pub mod client;
pub mod error;
pub mod uri;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{ArtifactFile, RegistryClient, RunInfo};
pub use error::RegistryError;
pub use uri::ModelUri;
