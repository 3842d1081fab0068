//! # Launch-Webhook Core
//!
//! Core business logic for turning source-control webhooks into cloud
//! automation launches.
//!
//! This crate discriminates inbound webhook requests by provider, parses the
//! payload into a closed set of strongly-typed events, matches the event
//! against declarative routing rules, verifies signatures, runs the rule's
//! transform and dispatches the result to a build, pipeline or function
//! destination.
//!
//! ## Architecture
//!
//! - Provider payloads are modelled per provider in [`github`] and [`bitbucket_server`]
//! - [`discriminator`] maps raw headers and body onto an [`EventEnvelope`]
//! - [`source`] decides whether a rule applies to an event
//! - [`destination`] owns the lazily-authenticated cloud clients
//! - [`processor`] runs every rule in order and isolates per-rule failures
//!
//! All cloud collaborators (secret retrieval, role assumption, build, pipeline
//! and function invocation) sit behind traits. The `aws` feature provides the
//! AWS SDK implementations.
//!
//! ## Usage
//!
//! ```rust
//! use launch_webhook_core::types::CommitHash;
//!
//! let hash = CommitHash::new("0123456789abcdef0123456789abcdef01234567").unwrap();
//! assert_eq!(hash.as_str().len(), 40);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard result type for launch-webhook validation
pub type ValidationResult<T> = Result<T, ValidationError>;

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that may succeed on a later delivery
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Security-related failures requiring attention
    Security,
    /// Configuration errors preventing rule construction
    Configuration,
}

/// A single violated field inside a parsed payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Dotted path to the offending field, e.g. `body.pullRequest.fromRef.latestCommit`
    pub path: String,

    /// Human readable description of the violation
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("{source_type} is not yet supported")]
    UnsupportedSource { source_type: String },

    #[error("Payload failed validation: {}", format_violations(.violations))]
    Payload { violations: Vec<FieldViolation> },
}

impl ValidationError {
    /// Field paths of every violation carried by this error
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Required { field } | Self::InvalidFormat { field, .. } => vec![field.as_str()],
            Self::UnsupportedSource { .. } => Vec::new(),
            Self::Payload { violations } => violations.iter().map(|v| v.path.as_str()).collect(),
        }
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Module declarations
// ============================================================================

/// Shared validated value types (commit hashes, URLs, ARNs)
pub mod types;

/// GitHub payload model and events
pub mod github;

/// Bitbucket Server payload model and events
pub mod bitbucket_server;

/// Provider-neutral event envelope and accessors
pub mod event;

/// Provider discrimination and payload normalization
pub mod discriminator;

/// Secret values and the secret store abstraction
pub mod secrets;

/// HMAC-SHA256 webhook signature computation
pub mod signature;

/// Rule source specifications and matching
pub mod source;

/// Event transforms and the transform registry
pub mod transform;

/// Cloud destinations and collaborator interfaces
pub mod destination;

/// Routing rules and rule-set loading
pub mod rule;

/// Rule evaluation over raw webhook requests
pub mod processor;

/// Collaborator implementations
pub mod adapters;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types for convenience
pub use destination::{
    CloudError, CloudServices, Destination, DestinationConfig, DestinationError, DispatchSettings,
};
pub use discriminator::{discriminate, normalize, DiscriminationError};
pub use event::{EventEnvelope, ScmEvent, SourceType, WebhookError, WebhookEvent, WebhookHeaders};
pub use processor::{EventProcessor, FailureStage, ProcessingReport, RuleOutcome, RuleReport};
pub use rule::{Rule, RuleConfig, RuleConfigError, RuleSet};
pub use secrets::{SecretError, SecretReference, SecretStore, SecretValue};
pub use source::{MatchOutcome, SourceConfigError, SourceSpec};
pub use transform::{Transform, TransformError, TransformRegistry, TransformResult};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
