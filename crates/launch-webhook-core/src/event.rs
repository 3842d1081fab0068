//! Provider-neutral event envelope.
//!
//! Every parsed webhook becomes an [`EventEnvelope`]: the received headers plus
//! an [`ScmEvent`], a closed union over the per-provider event variant sets.
//! Routing only ever looks at the envelope through [`WebhookEvent`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::bitbucket_server::BitbucketServerWebhookEvent;
use crate::discriminator::DiscriminationError;
use crate::github::GithubWebhookEvent;
use crate::{ErrorCategory, ValidationError};

// ============================================================================
// Source types
// ============================================================================

/// Provider families a webhook can originate from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    BitbucketServer,
    BitbucketCloud,
    Github,
    GithubEnterprise,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BitbucketServer => "bitbucket_server",
            Self::BitbucketCloud => "bitbucket_cloud",
            Self::Github => "github",
            Self::GithubEnterprise => "github_enterprise",
        }
    }

    /// Display name used in diagnostics
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::BitbucketServer => "Bitbucket Server",
            Self::BitbucketCloud => "Bitbucket Cloud",
            Self::Github => "GitHub",
            Self::GithubEnterprise => "GitHub Enterprise",
        }
    }

    /// Whether events from this provider can be parsed and routed
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Github | Self::BitbucketServer)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Headers
// ============================================================================

/// Received HTTP headers with case-insensitive lookup
///
/// Original header names are preserved for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookHeaders {
    entries: BTreeMap<String, (String, String)>,
}

impl WebhookHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a plain header map
    ///
    /// Names differing only in case collapse to one entry. The map has no
    /// order, so the entry whose original name sorts first bytewise is kept.
    pub fn from_map(headers: &HashMap<String, String>) -> Self {
        let mut pairs: Vec<(&String, &String)> = headers.iter().collect();
        pairs.sort();

        let mut result = Self::new();
        for (name, value) in pairs {
            result
                .entries
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| (name.clone(), value.clone()));
        }
        result
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate over `(original name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for WebhookHeaders {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut result = Self::new();
        for (name, value) in iter {
            result.insert(name, value);
        }
        result
    }
}

// ============================================================================
// Event accessors
// ============================================================================

/// Uniform read-only view over any parsed webhook event
pub trait WebhookEvent {
    /// Provider family the event came from
    fn source_type(&self) -> SourceType;

    /// Discriminant of the event, e.g. `pull_request.closed` or `pr:merged`
    fn event_kind(&self) -> &'static str;

    /// Name of the event variant, e.g. `PullRequestOpened`
    fn variant_name(&self) -> &'static str;

    /// Raw `sha256=<hex>` signature header value, empty when absent
    fn signature_hash_sha256(&self) -> &str;

    /// GitHub organization or Bitbucket project key
    fn project_or_organization_key(&self) -> &str;

    /// Name of the repository the event concerns
    fn repository_name(&self) -> &str;
}

/// Closed union over every supported provider's events
#[derive(Debug, Clone, PartialEq)]
pub enum ScmEvent {
    Github(GithubWebhookEvent),
    BitbucketServer(BitbucketServerWebhookEvent),
}

impl ScmEvent {
    fn inner(&self) -> &dyn WebhookEvent {
        match self {
            Self::Github(event) => event,
            Self::BitbucketServer(event) => event,
        }
    }

    /// Qualified variant name such as `github::PullRequestOpened`
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.source_type(), self.variant_name())
    }

    /// Materialize the event as a JSON object
    ///
    /// The object holds every payload field, the discriminant field of the
    /// provider, plus `source_type` and the parsed `headers`.
    pub fn to_structured(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let (event, headers) = match self {
            Self::Github(event) => (
                serde_json::to_value(&event.event)?,
                serde_json::to_value(&event.headers)?,
            ),
            Self::BitbucketServer(event) => (
                serde_json::to_value(&event.event)?,
                serde_json::to_value(&event.headers)?,
            ),
        };

        let mut map = match event {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("event".to_string(), other);
                map
            }
        };
        map.insert(
            "source_type".to_string(),
            Value::String(self.source_type().as_str().to_string()),
        );
        map.insert("headers".to_string(), headers);
        Ok(map)
    }
}

impl WebhookEvent for ScmEvent {
    fn source_type(&self) -> SourceType {
        self.inner().source_type()
    }

    fn event_kind(&self) -> &'static str {
        self.inner().event_kind()
    }

    fn variant_name(&self) -> &'static str {
        self.inner().variant_name()
    }

    fn signature_hash_sha256(&self) -> &str {
        self.inner().signature_hash_sha256()
    }

    fn project_or_organization_key(&self) -> &str {
        self.inner().project_or_organization_key()
    }

    fn repository_name(&self) -> &str {
        self.inner().repository_name()
    }
}

/// Normalized result of discrimination: received headers plus the typed event
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub headers: WebhookHeaders,
    pub event: ScmEvent,
}

impl EventEnvelope {
    pub fn source_type(&self) -> SourceType {
        self.event.source_type()
    }

    pub fn signature_hash_sha256(&self) -> &str {
        self.event.signature_hash_sha256()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that make an inbound request unprocessable
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Failed to discriminate webhook source: {0}")]
    Discrimination(#[from] DiscriminationError),

    #[error("Webhook validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },
}

impl WebhookError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Discrimination(_) => false,
            Self::Validation(_) => false,
            Self::MalformedPayload { .. } => false,
        }
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Discrimination(_) => ErrorCategory::Permanent,
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::MalformedPayload { .. } => ErrorCategory::Permanent,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
