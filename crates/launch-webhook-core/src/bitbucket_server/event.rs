//! Bitbucket Server webhook headers and event variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::{Change, CloneLink, PullRequest, Repository, User};
use crate::event::{SourceType, WebhookEvent, WebhookHeaders};
use crate::types::{
    check_format, field_path, flexible_timestamp, CommitHash, EmailAddress, FieldFormat, HttpsUrl,
    RawFormats, Validate, Violations,
};
use crate::ValidationError;

/// Header identifying a Bitbucket delivery
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Header carrying the Bitbucket event key
pub const EVENT_KEY_HEADER: &str = "X-Event-Key";

/// Header only sent by Bitbucket Cloud
pub const HOOK_UUID_HEADER: &str = "X-Hook-UUID";

/// Header carrying the `sha256=<hex>` signature when the webhook has a secret
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Field carrying the event kind discriminant in a serialized event
pub const EVENT_KEY_FIELD: &str = "eventKey";

const REQUIRED_HEADERS: [&str; 2] = [REQUEST_ID_HEADER, EVENT_KEY_HEADER];

// ============================================================================
// Headers
// ============================================================================

/// Headers Bitbucket Server sends with every webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitbucketServerHeaders {
    pub request_id: String,
    pub event_key: String,

    /// Empty unless the webhook is configured with a secret
    #[serde(default)]
    pub signature: String,
}

impl BitbucketServerHeaders {
    /// Validate and extract the Bitbucket Server header set
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Payload`] listing every missing required header.
    pub fn from_headers(headers: &WebhookHeaders) -> Result<Self, ValidationError> {
        let mut violations = Violations::new();
        for name in REQUIRED_HEADERS {
            if headers.get(name).is_none() {
                violations.push(field_path("headers", name), "header is required");
            }
        }
        violations.into_result()?;

        Ok(Self {
            request_id: headers.get(REQUEST_ID_HEADER).unwrap_or_default().to_string(),
            event_key: headers.get(EVENT_KEY_HEADER).unwrap_or_default().to_string(),
            signature: headers.get(SIGNATURE_HEADER).unwrap_or_default().to_string(),
        })
    }
}

// ============================================================================
// Event kinds
// ============================================================================

/// Closed set of Bitbucket Server event keys understood by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitbucketServerEventKind {
    #[serde(rename = "repo:refs_changed")]
    RepoRefsChanged,
    #[serde(rename = "pr:from_ref_updated")]
    PrFromRefUpdated,
    #[serde(rename = "pr:opened")]
    PrOpened,
    #[serde(rename = "pr:merged")]
    PrMerged,
}

impl BitbucketServerEventKind {
    pub const ALL: [BitbucketServerEventKind; 4] = [
        Self::RepoRefsChanged,
        Self::PrFromRefUpdated,
        Self::PrOpened,
        Self::PrMerged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepoRefsChanged => "repo:refs_changed",
            Self::PrFromRefUpdated => "pr:from_ref_updated",
            Self::PrOpened => "pr:opened",
            Self::PrMerged => "pr:merged",
        }
    }
}

impl fmt::Display for BitbucketServerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BitbucketServerEventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "eventKey".to_string(),
                message: format!("unknown Bitbucket Server event key '{}'", s),
            })
    }
}

// ============================================================================
// Raw payload formats
// ============================================================================

/// Format checks applied to a Bitbucket Server body that does not decode
pub const RAW_FORMATS: RawFormats = RawFormats {
    fields: &[
        FieldFormat {
            pattern: "changes[].fromHash",
            check: check_format::<CommitHash>,
        },
        FieldFormat {
            pattern: "changes[].toHash",
            check: check_format::<CommitHash>,
        },
        FieldFormat {
            pattern: "previousFromHash",
            check: check_format::<CommitHash>,
        },
        FieldFormat {
            pattern: "**.latestCommit",
            check: check_format::<CommitHash>,
        },
        FieldFormat {
            pattern: "**.emailAddress",
            check: check_format::<EmailAddress>,
        },
        FieldFormat {
            pattern: "**.links.clone[]",
            check: check_format::<CloneLink>,
        },
        FieldFormat {
            pattern: "**.links.self[].href",
            check: check_format::<HttpsUrl>,
        },
    ],
    opaque: &[],
};

// ============================================================================
// Event payloads
// ============================================================================

/// Refs pushed to a repository (`repo:refs_changed`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(with = "flexible_timestamp")]
    pub date: DateTime<Utc>,
    pub actor: User,
    pub repository: Repository,
    pub changes: Vec<Change>,
}

impl Validate for PushEvent {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.actor.validate(&field_path(path, "actor"), violations);
        self.repository
            .validate(&field_path(path, "repository"), violations);
        self.changes.validate(&field_path(path, "changes"), violations);
    }
}

/// Pull request opened or merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    #[serde(with = "flexible_timestamp")]
    pub date: DateTime<Utc>,
    pub actor: User,
    #[serde(rename = "pullRequest")]
    pub pull_request: PullRequest,
}

impl Validate for PullRequestEvent {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.actor.validate(&field_path(path, "actor"), violations);
        self.pull_request
            .validate(&field_path(path, "pullRequest"), violations);
    }
}

/// New commits pushed to a pull request's source branch (`pr:from_ref_updated`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBranchUpdatedEvent {
    #[serde(with = "flexible_timestamp")]
    pub date: DateTime<Utc>,
    pub actor: User,
    pub pull_request: PullRequest,
    pub previous_from_hash: CommitHash,
}

impl Validate for SourceBranchUpdatedEvent {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.actor.validate(&field_path(path, "actor"), violations);
        self.pull_request
            .validate(&field_path(path, "pullRequest"), violations);
        self.previous_from_hash
            .validate(&field_path(path, "previousFromHash"), violations);
    }
}

/// Closed set of Bitbucket Server events, discriminated by [`EVENT_KEY_FIELD`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventKey")]
pub enum BitbucketServerEvent {
    #[serde(rename = "repo:refs_changed")]
    Push(PushEvent),
    #[serde(rename = "pr:from_ref_updated")]
    SourceBranchUpdated(SourceBranchUpdatedEvent),
    #[serde(rename = "pr:opened")]
    PullRequestOpened(PullRequestEvent),
    #[serde(rename = "pr:merged")]
    PullRequestMerged(PullRequestEvent),
}

impl BitbucketServerEvent {
    pub fn kind(&self) -> BitbucketServerEventKind {
        match self {
            Self::Push(_) => BitbucketServerEventKind::RepoRefsChanged,
            Self::SourceBranchUpdated(_) => BitbucketServerEventKind::PrFromRefUpdated,
            Self::PullRequestOpened(_) => BitbucketServerEventKind::PrOpened,
            Self::PullRequestMerged(_) => BitbucketServerEventKind::PrMerged,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Push(_) => "Push",
            Self::SourceBranchUpdated(_) => "SourceBranchUpdated",
            Self::PullRequestOpened(_) => "PullRequestOpened",
            Self::PullRequestMerged(_) => "PullRequestMerged",
        }
    }

    pub fn actor(&self) -> &User {
        match self {
            Self::Push(event) => &event.actor,
            Self::SourceBranchUpdated(event) => &event.actor,
            Self::PullRequestOpened(event) | Self::PullRequestMerged(event) => &event.actor,
        }
    }

    /// Repository routing decisions are made against
    ///
    /// Pushes resolve through the top-level repository; pull request events
    /// resolve through the target ref's repository.
    pub fn repository(&self) -> &Repository {
        match self {
            Self::Push(event) => &event.repository,
            Self::SourceBranchUpdated(event) => &event.pull_request.to_ref.repository,
            Self::PullRequestOpened(event) | Self::PullRequestMerged(event) => {
                &event.pull_request.to_ref.repository
            }
        }
    }

    pub fn project_key(&self) -> &str {
        &self.repository().project.key
    }
}

impl Validate for BitbucketServerEvent {
    fn validate(&self, path: &str, violations: &mut Violations) {
        match self {
            Self::Push(event) => event.validate(path, violations),
            Self::SourceBranchUpdated(event) => event.validate(path, violations),
            Self::PullRequestOpened(event) | Self::PullRequestMerged(event) => {
                event.validate(path, violations)
            }
        }
    }
}

/// A parsed Bitbucket Server delivery: headers plus the typed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitbucketServerWebhookEvent {
    pub headers: BitbucketServerHeaders,
    pub event: BitbucketServerEvent,
}

impl WebhookEvent for BitbucketServerWebhookEvent {
    fn source_type(&self) -> SourceType {
        SourceType::BitbucketServer
    }

    fn event_kind(&self) -> &'static str {
        self.event.kind().as_str()
    }

    fn variant_name(&self) -> &'static str {
        self.event.variant_name()
    }

    fn signature_hash_sha256(&self) -> &str {
        &self.headers.signature
    }

    fn project_or_organization_key(&self) -> &str {
        self.event.project_key()
    }

    fn repository_name(&self) -> &str {
        &self.event.repository().name
    }
}
