//! GitHub webhook headers and event variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::types::{
    hook_name_violation, Commit, Hook, Organization, PullRequest, Pusher, Repository, User,
};
use crate::event::{SourceType, WebhookEvent, WebhookHeaders};
use crate::types::{
    check_format, field_path, CommitHash, EmailAddress, FieldFormat, GitUrl, HttpsUrl,
    RawFormats, Validate, Violations,
};
use crate::ValidationError;

/// Header carrying the GitHub event name
pub const EVENT_HEADER: &str = "X-GitHub-Event";

/// Header only sent by GitHub Enterprise Server
pub const ENTERPRISE_VERSION_HEADER: &str = "X-GitHub-Enterprise-Version";

/// Field carrying the event kind discriminant in a serialized event
pub const EVENT_KIND_FIELD: &str = "event_kind";

const REQUIRED_HEADERS: [&str; 5] = [
    "X-GitHub-Hook-ID",
    EVENT_HEADER,
    "X-GitHub-Delivery",
    "X-Hub-Signature",
    "X-Hub-Signature-256",
];

// ============================================================================
// Headers
// ============================================================================

/// Headers GitHub sends with every webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubHeaders {
    pub hook_id: String,
    pub event: String,
    pub delivery: String,
    pub signature: String,
    pub signature_256: String,

    /// Every other header received with the request
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl GithubHeaders {
    /// Validate and extract the GitHub header set
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

        let value = |name: &str| headers.get(name).unwrap_or_default().to_string();
        let extra = headers
            .iter()
            .filter(|(name, _)| {
                !REQUIRED_HEADERS
                    .iter()
                    .any(|required| required.eq_ignore_ascii_case(name))
            })
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        Ok(Self {
            hook_id: value("X-GitHub-Hook-ID"),
            event: value(EVENT_HEADER),
            delivery: value("X-GitHub-Delivery"),
            signature: value("X-Hub-Signature"),
            signature_256: value("X-Hub-Signature-256"),
            extra,
        })
    }
}

// ============================================================================
// Event kinds
// ============================================================================

/// Closed set of GitHub event kinds understood by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GithubEventKind {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "pull_request.opened")]
    PullRequestOpened,
    #[serde(rename = "pull_request.closed")]
    PullRequestClosed,
    #[serde(rename = "pull_request.synchronize")]
    PullRequestSynchronize,
}

impl GithubEventKind {
    pub const ALL: [GithubEventKind; 5] = [
        Self::Ping,
        Self::Push,
        Self::PullRequestOpened,
        Self::PullRequestClosed,
        Self::PullRequestSynchronize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Push => "push",
            Self::PullRequestOpened => "pull_request.opened",
            Self::PullRequestClosed => "pull_request.closed",
            Self::PullRequestSynchronize => "pull_request.synchronize",
        }
    }
}

impl fmt::Display for GithubEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GithubEventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "event_kind".to_string(),
                message: format!("unknown GitHub event kind '{}'", s),
            })
    }
}

/// Build the event kind discriminant from the event header and body action
///
/// GitHub encodes the kind across two fields: `pull_request` in the header
/// plus `opened` in the body becomes `pull_request.opened`.
pub fn event_kind_discriminant(header_event: &str, action: Option<&str>) -> String {
    match action {
        Some(action) => format!("{}.{}", header_event, action),
        None => header_event.to_string(),
    }
}

// ============================================================================
// Raw payload formats
// ============================================================================

const fn field(pattern: &'static str, check: crate::types::FormatCheck) -> FieldFormat {
    FieldFormat { pattern, check }
}

fn check_hook_name(value: &Value, path: &str, violations: &mut Violations) {
    if let Some(message) = value.as_str().and_then(hook_name_violation) {
        violations.push(path, message);
    }
}

/// Format checks applied to a GitHub body that does not decode
pub const RAW_FORMATS: RawFormats = RawFormats {
    fields: &[
        field("before", check_format::<CommitHash>),
        field("after", check_format::<CommitHash>),
        field("compare", check_format::<HttpsUrl>),
        field("commits[].id", check_format::<CommitHash>),
        field("commits[].tree_id", check_format::<CommitHash>),
        field("commits[].author.email", check_format::<EmailAddress>),
        field("commits[].committer.email", check_format::<EmailAddress>),
        field("head_commit.id", check_format::<CommitHash>),
        field("head_commit.tree_id", check_format::<CommitHash>),
        field("head_commit.author.email", check_format::<EmailAddress>),
        field("head_commit.committer.email", check_format::<EmailAddress>),
        field("pusher.email", check_format::<EmailAddress>),
        field("pull_request.head.sha", check_format::<CommitHash>),
        field("pull_request.base.sha", check_format::<CommitHash>),
        field("pull_request.merge_commit_sha", check_format::<CommitHash>),
        field("hook.name", check_hook_name),
        field("**.url", check_format::<HttpsUrl>),
        field("**.html_url", check_format::<HttpsUrl>),
        field("**.avatar_url", check_format::<HttpsUrl>),
        field("**.clone_url", check_format::<HttpsUrl>),
        field("**.git_url", check_format::<GitUrl>),
    ],
    opaque: &["config"],
};

// ============================================================================
// Event payloads
// ============================================================================

/// Sent when a webhook is first configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingEvent {
    pub zen: String,
    pub hook_id: u64,
    pub hook: Hook,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub organization: Option<Organization>,
    #[serde(default)]
    pub sender: Option<User>,
}

impl Validate for PingEvent {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.hook.validate(&field_path(path, "hook"), violations);
        self.repository
            .validate(&field_path(path, "repository"), violations);
        self.organization
            .validate(&field_path(path, "organization"), violations);
        self.sender.validate(&field_path(path, "sender"), violations);
    }
}

/// One or more commits pushed to a ref
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub before: CommitHash,
    pub after: CommitHash,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub base_ref: Option<String>,
    pub compare: HttpsUrl,
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub head_commit: Option<Commit>,
    pub repository: Repository,
    pub pusher: Pusher,
    #[serde(default)]
    pub organization: Option<Organization>,
    pub sender: User,
}

impl Validate for PushEvent {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.before.validate(&field_path(path, "before"), violations);
        self.after.validate(&field_path(path, "after"), violations);
        self.compare.validate(&field_path(path, "compare"), violations);
        self.commits.validate(&field_path(path, "commits"), violations);
        self.head_commit
            .validate(&field_path(path, "head_commit"), violations);
        self.repository
            .validate(&field_path(path, "repository"), violations);
        self.pusher.validate(&field_path(path, "pusher"), violations);
        self.organization
            .validate(&field_path(path, "organization"), violations);
        self.sender.validate(&field_path(path, "sender"), violations);
    }
}

/// Activity on a pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequest,
    pub repository: Repository,
    #[serde(default)]
    pub organization: Option<Organization>,
    pub sender: User,
}

impl Validate for PullRequestEvent {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.pull_request
            .validate(&field_path(path, "pull_request"), violations);
        self.repository
            .validate(&field_path(path, "repository"), violations);
        self.organization
            .validate(&field_path(path, "organization"), violations);
        self.sender.validate(&field_path(path, "sender"), violations);
    }
}

/// Closed set of GitHub events, discriminated by [`EVENT_KIND_FIELD`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_kind")]
pub enum GithubEvent {
    #[serde(rename = "ping")]
    Ping(PingEvent),
    #[serde(rename = "push")]
    Push(PushEvent),
    #[serde(rename = "pull_request.opened")]
    PullRequestOpened(PullRequestEvent),
    #[serde(rename = "pull_request.closed")]
    PullRequestClosed(PullRequestEvent),
    #[serde(rename = "pull_request.synchronize")]
    PullRequestSynchronize(PullRequestEvent),
}

impl GithubEvent {
    pub fn kind(&self) -> GithubEventKind {
        match self {
            Self::Ping(_) => GithubEventKind::Ping,
            Self::Push(_) => GithubEventKind::Push,
            Self::PullRequestOpened(_) => GithubEventKind::PullRequestOpened,
            Self::PullRequestClosed(_) => GithubEventKind::PullRequestClosed,
            Self::PullRequestSynchronize(_) => GithubEventKind::PullRequestSynchronize,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Ping(_) => "Ping",
            Self::Push(_) => "Push",
            Self::PullRequestOpened(_) => "PullRequestOpened",
            Self::PullRequestClosed(_) => "PullRequestClosed",
            Self::PullRequestSynchronize(_) => "PullRequestSynchronize",
        }
    }

    /// Repository the event concerns, absent only for organization-level pings
    pub fn repository(&self) -> Option<&Repository> {
        match self {
            Self::Ping(event) => event.repository.as_ref(),
            Self::Push(event) => Some(&event.repository),
            Self::PullRequestOpened(event)
            | Self::PullRequestClosed(event)
            | Self::PullRequestSynchronize(event) => Some(&event.repository),
        }
    }

    fn organization(&self) -> Option<&Organization> {
        match self {
            Self::Ping(event) => event.organization.as_ref(),
            Self::Push(event) => event.organization.as_ref(),
            Self::PullRequestOpened(event)
            | Self::PullRequestClosed(event)
            | Self::PullRequestSynchronize(event) => event.organization.as_ref(),
        }
    }

    /// Organization login, falling back to the repository owner
    pub fn organization_name(&self) -> &str {
        self.organization()
            .map(|org| org.login.as_str())
            .or_else(|| self.repository().map(|repo| repo.owner.login.as_str()))
            .unwrap_or_default()
    }
}

impl Validate for GithubEvent {
    fn validate(&self, path: &str, violations: &mut Violations) {
        match self {
            Self::Ping(event) => event.validate(path, violations),
            Self::Push(event) => event.validate(path, violations),
            Self::PullRequestOpened(event)
            | Self::PullRequestClosed(event)
            | Self::PullRequestSynchronize(event) => event.validate(path, violations),
        }
    }
}

/// A parsed GitHub delivery: headers plus the typed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubWebhookEvent {
    pub headers: GithubHeaders,
    pub event: GithubEvent,
}

impl WebhookEvent for GithubWebhookEvent {
    fn source_type(&self) -> SourceType {
        SourceType::Github
    }

    fn event_kind(&self) -> &'static str {
        self.event.kind().as_str()
    }

    fn variant_name(&self) -> &'static str {
        self.event.variant_name()
    }

    fn signature_hash_sha256(&self) -> &str {
        &self.headers.signature_256
    }

    fn project_or_organization_key(&self) -> &str {
        self.event.organization_name()
    }

    fn repository_name(&self) -> &str {
        self.event
            .repository()
            .map(|repo| repo.name.as_str())
            .unwrap_or_default()
    }
}
