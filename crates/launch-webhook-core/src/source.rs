//! Rule source specifications and matching.
//!
//! A [`SourceSpec`] decides whether a rule applies to an event. Matching checks,
//! in order: provider family, event kind, organization or project key, then the
//! repository include and exclude patterns. Every branch emits a debug event
//! whose message is the [`MatchOutcome`] text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::bitbucket_server::BitbucketServerEventKind;
use crate::event::{SourceType, WebhookEvent};
use crate::github::GithubEventKind;
use crate::secrets::SecretReference;
use crate::ErrorCategory;

// ============================================================================
// Configuration
// ============================================================================

/// Repository patterns as written in configuration: absent, one, or a list
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(
    untagged,
    expecting = "must be a list of patterns or strings that can become patterns"
)]
pub enum PatternList {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl PatternList {
    fn compile(self, field: &str) -> Result<Vec<Regex>, SourceConfigError> {
        let patterns = match self {
            Self::None => Vec::new(),
            Self::One(pattern) => vec![pattern],
            Self::Many(patterns) => patterns,
        };
        patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(&pattern).map_err(|e| SourceConfigError::InvalidPattern {
                    field: field.to_string(),
                    pattern,
                    message: e.to_string(),
                })
            })
            .collect()
    }
}

fn deserialize_patterns<'de, D>(deserializer: D) -> Result<PatternList, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<PatternList>::deserialize(deserializer)?.unwrap_or_default())
}

/// Raw GitHub source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubSourceConfig {
    pub organization: String,
    pub events: Vec<GithubEventKind>,
    #[serde(default, deserialize_with = "deserialize_patterns")]
    pub include_repositories: PatternList,
    #[serde(default, deserialize_with = "deserialize_patterns")]
    pub exclude_repositories: PatternList,
    #[serde(default)]
    pub verify_signature: bool,
    #[serde(default)]
    pub signature_secret: Option<SecretReference>,
}

/// Raw Bitbucket Server source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitbucketServerSourceConfig {
    pub project_key: String,
    pub events: Vec<BitbucketServerEventKind>,
    #[serde(default, deserialize_with = "deserialize_patterns")]
    pub include_repositories: PatternList,
    #[serde(default, deserialize_with = "deserialize_patterns")]
    pub exclude_repositories: PatternList,
    #[serde(default)]
    pub verify_signature: bool,
    #[serde(default)]
    pub signature_secret: Option<SecretReference>,
}

/// Source configuration, tagged by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Github(GithubSourceConfig),
    BitbucketServer(BitbucketServerSourceConfig),
}

/// Source configuration errors, raised at rule construction
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceConfigError {
    #[error("signature_secret must be set if verify_signature is True")]
    MissingSignatureSecret,

    #[error("{field}: '{pattern}' must be a list of patterns or strings that can become patterns: {message}")]
    InvalidPattern {
        field: String,
        pattern: String,
        message: String,
    },
}

impl SourceConfigError {
    pub fn error_category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

// ============================================================================
// Compiled filters
// ============================================================================

/// Signature requirement of a source
///
/// The secret reference is always present when verification is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureRequirement {
    NotRequired {
        signature_secret: Option<SecretReference>,
    },
    Required {
        signature_secret: SecretReference,
    },
}

impl SignatureRequirement {
    fn new(
        verify_signature: bool,
        signature_secret: Option<SecretReference>,
    ) -> Result<Self, SourceConfigError> {
        match (verify_signature, signature_secret) {
            (true, Some(signature_secret)) => Ok(Self::Required { signature_secret }),
            (true, None) => Err(SourceConfigError::MissingSignatureSecret),
            (false, signature_secret) => Ok(Self::NotRequired { signature_secret }),
        }
    }

    pub fn verify_signature(&self) -> bool {
        matches!(self, Self::Required { .. })
    }

    /// Secret to verify with, only when verification is required
    pub fn required_secret(&self) -> Option<&SecretReference> {
        match self {
            Self::Required { signature_secret } => Some(signature_secret),
            Self::NotRequired { .. } => None,
        }
    }
}

/// Compiled include and exclude repository-name patterns
///
/// Patterns are applied as unanchored searches, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RepositoryFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl RepositoryFilter {
    pub fn new(include: Vec<Regex>, exclude: Vec<Regex>) -> Self {
        Self { include, exclude }
    }

    pub fn include_patterns(&self) -> impl Iterator<Item = &str> {
        self.include.iter().map(Regex::as_str)
    }

    pub fn exclude_patterns(&self) -> impl Iterator<Item = &str> {
        self.exclude.iter().map(Regex::as_str)
    }

    /// Apply the filter; exclusion always wins over inclusion
    fn evaluate(&self, repository: &str) -> MatchOutcome {
        let mut included = false;
        if self.include.is_empty() {
            debug!("No source include patterns defined, this repository is included by default.");
            included = true;
        } else {
            for pattern in &self.include {
                if pattern.is_match(repository) {
                    debug!(
                        "Repository name {} matched source include pattern {}",
                        repository,
                        pattern.as_str()
                    );
                    included = true;
                } else {
                    debug!(
                        "Repository name {} did not match source include pattern {}",
                        repository,
                        pattern.as_str()
                    );
                }
            }
        }

        let mut excluded_by = None;
        for pattern in &self.exclude {
            if pattern.is_match(repository) {
                debug!(
                    "Repository name {} matched source exclude pattern {}",
                    repository,
                    pattern.as_str()
                );
                excluded_by.get_or_insert_with(|| pattern.as_str().to_string());
            }
        }

        match (included, excluded_by) {
            (_, Some(pattern)) => MatchOutcome::Excluded {
                repository: repository.to_string(),
                pattern,
            },
            (false, None) => MatchOutcome::NotIncluded {
                repository: repository.to_string(),
            },
            (true, None) => MatchOutcome::Matched,
        }
    }
}

// ============================================================================
// Match outcome
// ============================================================================

/// Result of evaluating a source against an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched,
    SourceMismatch {
        event: String,
        expected: String,
    },
    ActionMismatch {
        event_kind: String,
        accepted: Vec<String>,
    },
    OrganizationMismatch {
        actual: String,
        expected: String,
    },
    ProjectKeyMismatch {
        actual: String,
        expected: String,
    },
    NotIncluded {
        repository: String,
    },
    Excluded {
        repository: String,
        pattern: String,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matched => write!(f, "Event matched source"),
            Self::SourceMismatch { event, expected } => {
                write!(f, "Event source mismatch: {} is not a {}", event, expected)
            }
            Self::ActionMismatch {
                event_kind,
                accepted,
            } => {
                let accepted = accepted
                    .iter()
                    .map(|kind| format!("'{}'", kind))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "Event action mismatch: {} not in [{}]",
                    event_kind, accepted
                )
            }
            Self::OrganizationMismatch { actual, expected } => {
                write!(f, "Organization mismatch: {} != {}", actual, expected)
            }
            Self::ProjectKeyMismatch { actual, expected } => {
                write!(f, "Project key mismatch: {} != {}", actual, expected)
            }
            Self::NotIncluded { repository } => write!(
                f,
                "Repository name {} did not match any source include pattern",
                repository
            ),
            Self::Excluded {
                repository,
                pattern,
            } => write!(
                f,
                "Repository name {} matched source exclude pattern {}",
                repository, pattern
            ),
        }
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Matches GitHub events for one organization
#[derive(Debug, Clone)]
pub struct GithubSource {
    pub organization: String,
    pub events: Vec<GithubEventKind>,
    pub repositories: RepositoryFilter,
    pub signature: SignatureRequirement,
}

impl TryFrom<GithubSourceConfig> for GithubSource {
    type Error = SourceConfigError;

    fn try_from(config: GithubSourceConfig) -> Result<Self, Self::Error> {
        let signature =
            SignatureRequirement::new(config.verify_signature, config.signature_secret)?;
        Ok(Self {
            organization: config.organization,
            events: config.events,
            repositories: RepositoryFilter::new(
                config.include_repositories.compile("include_repositories")?,
                config.exclude_repositories.compile("exclude_repositories")?,
            ),
            signature,
        })
    }
}

/// Matches Bitbucket Server events for one project
#[derive(Debug, Clone)]
pub struct BitbucketServerSource {
    pub project_key: String,
    pub events: Vec<BitbucketServerEventKind>,
    pub repositories: RepositoryFilter,
    pub signature: SignatureRequirement,
}

impl TryFrom<BitbucketServerSourceConfig> for BitbucketServerSource {
    type Error = SourceConfigError;

    fn try_from(config: BitbucketServerSourceConfig) -> Result<Self, Self::Error> {
        let signature =
            SignatureRequirement::new(config.verify_signature, config.signature_secret)?;
        Ok(Self {
            project_key: config.project_key,
            events: config.events,
            repositories: RepositoryFilter::new(
                config.include_repositories.compile("include_repositories")?,
                config.exclude_repositories.compile("exclude_repositories")?,
            ),
            signature,
        })
    }
}

/// Per-rule source filter
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "SourceConfig")]
pub enum SourceSpec {
    Github(GithubSource),
    BitbucketServer(BitbucketServerSource),
}

impl TryFrom<SourceConfig> for SourceSpec {
    type Error = SourceConfigError;

    fn try_from(config: SourceConfig) -> Result<Self, Self::Error> {
        match config {
            SourceConfig::Github(config) => Ok(Self::Github(config.try_into()?)),
            SourceConfig::BitbucketServer(config) => Ok(Self::BitbucketServer(config.try_into()?)),
        }
    }
}

impl SourceSpec {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Github(_) => SourceType::Github,
            Self::BitbucketServer(_) => SourceType::BitbucketServer,
        }
    }

    fn expected_event_type(&self) -> &'static str {
        match self {
            Self::Github(_) => "GithubEvent",
            Self::BitbucketServer(_) => "BitbucketServerEvent",
        }
    }

    pub fn signature(&self) -> &SignatureRequirement {
        match self {
            Self::Github(source) => &source.signature,
            Self::BitbucketServer(source) => &source.signature,
        }
    }

    pub fn verify_signature(&self) -> bool {
        self.signature().verify_signature()
    }

    fn accepted_kinds(&self) -> Vec<&'static str> {
        match self {
            Self::Github(source) => source.events.iter().map(GithubEventKind::as_str).collect(),
            Self::BitbucketServer(source) => source
                .events
                .iter()
                .map(BitbucketServerEventKind::as_str)
                .collect(),
        }
    }

    fn repositories(&self) -> &RepositoryFilter {
        match self {
            Self::Github(source) => &source.repositories,
            Self::BitbucketServer(source) => &source.repositories,
        }
    }

    /// Evaluate the source against an event
    pub fn evaluate(&self, event: &impl WebhookEvent) -> MatchOutcome {
        if event.source_type() != self.source_type() {
            return mismatch(MatchOutcome::SourceMismatch {
                event: format!("{}::{}", event.source_type(), event.variant_name()),
                expected: self.expected_event_type().to_string(),
            });
        }

        let accepted = self.accepted_kinds();
        if !accepted.contains(&event.event_kind()) {
            return mismatch(MatchOutcome::ActionMismatch {
                event_kind: event.event_kind().to_string(),
                accepted: accepted.into_iter().map(str::to_string).collect(),
            });
        }

        let scope = event.project_or_organization_key();
        match self {
            Self::Github(source) if scope != source.organization => {
                return mismatch(MatchOutcome::OrganizationMismatch {
                    actual: scope.to_string(),
                    expected: source.organization.clone(),
                });
            }
            Self::BitbucketServer(source) if scope != source.project_key => {
                return mismatch(MatchOutcome::ProjectKeyMismatch {
                    actual: scope.to_string(),
                    expected: source.project_key.clone(),
                });
            }
            _ => {}
        }

        self.repositories().evaluate(event.repository_name())
    }

    /// Whether the source accepts the event
    pub fn matches(&self, event: &impl WebhookEvent) -> bool {
        self.evaluate(event).is_match()
    }
}

fn mismatch(outcome: MatchOutcome) -> MatchOutcome {
    debug!("{}", outcome);
    outcome
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
