//! Routing rules and rule-set loading.
//!
//! Rules are declared in a JSON or YAML list. Each entry names a source filter,
//! an optional transform reference and a destination. Construction resolves the
//! transform through a [`TransformRegistry`] and compiles the source filter, so
//! every configuration error surfaces before the first event is processed.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::destination::{CloudServices, Destination, DestinationConfig};
use crate::event::WebhookEvent;
use crate::source::{MatchOutcome, SourceConfig, SourceConfigError, SourceSpec};
use crate::transform::{Transform, TransformError, TransformRegistry, DEFAULT_TRANSFORM};
use crate::ErrorCategory;

/// One rule as written in configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub source: SourceConfig,
    #[serde(default)]
    pub transform: Option<String>,
    pub destination: DestinationConfig,
}

/// A constructed routing rule
#[derive(Debug)]
pub struct Rule {
    name: String,
    source: SourceSpec,
    transform: Transform,
    destination: Destination,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        source: SourceSpec,
        transform: Transform,
        destination: Destination,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            transform,
            destination,
        }
    }

    /// Build a rule from configuration
    ///
    /// Unnamed rules are called `rule-<index>`. A rule without a transform
    /// reference uses [`DEFAULT_TRANSFORM`].
    ///
    /// # Errors
    ///
    /// - [`RuleConfigError::Source`] when the source filter is invalid
    /// - [`RuleConfigError::Transform`] when the transform reference does not resolve
    pub fn from_config(
        config: RuleConfig,
        index: usize,
        registry: &TransformRegistry,
        services: &CloudServices,
    ) -> Result<Self, RuleConfigError> {
        let name = config.name.unwrap_or_else(|| format!("rule-{}", index));

        let source =
            SourceSpec::try_from(config.source).map_err(|source| RuleConfigError::Source {
                rule: name.clone(),
                source,
            })?;

        let reference = config.transform.as_deref().unwrap_or(DEFAULT_TRANSFORM);
        let transform =
            registry
                .resolve(reference)
                .map_err(|source| RuleConfigError::Transform {
                    rule: name.clone(),
                    source,
                })?;

        debug!(
            rule = %name,
            source_type = %source.source_type(),
            transform = reference,
            destination = config.destination.kind_name(),
            "Constructed rule"
        );

        let destination = Destination::new(config.destination, services.clone());
        Ok(Self::new(name, source, transform, destination))
    }

    /// Replace the transform
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceSpec {
        &self.source
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Evaluate the rule's source against an event
    pub fn evaluate(&self, event: &impl WebhookEvent) -> MatchOutcome {
        self.source.evaluate(event)
    }
}

/// Ordered rule configuration loaded from a file or string
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<RuleConfig>,
}

impl RuleSet {
    pub fn new(rules: Vec<RuleConfig>) -> Self {
        Self { rules }
    }

    /// Load a rule set from a JSON or YAML file
    ///
    /// The format follows the file extension; other extensions are tried as
    /// JSON and then as YAML.
    ///
    /// # Errors
    ///
    /// - [`RuleConfigError::FileNotFound`] when the path does not exist
    /// - [`RuleConfigError::ParseError`] when the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self, RuleConfigError> {
        if !path.exists() {
            return Err(RuleConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|e| RuleConfigError::ParseError {
            message: format!("Failed to read file: {}", e),
        })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let rules = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&contents)?,
            "json" => Self::from_json_str(&contents)?,
            _ => serde_json::from_str(&contents)
                .or_else(|_| serde_yaml::from_str(&contents))
                .map_err(|e| RuleConfigError::ParseError {
                    message: format!("Failed to parse as JSON or YAML: {}", e),
                })?,
        };

        info!(path = %path.display(), rules = rules.len(), "Loaded rule set");
        Ok(rules)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, RuleConfigError> {
        serde_json::from_str(contents).map_err(|e| RuleConfigError::ParseError {
            message: format!("Invalid JSON: {}", e),
        })
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, RuleConfigError> {
        serde_yaml::from_str(contents).map_err(|e| RuleConfigError::ParseError {
            message: format!("Invalid YAML: {}", e),
        })
    }

    pub fn configs(&self) -> &[RuleConfig] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Construct every rule, failing on the first invalid one
    pub fn build(
        &self,
        registry: &TransformRegistry,
        services: &CloudServices,
    ) -> Result<Vec<Rule>, RuleConfigError> {
        self.rules
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, config)| Rule::from_config(config, index, registry, services))
            .collect()
    }
}

/// Rule configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleConfigError {
    #[error("Rule file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse rules: {message}")]
    ParseError { message: String },

    #[error("Rule '{rule}' has an invalid source: {source}")]
    Source {
        rule: String,
        source: SourceConfigError,
    },

    #[error("Rule '{rule}' has an invalid transform: {source}")]
    Transform {
        rule: String,
        source: TransformError,
    },
}

impl RuleConfigError {
    pub fn is_transient(&self) -> bool {
        false
    }

    pub fn error_category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

#[cfg(test)]
#[path = "rule_tests.rs"]
mod tests;
