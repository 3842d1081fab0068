//! Event transforms and the transform registry.
//!
//! A transform turns a matched event into the data a destination is invoked
//! with. Handlers declare their input form when they are built: *structured*
//! handlers receive the event as a JSON object, *typed* handlers receive the
//! [`ScmEvent`] itself. Either may return a plain mapping or a
//! [`TransformResult`].
//!
//! Rules reference transforms by `module.function` name; names resolve through
//! a [`TransformRegistry`] populated at startup.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::bitbucket_server::{
    BitbucketServerEvent, BitbucketServerWebhookEvent, SourceBranchUpdatedEvent,
};
use crate::event::{ScmEvent, WebhookEvent};
use crate::github::{GithubEvent, GithubWebhookEvent, PingEvent, PullRequestEvent, PushEvent};
use crate::ErrorCategory;

/// Registry module holding the built-in transforms
pub const BUILTIN_MODULE: &str = "builtin";

/// Reference of the transform used when a rule names none
pub const DEFAULT_TRANSFORM: &str = "builtin.identity";

// ============================================================================
// Transform results
// ============================================================================

/// Kind of CodeBuild environment variable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeBuildVariableType {
    #[default]
    Plaintext,
    ParameterStore,
    SecretsManager,
}

impl CodeBuildVariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::ParameterStore => "PARAMETER_STORE",
            Self::SecretsManager => "SECRETS_MANAGER",
        }
    }
}

/// Environment variable override for a CodeBuild start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeBuildVariable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub variable_type: CodeBuildVariableType,
}

impl CodeBuildVariable {
    pub fn plaintext(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            variable_type: CodeBuildVariableType::Plaintext,
        }
    }
}

/// Variable passed to a CodePipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodePipelineVariable {
    pub name: String,
    pub value: String,
}

/// Per-invocation overrides for a CodeBuild destination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeBuildOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_variables_override: Option<Vec<CodeBuildVariable>>,
}

/// Per-invocation overrides for a CodePipeline destination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodePipelineOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<CodePipelineVariable>>,
}

/// Per-invocation overrides for a Lambda destination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LambdaFunctionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,

    /// `Some(Value::Null)` when the override explicitly clears the payload
    #[serde(
        default,
        deserialize_with = "explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
}

fn explicit_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Output of a transform, keyed by destination kind
///
/// Keys other than the destination kinds are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codebuild: Option<CodeBuildOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codepipeline: Option<CodePipelineOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambdafunction: Option<LambdaFunctionOverride>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransformResult {
    /// Interpret a mapping returned by a handler
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::InvalidOutput`] when a destination-kind key holds
    /// an override of the wrong shape.
    pub fn from_mapping(mapping: Map<String, Value>) -> Result<Self, TransformError> {
        serde_json::from_value(Value::Object(mapping)).map_err(|e| TransformError::InvalidOutput {
            message: e.to_string(),
        })
    }
}

/// What a handler returned
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutput {
    Mapping(Map<String, Value>),
    Result(TransformResult),
}

impl TransformOutput {
    pub fn into_result(self) -> Result<TransformResult, TransformError> {
        match self {
            Self::Mapping(mapping) => TransformResult::from_mapping(mapping),
            Self::Result(result) => Ok(result),
        }
    }
}

impl From<Map<String, Value>> for TransformOutput {
    fn from(mapping: Map<String, Value>) -> Self {
        Self::Mapping(mapping)
    }
}

impl From<TransformResult> for TransformOutput {
    fn from(result: TransformResult) -> Self {
        Self::Result(result)
    }
}

// ============================================================================
// Variant narrowing
// ============================================================================

/// A payload type that typed handlers can narrow an [`ScmEvent`] down to
pub trait EventVariant: 'static {
    /// Type name used in mismatch errors
    const NAME: &'static str;

    fn from_event(event: &ScmEvent) -> Option<&Self>;
}

impl EventVariant for ScmEvent {
    const NAME: &'static str = "ScmEvent";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        Some(event)
    }
}

impl EventVariant for GithubWebhookEvent {
    const NAME: &'static str = "GithubEvent";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        match event {
            ScmEvent::Github(event) => Some(event),
            ScmEvent::BitbucketServer(_) => None,
        }
    }
}

impl EventVariant for BitbucketServerWebhookEvent {
    const NAME: &'static str = "BitbucketServerEvent";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        match event {
            ScmEvent::BitbucketServer(event) => Some(event),
            ScmEvent::Github(_) => None,
        }
    }
}

impl EventVariant for PingEvent {
    const NAME: &'static str = "github::Ping";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        match event {
            ScmEvent::Github(GithubWebhookEvent {
                event: GithubEvent::Ping(ping),
                ..
            }) => Some(ping),
            _ => None,
        }
    }
}

impl EventVariant for PushEvent {
    const NAME: &'static str = "github::Push";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        match event {
            ScmEvent::Github(GithubWebhookEvent {
                event: GithubEvent::Push(push),
                ..
            }) => Some(push),
            _ => None,
        }
    }
}

impl EventVariant for PullRequestEvent {
    const NAME: &'static str = "github::PullRequest";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        match event {
            ScmEvent::Github(GithubWebhookEvent {
                event:
                    GithubEvent::PullRequestOpened(pull_request)
                    | GithubEvent::PullRequestClosed(pull_request)
                    | GithubEvent::PullRequestSynchronize(pull_request),
                ..
            }) => Some(pull_request),
            _ => None,
        }
    }
}

impl EventVariant for crate::bitbucket_server::PushEvent {
    const NAME: &'static str = "bitbucket_server::Push";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        match event {
            ScmEvent::BitbucketServer(BitbucketServerWebhookEvent {
                event: BitbucketServerEvent::Push(push),
                ..
            }) => Some(push),
            _ => None,
        }
    }
}

impl EventVariant for crate::bitbucket_server::PullRequestEvent {
    const NAME: &'static str = "bitbucket_server::PullRequest";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        match event {
            ScmEvent::BitbucketServer(BitbucketServerWebhookEvent {
                event:
                    BitbucketServerEvent::PullRequestOpened(pull_request)
                    | BitbucketServerEvent::PullRequestMerged(pull_request),
                ..
            }) => Some(pull_request),
            _ => None,
        }
    }
}

impl EventVariant for SourceBranchUpdatedEvent {
    const NAME: &'static str = "bitbucket_server::SourceBranchUpdated";

    fn from_event(event: &ScmEvent) -> Option<&Self> {
        match event {
            ScmEvent::BitbucketServer(BitbucketServerWebhookEvent {
                event: BitbucketServerEvent::SourceBranchUpdated(updated),
                ..
            }) => Some(updated),
            _ => None,
        }
    }
}

// ============================================================================
// Transform
// ============================================================================

type StructuredHandler =
    dyn Fn(Map<String, Value>) -> Result<TransformOutput, TransformError> + Send + Sync;
type TypedHandler = dyn Fn(&ScmEvent) -> Result<TransformOutput, TransformError> + Send + Sync;

/// Input form a transform declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformInput {
    /// The event materialized as a JSON object
    Structured,
    /// The typed event, optionally narrowed to one variant
    Typed { variant: &'static str },
}

/// A handler mapping a matched event to destination input
#[derive(Clone)]
pub enum Transform {
    Structured(Arc<StructuredHandler>),
    Typed {
        variant: &'static str,
        handler: Arc<TypedHandler>,
    },
}

impl Transform {
    /// Handler receiving the event as a JSON object
    pub fn structured<F, O>(handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<O, TransformError> + Send + Sync + 'static,
        O: Into<TransformOutput> + 'static,
    {
        Self::Structured(Arc::new(
            move |event: Map<String, Value>| -> Result<TransformOutput, TransformError> {
                handler(event).map(Into::into)
            },
        ))
    }

    /// Handler receiving the typed event
    pub fn typed<F, O>(handler: F) -> Self
    where
        F: Fn(&ScmEvent) -> Result<O, TransformError> + Send + Sync + 'static,
        O: Into<TransformOutput> + 'static,
    {
        Self::typed_variant::<ScmEvent, _, _>(handler)
    }

    /// Handler accepting only one event variant
    ///
    /// Any other variant fails with [`TransformError::VariantMismatch`].
    pub fn typed_variant<V, F, O>(handler: F) -> Self
    where
        V: EventVariant,
        F: Fn(&V) -> Result<O, TransformError> + Send + Sync + 'static,
        O: Into<TransformOutput> + 'static,
    {
        Self::Typed {
            variant: V::NAME,
            handler: Arc::new(move |event: &ScmEvent| -> Result<TransformOutput, TransformError> {
                let narrowed = V::from_event(event).ok_or_else(|| TransformError::VariantMismatch {
                    expected: V::NAME,
                    actual: event.qualified_name(),
                })?;
                handler(narrowed).map(Into::into)
            }),
        }
    }

    /// Pass the structured event through unchanged
    pub fn identity() -> Self {
        Self::structured(|event: Map<String, Value>| Ok::<_, TransformError>(event))
    }

    pub fn input(&self) -> TransformInput {
        match self {
            Self::Structured(_) => TransformInput::Structured,
            Self::Typed { variant, .. } => TransformInput::Typed { variant: *variant },
        }
    }

    /// Run the handler against an event in the form it declared
    ///
    /// # Errors
    ///
    /// - [`TransformError::Serialization`] when the event cannot be materialized
    /// - [`TransformError::VariantMismatch`] when a narrowed handler gets another variant
    /// - [`TransformError::InvalidOutput`] when the returned mapping is malformed
    /// - any [`TransformError::Failed`] raised by the handler itself
    pub fn apply(&self, event: &ScmEvent) -> Result<TransformResult, TransformError> {
        let output = match self {
            Self::Structured(handler) => {
                let structured =
                    event
                        .to_structured()
                        .map_err(|e| TransformError::Serialization {
                            message: e.to_string(),
                        })?;
                handler(structured)?
            }
            Self::Typed { handler, .. } => handler(event)?,
        };
        output.into_result()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("input", &self.input())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Name to handler table used to resolve `module.function` references
#[derive(Clone, Default)]
pub struct TransformRegistry {
    modules: BTreeMap<String, HashMap<String, Transform>>,
}

impl TransformRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in transforms
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(BUILTIN_MODULE, "identity", Transform::identity());
        registry.insert(
            BUILTIN_MODULE,
            "codebuild_event_variables",
            Transform::typed(codebuild_event_variables),
        );
        registry
    }

    fn insert(&mut self, module: &str, function: &str, transform: Transform) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(function.to_string(), transform);
    }

    /// Register a handler under `module.function`
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::InvalidReference`] when the name has no module
    /// or function segment.
    pub fn register(&mut self, reference: &str, transform: Transform) -> Result<(), TransformError> {
        match reference.rsplit_once('.') {
            Some((module, function)) if !module.is_empty() && !function.is_empty() => {
                self.insert(module, function, transform);
                Ok(())
            }
            _ => Err(TransformError::InvalidReference {
                reference: reference.to_string(),
            }),
        }
    }

    /// Resolve a `module.function` reference
    ///
    /// # Errors
    ///
    /// - [`TransformError::ModuleNotFound`] when no handler is registered under the module
    /// - [`TransformError::FunctionNotFound`] when the module lacks the function
    /// - [`TransformError::NotCallable`] when the reference names a module only
    pub fn resolve(&self, reference: &str) -> Result<Transform, TransformError> {
        if self.modules.contains_key(reference) {
            return Err(TransformError::NotCallable {
                reference: reference.to_string(),
            });
        }

        let (module, function) =
            reference
                .rsplit_once('.')
                .ok_or_else(|| TransformError::ModuleNotFound {
                    module: reference.to_string(),
                })?;

        let functions = self
            .modules
            .get(module)
            .ok_or_else(|| TransformError::ModuleNotFound {
                module: module.to_string(),
            })?;

        if function.is_empty() {
            return Err(TransformError::NotCallable {
                reference: reference.to_string(),
            });
        }

        functions
            .get(function)
            .cloned()
            .ok_or_else(|| TransformError::FunctionNotFound {
                module: module.to_string(),
                function: function.to_string(),
            })
    }

    /// Registered references, sorted
    pub fn references(&self) -> Vec<String> {
        let mut references: Vec<String> = self
            .modules
            .iter()
            .flat_map(|(module, functions)| {
                functions
                    .keys()
                    .map(move |function| format!("{}.{}", module, function))
            })
            .collect();
        references.sort();
        references
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("references", &self.references())
            .finish()
    }
}

/// Built-in: expose the routing facts of an event as CodeBuild variables
fn codebuild_event_variables(event: &ScmEvent) -> Result<TransformResult, TransformError> {
    let variables = vec![
        CodeBuildVariable::plaintext("WEBHOOK_SOURCE", event.source_type().as_str()),
        CodeBuildVariable::plaintext("WEBHOOK_EVENT", event.event_kind()),
        CodeBuildVariable::plaintext("WEBHOOK_SCOPE", event.project_or_organization_key()),
        CodeBuildVariable::plaintext("WEBHOOK_REPOSITORY", event.repository_name()),
    ];
    Ok(TransformResult {
        codebuild: Some(CodeBuildOverride {
            project_name: None,
            environment_variables_override: Some(variables),
        }),
        ..TransformResult::default()
    })
}

// ============================================================================
// Errors
// ============================================================================

/// Transform construction and execution errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("Transform module '{module}' not found")]
    ModuleNotFound { module: String },

    #[error("Transform function '{function}' not found in module '{module}'")]
    FunctionNotFound { module: String, function: String },

    #[error("Transform reference '{reference}' does not name a callable")]
    NotCallable { reference: String },

    #[error("Transform reference '{reference}' must have the form 'module.function'")]
    InvalidReference { reference: String },

    #[error("Transform expects {expected} but received {actual}")]
    VariantMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("Event could not be materialized for transform: {message}")]
    Serialization { message: String },

    #[error("Transform returned an invalid result: {message}")]
    InvalidOutput { message: String },

    #[error("Transform failed: {message}")]
    Failed { message: String },
}

impl TransformError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Whether the error is raised while resolving a rule's transform
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ModuleNotFound { .. }
                | Self::FunctionNotFound { .. }
                | Self::NotCallable { .. }
                | Self::InvalidReference { .. }
        )
    }

    pub fn error_category(&self) -> ErrorCategory {
        if self.is_configuration() {
            ErrorCategory::Configuration
        } else {
            ErrorCategory::Permanent
        }
    }
}

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;
