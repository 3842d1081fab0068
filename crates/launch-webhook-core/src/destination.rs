//! Cloud destinations and collaborator interfaces.
//!
//! A [`Destination`] starts unauthenticated. The first [`Destination::invoke`]
//! assumes the configured role and builds a kind-specific client, which is then
//! reused for the lifetime of the destination. Every invocation makes exactly
//! one external call, resolving each target field from the transform result's
//! kind-keyed override before falling back to the configured value.
//!
//! All external capabilities (role assumption, build, pipeline and function
//! invocation) are traits so that the AWS SDK adapters, the dry-run adapters
//! and test fakes are interchangeable.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::secrets::SecretValue;
use crate::transform::{CodeBuildVariable, CodePipelineVariable, TransformResult};
use crate::types::Arn;
use crate::{ErrorCategory, ValidationError};

/// Default lifetime of assumed-role sessions
pub const DEFAULT_SESSION_DURATION_SECONDS: u32 = 900;

/// Default role session name
pub const DEFAULT_SESSION_NAME: &str = "launch_webhook_aws";

/// Environment variable overriding the assumed-role session lifetime
pub const SESSION_DURATION_ENV: &str = "ASSUMED_ROLE_SESSION_DURATION_SECONDS";

/// Environment variable overriding the default role session name
pub const SESSION_NAME_ENV: &str = "SESSION_NAME";

// ============================================================================
// Settings
// ============================================================================

/// Process-wide settings applied to every role assumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub session_duration_seconds: u32,
    pub session_name: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            session_duration_seconds: DEFAULT_SESSION_DURATION_SECONDS,
            session_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }
}

impl DispatchSettings {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::default().apply_environment(|name| std::env::var(name).ok())
    }

    /// Overlay [`SESSION_DURATION_ENV`] and [`SESSION_NAME_ENV`] read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidFormat`] when the duration is not a
    /// positive integer.
    pub fn apply_environment<F>(mut self, lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(duration) = lookup(SESSION_DURATION_ENV) {
            self.session_duration_seconds = duration
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|seconds| *seconds > 0)
                .ok_or_else(|| ValidationError::InvalidFormat {
                    field: SESSION_DURATION_ENV.to_string(),
                    message: format!("'{}' is not a positive number of seconds", duration),
                })?;
        }
        if let Some(name) = lookup(SESSION_NAME_ENV).filter(|name| !name.trim().is_empty()) {
            self.session_name = name;
        }
        Ok(self)
    }
}

// ============================================================================
// Lambda payloads
// ============================================================================

/// Payload handed to a function invocation
///
/// Numbers and booleans are rejected when the payload is built.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum LambdaPayload {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    Json(Value),
}

impl TryFrom<Value> for LambdaPayload {
    type Error = DestinationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::Empty),
            Value::String(text) => Ok(Self::Text(text)),
            value @ (Value::Array(_) | Value::Object(_)) => Ok(Self::Json(value)),
            Value::Bool(_) => Err(DestinationError::UnsupportedPayloadType {
                type_name: "boolean",
            }),
            Value::Number(_) => Err(DestinationError::UnsupportedPayloadType {
                type_name: "number",
            }),
        }
    }
}

impl LambdaPayload {
    /// Encode the payload as the bytes sent to the function
    pub fn to_bytes(&self) -> Result<Bytes, DestinationError> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Self::Json(value) => encode_json(value).map(Bytes::from),
        }
    }
}

/// Convert a JSON payload value into function input bytes
///
/// `null` becomes empty, strings are sent as UTF-8, arrays and objects are JSON
/// encoded with `", "` and `": "` separators.
///
/// # Errors
///
/// Returns [`DestinationError::UnsupportedPayloadType`] for numbers and booleans.
pub fn convert_lambda_payload(value: &Value) -> Result<Bytes, DestinationError> {
    LambdaPayload::try_from(value.clone())?.to_bytes()
}

/// Emits `", "` between elements and `": "` after keys
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

fn encode_json(value: &Value) -> Result<Vec<u8>, DestinationError> {
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, SpacedFormatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| DestinationError::InvalidOverride {
            kind: "lambdafunction",
            message: e.to_string(),
        })?;
    Ok(buffer)
}

// ============================================================================
// Configuration
// ============================================================================

/// CodeBuild project start
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeBuildConfig {
    pub role_arn: Arn,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    pub project_name: String,
    #[serde(default)]
    pub environment_variables_override: Vec<CodeBuildVariable>,
}

/// CodePipeline execution start
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodePipelineConfig {
    pub role_arn: Arn,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    pub pipeline_name: String,
    #[serde(default)]
    pub variables: Vec<CodePipelineVariable>,
}

/// Lambda function invocation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LambdaFunctionConfig {
    pub role_arn: Arn,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    pub function_name: String,
    #[serde(default)]
    pub payload: LambdaPayload,
}

/// Role settings shared by every cloud destination kind
#[derive(Debug, Clone, Copy)]
struct RoleTarget<'a> {
    role_arn: &'a Arn,
    external_id: Option<&'a str>,
    region: Option<&'a str>,
    session_name: Option<&'a str>,
}

macro_rules! role_target {
    ($($config:ty),+) => {
        $(
            impl $config {
                fn role_target(&self) -> RoleTarget<'_> {
                    RoleTarget {
                        role_arn: &self.role_arn,
                        external_id: self.external_id.as_deref(),
                        region: self.region.as_deref(),
                        session_name: self.session_name.as_deref(),
                    }
                }
            }
        )+
    };
}

role_target!(CodeBuildConfig, CodePipelineConfig, LambdaFunctionConfig);

/// Destination configuration, tagged by `type`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationConfig {
    None,
    CodeBuild(CodeBuildConfig),
    CodePipeline(CodePipelineConfig),
    LambdaFunction(LambdaFunctionConfig),
}

impl DestinationConfig {
    /// Configuration and override key of this destination kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CodeBuild(_) => "codebuild",
            Self::CodePipeline(_) => "codepipeline",
            Self::LambdaFunction(_) => "lambdafunction",
        }
    }

    pub fn role_arn(&self) -> Option<&Arn> {
        match self {
            Self::None => None,
            Self::CodeBuild(config) => Some(&config.role_arn),
            Self::CodePipeline(config) => Some(&config.role_arn),
            Self::LambdaFunction(config) => Some(&config.role_arn),
        }
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Parameters of a role assumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: Arn,
    pub session_name: String,
    pub external_id: Option<String>,
    pub duration_seconds: u32,
}

/// Temporary credentials returned by a role assumption
#[derive(Debug, Clone)]
pub struct AssumedRoleCredentials {
    pub access_key_id: SecretValue,
    pub secret_access_key: SecretValue,
    pub session_token: SecretValue,
}

/// Exchanges a role ARN for temporary credentials
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedRoleCredentials, CloudError>;
}

/// Starts build projects
#[async_trait]
pub trait BuildTrigger: Send + Sync {
    async fn start_build(
        &self,
        project_name: &str,
        environment_variables: &[CodeBuildVariable],
    ) -> Result<(), CloudError>;
}

/// Starts pipeline executions
#[async_trait]
pub trait PipelineTrigger: Send + Sync {
    /// `variables` is `None` when the execution takes no variables
    async fn start_pipeline(
        &self,
        pipeline_name: &str,
        variables: Option<&[CodePipelineVariable]>,
    ) -> Result<(), CloudError>;
}

/// Invokes functions
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function_name: &str, payload: Bytes) -> Result<(), CloudError>;
}

/// Builds service clients scoped to assumed-role credentials and a region
#[async_trait]
pub trait ServiceClientFactory: Send + Sync {
    async fn build_trigger(
        &self,
        credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn BuildTrigger>, CloudError>;

    async fn pipeline_trigger(
        &self,
        credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn PipelineTrigger>, CloudError>;

    async fn function_invoker(
        &self,
        credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn FunctionInvoker>, CloudError>;
}

/// Collaborators shared by every destination of a rule set
#[derive(Clone)]
pub struct CloudServices {
    pub role_assumer: Arc<dyn RoleAssumer>,
    pub clients: Arc<dyn ServiceClientFactory>,
    pub settings: DispatchSettings,
}

impl CloudServices {
    pub fn new(
        role_assumer: Arc<dyn RoleAssumer>,
        clients: Arc<dyn ServiceClientFactory>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            role_assumer,
            clients,
            settings,
        }
    }
}

impl fmt::Debug for CloudServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudServices")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Destination
// ============================================================================

/// A rule's dispatch target with its lazily-authenticated client
///
/// Clients are never shared between destinations, even when role ARNs match.
pub struct Destination {
    config: DestinationConfig,
    services: CloudServices,
    build: OnceCell<Arc<dyn BuildTrigger>>,
    pipeline: OnceCell<Arc<dyn PipelineTrigger>>,
    function: OnceCell<Arc<dyn FunctionInvoker>>,
}

impl Destination {
    pub fn new(config: DestinationConfig, services: CloudServices) -> Self {
        Self {
            config,
            services,
            build: OnceCell::new(),
            pipeline: OnceCell::new(),
            function: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    /// Whether the role has been assumed and a client built
    pub fn is_authenticated(&self) -> bool {
        self.build.initialized() || self.pipeline.initialized() || self.function.initialized()
    }

    /// Dispatch a transform result
    ///
    /// # Errors
    ///
    /// - [`DestinationError::AssumeRole`] or [`DestinationError::Client`] on first use
    /// - [`DestinationError::UnsupportedPayloadType`] for a scalar lambda payload override
    /// - [`DestinationError::Invocation`] when the external call fails
    #[instrument(skip(self, transformed), fields(destination = self.config.kind_name()))]
    pub async fn invoke(&self, transformed: &TransformResult) -> Result<(), DestinationError> {
        match &self.config {
            DestinationConfig::None => {
                info!("No destination configured. No action taken.");
                return Ok(());
            }
            DestinationConfig::CodeBuild(config) => {
                let overrides = transformed.codebuild.as_ref();
                let project_name = overrides
                    .and_then(|o| o.project_name.as_deref())
                    .unwrap_or(&config.project_name);
                let variables = overrides
                    .and_then(|o| o.environment_variables_override.as_deref())
                    .unwrap_or(&config.environment_variables_override);

                let client = self
                    .build
                    .get_or_try_init(|| async {
                        let target = config.role_target();
                        let credentials = self.assume_role(target).await?;
                        self.services
                            .clients
                            .build_trigger(&credentials, target.region)
                            .await
                            .map_err(DestinationError::Client)
                    })
                    .await?;

                debug!(project_name, variables = variables.len(), "Starting build");
                client
                    .start_build(project_name, variables)
                    .await
                    .map_err(DestinationError::Invocation)?;
            }
            DestinationConfig::CodePipeline(config) => {
                let overrides = transformed.codepipeline.as_ref();
                let pipeline_name = overrides
                    .and_then(|o| o.pipeline_name.as_deref())
                    .unwrap_or(&config.pipeline_name);
                let variables = overrides
                    .and_then(|o| o.variables.as_deref())
                    .unwrap_or(&config.variables);
                let variables = (!variables.is_empty()).then_some(variables);

                let client = self
                    .pipeline
                    .get_or_try_init(|| async {
                        let target = config.role_target();
                        let credentials = self.assume_role(target).await?;
                        self.services
                            .clients
                            .pipeline_trigger(&credentials, target.region)
                            .await
                            .map_err(DestinationError::Client)
                    })
                    .await?;

                debug!(pipeline_name, "Starting pipeline execution");
                client
                    .start_pipeline(pipeline_name, variables)
                    .await
                    .map_err(DestinationError::Invocation)?;
            }
            DestinationConfig::LambdaFunction(config) => {
                let overrides = transformed.lambdafunction.as_ref();
                let function_name = overrides
                    .and_then(|o| o.function_name.as_deref())
                    .unwrap_or(&config.function_name);
                let payload = match overrides.and_then(|o| o.payload.as_ref()) {
                    Some(payload) => convert_lambda_payload(payload)?,
                    None => config.payload.to_bytes()?,
                };

                let client = self
                    .function
                    .get_or_try_init(|| async {
                        let target = config.role_target();
                        let credentials = self.assume_role(target).await?;
                        self.services
                            .clients
                            .function_invoker(&credentials, target.region)
                            .await
                            .map_err(DestinationError::Client)
                    })
                    .await?;

                debug!(function_name, payload_bytes = payload.len(), "Invoking function");
                client
                    .invoke(function_name, payload)
                    .await
                    .map_err(DestinationError::Invocation)?;
            }
        }

        info!("Invoked destination successfully");
        Ok(())
    }

    async fn assume_role(
        &self,
        target: RoleTarget<'_>,
    ) -> Result<AssumedRoleCredentials, DestinationError> {
        let settings = &self.services.settings;
        let request = AssumeRoleRequest {
            role_arn: target.role_arn.clone(),
            session_name: target
                .session_name
                .unwrap_or(&settings.session_name)
                .to_string(),
            external_id: target.external_id.map(str::to_string),
            duration_seconds: settings.session_duration_seconds,
        };

        let credentials = self
            .services
            .role_assumer
            .assume_role(&request)
            .await
            .map_err(|source| DestinationError::AssumeRole {
                role_arn: request.role_arn.to_string(),
                source,
            })?;

        info!(session_name = %request.session_name, "Assumed role {}", request.role_arn);
        Ok(credentials)
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("config", &self.config)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by an external cloud capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{service}: {message}")]
pub struct CloudError {
    pub service: String,
    pub message: String,
}

impl CloudError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Destination construction and dispatch errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DestinationError {
    #[error("Failed to assume role {role_arn}: {source}")]
    AssumeRole { role_arn: String, source: CloudError },

    #[error("Failed to create service client: {0}")]
    Client(CloudError),

    #[error("Invalid {kind} override: {message}")]
    InvalidOverride { kind: &'static str, message: String },

    #[error("Unsupported payload type: {type_name}")]
    UnsupportedPayloadType { type_name: &'static str },

    #[error("Destination invocation failed: {0}")]
    Invocation(CloudError),
}

impl DestinationError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AssumeRole { .. } | Self::Client(_) | Self::Invocation(_)
        )
    }

    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::AssumeRole { .. } => ErrorCategory::Security,
            Self::Client(_) | Self::Invocation(_) => ErrorCategory::Transient,
            Self::InvalidOverride { .. } | Self::UnsupportedPayloadType { .. } => {
                ErrorCategory::Configuration
            }
        }
    }
}

#[cfg(test)]
#[path = "destination_tests.rs"]
mod tests;
