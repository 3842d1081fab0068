//! # AWS Adapters
//!
//! Secrets Manager, STS, CodeBuild, CodePipeline and Lambda implementations of
//! the collaborator traits, built on the AWS SDK.
//!
//! Service clients are created from assumed-role credentials. The ambient
//! configuration (default credential chain and region) is used only for STS
//! and Secrets Manager.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::destination::{
    AssumeRoleRequest, AssumedRoleCredentials, BuildTrigger, CloudError, CloudServices,
    DispatchSettings, FunctionInvoker, PipelineTrigger, RoleAssumer, ServiceClientFactory,
};
use crate::secrets::{SecretError, SecretReference, SecretStore, SecretValue};
use crate::transform::{CodeBuildVariable, CodePipelineVariable};

const CREDENTIALS_PROVIDER_NAME: &str = "launch-webhook-assumed-role";

/// Load the ambient SDK configuration
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest()).load().await
}

/// Services backed by STS and the per-destination SDK clients
pub fn aws_services(config: &SdkConfig, settings: DispatchSettings) -> CloudServices {
    CloudServices::new(
        Arc::new(StsRoleAssumer::new(config)),
        Arc::new(AwsServiceClientFactory::new(config)),
        settings,
    )
}

fn sdk_error(service: &str, error: impl std::error::Error) -> CloudError {
    CloudError::new(
        service,
        aws_sdk_sts::error::DisplayErrorContext(error).to_string(),
    )
}

// ============================================================================
// Secrets Manager
// ============================================================================

/// Secret store backed by AWS Secrets Manager
///
/// References may be secret names or full ARNs.
#[derive(Debug, Clone)]
pub struct SecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerStore {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_secretsmanager::Client::new(config),
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    #[instrument(skip(self, reference), fields(reference = %reference))]
    async fn get_secret(&self, reference: &SecretReference) -> Result<SecretValue, SecretError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(reference.as_str())
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    SecretError::NotFound {
                        reference: reference.to_string(),
                    }
                } else {
                    SecretError::Backend {
                        message: aws_sdk_secretsmanager::error::DisplayErrorContext(
                            &service_error,
                        )
                        .to_string(),
                    }
                }
            })?;

        let value = output
            .secret_string()
            .ok_or_else(|| SecretError::NoStringValue {
                reference: reference.to_string(),
            })?;

        debug!("Retrieved secret");
        Ok(SecretValue::from(value))
    }
}

// ============================================================================
// STS
// ============================================================================

/// Role assumer backed by AWS STS
#[derive(Debug, Clone)]
pub struct StsRoleAssumer {
    client: aws_sdk_sts::Client,
}

impl StsRoleAssumer {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(config),
        }
    }
}

#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    #[instrument(skip(self, request), fields(role_arn = %request.role_arn))]
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedRoleCredentials, CloudError> {
        let duration = i32::try_from(request.duration_seconds)
            .map_err(|_| CloudError::new("sts", "session duration out of range"))?;

        let output = self
            .client
            .assume_role()
            .role_arn(request.role_arn.as_str())
            .role_session_name(&request.session_name)
            .duration_seconds(duration)
            .set_external_id(request.external_id.clone())
            .send()
            .await
            .map_err(|e| sdk_error("sts", e))?;

        let credentials = output
            .credentials()
            .ok_or_else(|| CloudError::new("sts", "AssumeRole returned no credentials"))?;

        Ok(AssumedRoleCredentials {
            access_key_id: SecretValue::from(credentials.access_key_id()),
            secret_access_key: SecretValue::from(credentials.secret_access_key()),
            session_token: SecretValue::from(credentials.session_token()),
        })
    }
}

// ============================================================================
// Service clients
// ============================================================================

/// Builds SDK clients scoped to assumed-role credentials
#[derive(Debug, Clone)]
pub struct AwsServiceClientFactory {
    base: SdkConfig,
}

impl AwsServiceClientFactory {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            base: config.clone(),
        }
    }

    fn credentials(credentials: &AssumedRoleCredentials) -> aws_sdk_codebuild::config::Credentials {
        aws_sdk_codebuild::config::Credentials::new(
            credentials.access_key_id.expose_secret(),
            credentials.secret_access_key.expose_secret(),
            Some(credentials.session_token.expose_secret().to_string()),
            None,
            CREDENTIALS_PROVIDER_NAME,
        )
    }

    fn region(&self, region: Option<&str>) -> Option<Region> {
        region
            .map(|r| Region::new(r.to_string()))
            .or_else(|| self.base.region().cloned())
    }
}

#[async_trait]
impl ServiceClientFactory for AwsServiceClientFactory {
    async fn build_trigger(
        &self,
        credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn BuildTrigger>, CloudError> {
        let config = aws_sdk_codebuild::config::Builder::from(&self.base)
            .credentials_provider(Self::credentials(credentials))
            .region(self.region(region))
            .build();
        Ok(Arc::new(CodeBuildTrigger {
            client: aws_sdk_codebuild::Client::from_conf(config),
        }))
    }

    async fn pipeline_trigger(
        &self,
        credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn PipelineTrigger>, CloudError> {
        let config = aws_sdk_codepipeline::config::Builder::from(&self.base)
            .credentials_provider(Self::credentials(credentials))
            .region(self.region(region))
            .build();
        Ok(Arc::new(CodePipelineTrigger {
            client: aws_sdk_codepipeline::Client::from_conf(config),
        }))
    }

    async fn function_invoker(
        &self,
        credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn FunctionInvoker>, CloudError> {
        let config = aws_sdk_lambda::config::Builder::from(&self.base)
            .credentials_provider(Self::credentials(credentials))
            .region(self.region(region))
            .build();
        Ok(Arc::new(LambdaInvoker {
            client: aws_sdk_lambda::Client::from_conf(config),
        }))
    }
}

struct CodeBuildTrigger {
    client: aws_sdk_codebuild::Client,
}

#[async_trait]
impl BuildTrigger for CodeBuildTrigger {
    async fn start_build(
        &self,
        project_name: &str,
        environment_variables: &[CodeBuildVariable],
    ) -> Result<(), CloudError> {
        use aws_sdk_codebuild::types::{EnvironmentVariable, EnvironmentVariableType};

        let variables = environment_variables
            .iter()
            .map(|variable| {
                EnvironmentVariable::builder()
                    .name(&variable.name)
                    .value(&variable.value)
                    .r#type(EnvironmentVariableType::from(variable.variable_type.as_str()))
                    .build()
                    .map_err(|e| sdk_error("codebuild", e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .start_build()
            .project_name(project_name)
            .set_environment_variables_override(Some(variables))
            .send()
            .await
            .map_err(|e| sdk_error("codebuild", e))?;

        debug!(
            build_id = output.build().and_then(|b| b.id()).unwrap_or_default(),
            "Started build"
        );
        Ok(())
    }
}

struct CodePipelineTrigger {
    client: aws_sdk_codepipeline::Client,
}

#[async_trait]
impl PipelineTrigger for CodePipelineTrigger {
    async fn start_pipeline(
        &self,
        pipeline_name: &str,
        variables: Option<&[CodePipelineVariable]>,
    ) -> Result<(), CloudError> {
        use aws_sdk_codepipeline::types::PipelineVariable;

        let variables = variables
            .map(|variables| {
                variables
                    .iter()
                    .map(|variable| {
                        PipelineVariable::builder()
                            .name(&variable.name)
                            .value(&variable.value)
                            .build()
                            .map_err(|e| sdk_error("codepipeline", e))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let output = self
            .client
            .start_pipeline_execution()
            .name(pipeline_name)
            .set_variables(variables)
            .send()
            .await
            .map_err(|e| sdk_error("codepipeline", e))?;

        debug!(
            execution_id = output.pipeline_execution_id().unwrap_or_default(),
            "Started pipeline execution"
        );
        Ok(())
    }
}

struct LambdaInvoker {
    client: aws_sdk_lambda::Client,
}

#[async_trait]
impl FunctionInvoker for LambdaInvoker {
    async fn invoke(&self, function_name: &str, payload: Bytes) -> Result<(), CloudError> {
        let output = self
            .client
            .invoke()
            .function_name(function_name)
            .payload(aws_sdk_lambda::primitives::Blob::new(payload.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("lambda", e))?;

        if let Some(function_error) = output.function_error() {
            return Err(CloudError::new("lambda", function_error));
        }

        debug!(status_code = output.status_code(), "Invoked function");
        Ok(())
    }
}
