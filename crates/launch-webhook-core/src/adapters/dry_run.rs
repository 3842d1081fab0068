//! # Dry-Run Cloud
//!
//! Collaborators that log each cloud call and record it instead of calling out.
//! Role assumption always succeeds with placeholder credentials.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

use crate::destination::{
    AssumeRoleRequest, AssumedRoleCredentials, BuildTrigger, CloudError, CloudServices,
    DispatchSettings, FunctionInvoker, PipelineTrigger, RoleAssumer, ServiceClientFactory,
};
use crate::secrets::SecretValue;
use crate::transform::{CodeBuildVariable, CodePipelineVariable};

const PLACEHOLDER_ACCESS_KEY_ID: &str = "DRYRUNACCESSKEY";

/// A cloud call that would have been made
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum DryRunCall {
    AssumeRole {
        role_arn: String,
        session_name: String,
        external_id: Option<String>,
        duration_seconds: u32,
    },
    StartBuild {
        project_name: String,
        region: Option<String>,
        environment_variables: Vec<CodeBuildVariable>,
    },
    StartPipeline {
        pipeline_name: String,
        region: Option<String>,
        variables: Option<Vec<CodePipelineVariable>>,
    },
    Invoke {
        function_name: String,
        region: Option<String>,
        payload: Value,
    },
}

/// Logging stand-in for STS, CodeBuild, CodePipeline and Lambda
#[derive(Clone, Default)]
pub struct DryRunCloud {
    calls: Arc<Mutex<Vec<DryRunCall>>>,
}

impl DryRunCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Services for destinations that dispatch through this dry run
    pub fn services(&self, settings: DispatchSettings) -> CloudServices {
        CloudServices::new(Arc::new(self.clone()), Arc::new(self.clone()), settings)
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<DryRunCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: DryRunCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn scoped(&self, region: Option<&str>) -> DryRunClient {
        DryRunClient {
            cloud: self.clone(),
            region: region.map(str::to_string),
        }
    }
}

#[async_trait]
impl RoleAssumer for DryRunCloud {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedRoleCredentials, CloudError> {
        info!(
            role_arn = %request.role_arn,
            session_name = %request.session_name,
            duration_seconds = request.duration_seconds,
            "Dry run: would assume role"
        );
        self.record(DryRunCall::AssumeRole {
            role_arn: request.role_arn.to_string(),
            session_name: request.session_name.clone(),
            external_id: request.external_id.clone(),
            duration_seconds: request.duration_seconds,
        });

        Ok(AssumedRoleCredentials {
            access_key_id: SecretValue::from(PLACEHOLDER_ACCESS_KEY_ID),
            secret_access_key: SecretValue::from(""),
            session_token: SecretValue::from(""),
        })
    }
}

#[async_trait]
impl ServiceClientFactory for DryRunCloud {
    async fn build_trigger(
        &self,
        _credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn BuildTrigger>, CloudError> {
        Ok(Arc::new(self.scoped(region)))
    }

    async fn pipeline_trigger(
        &self,
        _credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn PipelineTrigger>, CloudError> {
        Ok(Arc::new(self.scoped(region)))
    }

    async fn function_invoker(
        &self,
        _credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn FunctionInvoker>, CloudError> {
        Ok(Arc::new(self.scoped(region)))
    }
}

/// Region-scoped client handed out by [`DryRunCloud`]
struct DryRunClient {
    cloud: DryRunCloud,
    region: Option<String>,
}

#[async_trait]
impl BuildTrigger for DryRunClient {
    async fn start_build(
        &self,
        project_name: &str,
        environment_variables: &[CodeBuildVariable],
    ) -> Result<(), CloudError> {
        info!(
            project_name,
            variables = environment_variables.len(),
            "Dry run: would start build"
        );
        self.cloud.record(DryRunCall::StartBuild {
            project_name: project_name.to_string(),
            region: self.region.clone(),
            environment_variables: environment_variables.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl PipelineTrigger for DryRunClient {
    async fn start_pipeline(
        &self,
        pipeline_name: &str,
        variables: Option<&[CodePipelineVariable]>,
    ) -> Result<(), CloudError> {
        info!(
            pipeline_name,
            variables = variables.map_or(0, <[CodePipelineVariable]>::len),
            "Dry run: would start pipeline execution"
        );
        self.cloud.record(DryRunCall::StartPipeline {
            pipeline_name: pipeline_name.to_string(),
            region: self.region.clone(),
            variables: variables.map(<[CodePipelineVariable]>::to_vec),
        });
        Ok(())
    }
}

#[async_trait]
impl FunctionInvoker for DryRunClient {
    async fn invoke(&self, function_name: &str, payload: Bytes) -> Result<(), CloudError> {
        info!(
            function_name,
            payload_bytes = payload.len(),
            "Dry run: would invoke function"
        );
        let payload = if payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&payload)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&payload).into_owned()))
        };
        self.cloud.record(DryRunCall::Invoke {
            function_name: function_name.to_string(),
            region: self.region.clone(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "dry_run_tests.rs"]
mod tests;
