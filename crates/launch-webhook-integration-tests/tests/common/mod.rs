//! Common test utilities for launch-webhook integration tests
//!
//! This module provides:
//! - Recording fakes for every collaborator trait
//! - Recorded request fixtures shared with the core crate
//! - Log capture for asserting on matcher messages

use async_trait::async_trait;
use bytes::Bytes;
use launch_webhook_core::destination::{
    AssumeRoleRequest, AssumedRoleCredentials, BuildTrigger, FunctionInvoker, PipelineTrigger,
    RoleAssumer, ServiceClientFactory,
};
use launch_webhook_core::signature::compute_signature;
use launch_webhook_core::transform::{CodeBuildVariable, CodePipelineVariable};
use launch_webhook_core::{
    CloudError, CloudServices, DispatchSettings, EventProcessor, RuleSet, SecretError,
    SecretReference, SecretStore, SecretValue, TransformRegistry,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

// ============================================================================
// Fixtures
// ============================================================================

pub fn data_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../launch-webhook-core/tests/data")
        .join(relative)
}

/// Headers and raw body bytes of a recorded request
pub fn request(relative: &str) -> (HashMap<String, String>, Vec<u8>) {
    let text = std::fs::read_to_string(data_path(relative)).expect("fixture should exist");
    let recorded: Value = serde_json::from_str(&text).expect("fixture should be valid JSON");

    let headers = recorded["headers"]
        .as_object()
        .expect("fixture should have headers")
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                value.as_str().expect("header should be a string").to_string(),
            )
        })
        .collect();
    let body = serde_json::to_vec(&recorded["body"]).expect("body should serialize");
    (headers, body)
}

/// A recorded request re-signed with `secret` in `header`
#[allow(dead_code)]
pub fn signed_request(
    relative: &str,
    header: &str,
    secret: &str,
) -> (HashMap<String, String>, Vec<u8>) {
    let (mut headers, body) = request(relative);
    let signature =
        compute_signature(&SecretValue::from(secret), &body).expect("HMAC accepts any key");
    headers.insert(header.to_string(), signature);
    (headers, body)
}

/// Processor over a rule file, with the given registry and collaborators
#[allow(dead_code)]
pub fn processor(
    rules: &str,
    registry: &TransformRegistry,
    cloud: &RecordingCloud,
    secrets: &RecordingSecretStore,
) -> EventProcessor {
    let rules = RuleSet::load_from_file(&data_path(rules))
        .expect("rules should load")
        .build(registry, &cloud.services())
        .expect("rules should build");
    EventProcessor::new(rules, Arc::new(secrets.clone()))
}

// ============================================================================
// Log capture
// ============================================================================

/// Collects formatted log output while installed as the thread default
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contains(&self, needle: &str) -> bool {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer).contains(needle)
    }
}

pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl std::io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

// ============================================================================
// Recording secret store
// ============================================================================

/// Secret store fake that records every lookup
#[derive(Clone, Default)]
pub struct RecordingSecretStore {
    secrets: Arc<Mutex<HashMap<String, String>>>,
    lookups: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl RecordingSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, reference: &str, value: &str) -> Self {
        self.secrets
            .lock()
            .unwrap()
            .insert(reference.to_string(), value.to_string());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretStore for RecordingSecretStore {
    async fn get_secret(&self, reference: &SecretReference) -> Result<SecretValue, SecretError> {
        self.lookups.lock().unwrap().push(reference.to_string());
        self.secrets
            .lock()
            .unwrap()
            .get(reference.as_str())
            .map(|value| SecretValue::from(value.as_str()))
            .ok_or_else(|| SecretError::NotFound {
                reference: reference.to_string(),
            })
    }
}

// ============================================================================
// Recording cloud
// ============================================================================

/// A call made against the fake cloud
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AssumeRole(AssumeRoleRequest),
    StartBuild {
        project_name: String,
        region: Option<String>,
        variables: Vec<CodeBuildVariable>,
    },
    StartPipeline {
        pipeline_name: String,
        region: Option<String>,
        variables: Option<Vec<CodePipelineVariable>>,
    },
    Invoke {
        function_name: String,
        region: Option<String>,
        payload: Bytes,
    },
}

/// Fake STS and service clients that record every call
#[derive(Clone, Default)]
pub struct RecordingCloud {
    calls: Arc<Mutex<Vec<Call>>>,
    failing_targets: Arc<Mutex<HashSet<String>>>,
}

#[allow(dead_code)]
impl RecordingCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call against the named project, pipeline or function fail
    pub fn fail_target(&self, name: &str) {
        self.failing_targets
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub fn services(&self) -> CloudServices {
        CloudServices::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            DispatchSettings::default(),
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Build, pipeline and function calls only
    pub fn dispatches(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::AssumeRole(_)))
            .collect()
    }

    fn record(&self, call: Call, target: &str, service: &str) -> Result<(), CloudError> {
        self.calls.lock().unwrap().push(call);
        if self.failing_targets.lock().unwrap().contains(target) {
            return Err(CloudError::new(service, "simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl RoleAssumer for RecordingCloud {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedRoleCredentials, CloudError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::AssumeRole(request.clone()));
        Ok(AssumedRoleCredentials {
            access_key_id: SecretValue::from("ASIAINTEGRATION"),
            secret_access_key: SecretValue::from("secret-access-key"),
            session_token: SecretValue::from("session-token"),
        })
    }
}

#[async_trait]
impl ServiceClientFactory for RecordingCloud {
    async fn build_trigger(
        &self,
        _credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn BuildTrigger>, CloudError> {
        Ok(Arc::new(RegionalClient::new(self, region)))
    }

    async fn pipeline_trigger(
        &self,
        _credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn PipelineTrigger>, CloudError> {
        Ok(Arc::new(RegionalClient::new(self, region)))
    }

    async fn function_invoker(
        &self,
        _credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn FunctionInvoker>, CloudError> {
        Ok(Arc::new(RegionalClient::new(self, region)))
    }
}

struct RegionalClient {
    cloud: RecordingCloud,
    region: Option<String>,
}

impl RegionalClient {
    fn new(cloud: &RecordingCloud, region: Option<&str>) -> Self {
        Self {
            cloud: cloud.clone(),
            region: region.map(str::to_string),
        }
    }
}

#[async_trait]
impl BuildTrigger for RegionalClient {
    async fn start_build(
        &self,
        project_name: &str,
        environment_variables: &[CodeBuildVariable],
    ) -> Result<(), CloudError> {
        self.cloud.record(
            Call::StartBuild {
                project_name: project_name.to_string(),
                region: self.region.clone(),
                variables: environment_variables.to_vec(),
            },
            project_name,
            "codebuild",
        )
    }
}

#[async_trait]
impl PipelineTrigger for RegionalClient {
    async fn start_pipeline(
        &self,
        pipeline_name: &str,
        variables: Option<&[CodePipelineVariable]>,
    ) -> Result<(), CloudError> {
        self.cloud.record(
            Call::StartPipeline {
                pipeline_name: pipeline_name.to_string(),
                region: self.region.clone(),
                variables: variables.map(<[CodePipelineVariable]>::to_vec),
            },
            pipeline_name,
            "codepipeline",
        )
    }
}

#[async_trait]
impl FunctionInvoker for RegionalClient {
    async fn invoke(&self, function_name: &str, payload: Bytes) -> Result<(), CloudError> {
        self.cloud.record(
            Call::Invoke {
                function_name: function_name.to_string(),
                region: self.region.clone(),
                payload,
            },
            function_name,
            "lambda",
        )
    }
}
