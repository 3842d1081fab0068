//! Shared helpers for unit tests: fixtures, log capture and a recording cloud.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

use crate::destination::{
    AssumeRoleRequest, AssumedRoleCredentials, BuildTrigger, CloudError, CloudServices,
    DispatchSettings, FunctionInvoker, PipelineTrigger, RoleAssumer, ServiceClientFactory,
};
use crate::discriminator::normalize;
use crate::event::EventEnvelope;
use crate::secrets::SecretValue;
use crate::transform::{CodeBuildVariable, CodePipelineVariable};

pub fn data_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(relative)
}

/// Headers and raw body bytes of a recorded delivery under `tests/data`
pub fn fixture(relative: &str) -> (HashMap<String, String>, Vec<u8>) {
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

/// Headers and decoded body of a recorded delivery
pub fn fixture_json(relative: &str) -> (HashMap<String, String>, Value) {
    let (headers, body) = fixture(relative);
    let body = serde_json::from_slice(&body).expect("body should be valid JSON");
    (headers, body)
}

/// A recorded delivery normalized into an envelope
pub fn envelope(relative: &str) -> EventEnvelope {
    let (headers, body) = fixture_json(relative);
    normalize(&headers, body).expect("fixture should normalize")
}

/// Collects formatted log lines emitted while its guard is installed
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the thread default subscriber at debug level
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().expect("log buffer lock");
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }
}

pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("log buffer lock")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
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
// Recording cloud
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CloudCall {
    AssumeRole(AssumeRoleRequest),
    CreateClient {
        service: &'static str,
        region: Option<String>,
    },
    StartBuild {
        project_name: String,
        environment_variables: Vec<CodeBuildVariable>,
    },
    StartPipeline {
        pipeline_name: String,
        variables: Option<Vec<CodePipelineVariable>>,
    },
    Invoke {
        function_name: String,
        payload: Bytes,
    },
}

impl CloudCall {
    fn is_dispatch(&self) -> bool {
        matches!(
            self,
            Self::StartBuild { .. } | Self::StartPipeline { .. } | Self::Invoke { .. }
        )
    }
}

/// Fake role assumer and service clients that record every call
#[derive(Clone, Default)]
pub struct RecordingCloud {
    calls: Arc<Mutex<Vec<CloudCall>>>,
    fail_role_assumption: bool,
    fail_dispatch: bool,
}

impl RecordingCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_role_assumption() -> Self {
        Self {
            fail_role_assumption: true,
            ..Self::default()
        }
    }

    pub fn failing_dispatch() -> Self {
        Self {
            fail_dispatch: true,
            ..Self::default()
        }
    }

    pub fn services(&self) -> CloudServices {
        self.services_with(DispatchSettings::default())
    }

    pub fn services_with(&self, settings: DispatchSettings) -> CloudServices {
        CloudServices::new(Arc::new(self.clone()), Arc::new(self.clone()), settings)
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Build, pipeline and function calls only
    pub fn dispatches(&self) -> Vec<CloudCall> {
        self.calls()
            .into_iter()
            .filter(CloudCall::is_dispatch)
            .collect()
    }

    pub fn role_assumptions(&self) -> Vec<AssumeRoleRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                CloudCall::AssumeRole(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: CloudCall) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn dispatch_result(&self, service: &str) -> Result<(), CloudError> {
        if self.fail_dispatch {
            Err(CloudError::new(service, "simulated outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RoleAssumer for RecordingCloud {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedRoleCredentials, CloudError> {
        self.record(CloudCall::AssumeRole(request.clone()));
        if self.fail_role_assumption {
            return Err(CloudError::new("sts", "AccessDenied"));
        }
        Ok(AssumedRoleCredentials {
            access_key_id: SecretValue::from("ASIAEXAMPLE"),
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
        self.record(CloudCall::CreateClient {
            service: "codebuild",
            region: region.map(str::to_string),
        });
        Ok(Arc::new(self.clone()))
    }

    async fn pipeline_trigger(
        &self,
        _credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn PipelineTrigger>, CloudError> {
        self.record(CloudCall::CreateClient {
            service: "codepipeline",
            region: region.map(str::to_string),
        });
        Ok(Arc::new(self.clone()))
    }

    async fn function_invoker(
        &self,
        _credentials: &AssumedRoleCredentials,
        region: Option<&str>,
    ) -> Result<Arc<dyn FunctionInvoker>, CloudError> {
        self.record(CloudCall::CreateClient {
            service: "lambda",
            region: region.map(str::to_string),
        });
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BuildTrigger for RecordingCloud {
    async fn start_build(
        &self,
        project_name: &str,
        environment_variables: &[CodeBuildVariable],
    ) -> Result<(), CloudError> {
        self.record(CloudCall::StartBuild {
            project_name: project_name.to_string(),
            environment_variables: environment_variables.to_vec(),
        });
        self.dispatch_result("codebuild")
    }
}

#[async_trait]
impl PipelineTrigger for RecordingCloud {
    async fn start_pipeline(
        &self,
        pipeline_name: &str,
        variables: Option<&[CodePipelineVariable]>,
    ) -> Result<(), CloudError> {
        self.record(CloudCall::StartPipeline {
            pipeline_name: pipeline_name.to_string(),
            variables: variables.map(<[CodePipelineVariable]>::to_vec),
        });
        self.dispatch_result("codepipeline")
    }
}

#[async_trait]
impl FunctionInvoker for RecordingCloud {
    async fn invoke(&self, function_name: &str, payload: Bytes) -> Result<(), CloudError> {
        self.record(CloudCall::Invoke {
            function_name: function_name.to_string(),
            payload,
        });
        self.dispatch_result("lambda")
    }
}
