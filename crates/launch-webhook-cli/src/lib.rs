//! # Launch-Webhook CLI
//!
//! Command-line interface driving the launch-webhook processor from files.
//!
//! This module provides CLI commands for:
//! - Processing a recorded webhook request against a rule set
//! - Validating a rule set
//! - Identifying the provider and event kind of a recorded request

use clap::{Parser, Subcommand};
use launch_webhook_core::adapters::{DryRunCloud, InMemorySecretStore};
use launch_webhook_core::{
    discriminate, normalize, CloudServices, DispatchSettings, EventProcessor, ProcessingReport,
    RuleConfigError, RuleSet, SecretStore, SecretValue, TransformRegistry, ValidationError,
    WebhookError, WebhookEvent, WebhookHeaders,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `--log-level` nor `RUST_LOG` is set
pub const DEFAULT_LOG_FILTER: &str = "launch_webhook_core=info,launch_webhook_cli=info";

/// Prefix of environment variables overriding settings, e.g. `LAUNCH_WEBHOOK__RULES`
pub const ENV_PREFIX: &str = "LAUNCH_WEBHOOK";

// ============================================================================
// CLI Structure
// ============================================================================

/// Launch-Webhook CLI - Route source-control webhooks to cloud automation
#[derive(Debug, Parser)]
#[command(name = "launch-webhook")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Route source-control webhooks to build, pipeline and function launches")]
pub struct Cli {
    /// Settings file path
    #[arg(short, long, env = "LAUNCH_WEBHOOK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `launch_webhook_core=trace`
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a recorded request through a rule set and print the report
    Process {
        /// Recorded request file holding `headers` and `body`
        #[arg(short, long, conflicts_with_all = ["headers", "body"])]
        event: Option<PathBuf>,

        /// JSON object of request headers
        #[arg(long, requires = "body")]
        headers: Option<PathBuf>,

        /// Raw request body
        #[arg(long, requires = "headers")]
        body: Option<PathBuf>,

        /// Rule set file (JSON or YAML)
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Signing secret as `reference=value`, may be repeated
        #[arg(long = "secret", value_parser = parse_secret)]
        secrets: Vec<(String, String)>,

        /// Log cloud calls instead of making them
        #[arg(long)]
        dry_run: bool,
    },

    /// Load and construct every rule in a rule set
    ValidateRules {
        /// Rule set file (JSON or YAML)
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },

    /// Print the provider and event kind of a recorded request
    Discriminate {
        /// Recorded request file holding `headers` and `body`
        #[arg(short, long)]
        event: PathBuf,
    },
}

fn parse_secret(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((reference, secret)) if !reference.trim().is_empty() => {
            Ok((reference.to_string(), secret.to_string()))
        }
        _ => Err(format!("expected reference=value, found '{}'", value)),
    }
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Rule configuration error: {0}")]
    Rules(#[from] RuleConfigError),

    #[error("Webhook rejected: {0}")]
    Webhook(#[from] WebhookError),

    #[error("{failed} of {total} rules failed")]
    RulesFailed { failed: usize, total: usize },

    #[error("Invalid input file {path}: {message}")]
    InvalidInput { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Rules(_) => 1,
            Self::Webhook(_) => 2,
            Self::RulesFailed { .. } => 3,
            Self::InvalidInput { .. } | Self::Io(_) => 4,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Invalid setting: {0}")]
    Validation(#[from] ValidationError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Failed to initialize logging: {message}")]
    Logging { message: String },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Settings merged from defaults, an optional file and the environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    /// Rule set used when a command does not name one
    pub rules: Option<PathBuf>,

    /// Role assumption settings shared by every destination
    pub dispatch: DispatchSettings,
}

impl CliSettings {
    fn rules_path(&self, explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        explicit
            .or_else(|| self.rules.clone())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "rules".to_string(),
            })
    }
}

/// Load settings
///
/// Sources are applied in order, later ones overriding earlier ones:
/// 1. built-in defaults (every field has a serde default)
/// 2. the settings file, when given
/// 3. `LAUNCH_WEBHOOK__*` environment variables, e.g. `LAUNCH_WEBHOOK__DISPATCH__SESSION_NAME`
/// 4. `ASSUMED_ROLE_SESSION_DURATION_SECONDS` and `SESSION_NAME`
pub fn load_settings(path: Option<&Path>) -> Result<CliSettings, ConfigError> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// [`load_settings`] with an explicit lookup for the session variables
pub fn load_settings_with<F>(path: Option<&Path>, lookup: F) -> Result<CliSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        info!(path = %path.display(), "Loading settings file");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let mut settings: CliSettings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    settings.dispatch = settings.dispatch.apply_environment(lookup)?;
    debug!(?settings, "Resolved settings");
    Ok(settings)
}

// ============================================================================
// Logging
// ============================================================================

/// Install the global subscriber, logging to stderr
pub fn initialize_logging(log_level: Option<&str>, json: bool) -> Result<(), ConfigError> {
    let filter = match log_level {
        Some(directive) => EnvFilter::try_new(directive).map_err(|e| ConfigError::Logging {
            message: e.to_string(),
        })?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| ConfigError::Logging {
        message: e.to_string(),
    })
}

// ============================================================================
// Input files
// ============================================================================

/// Headers and raw body of a recorded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Read a `{ "headers": {...}, "body": {...} }` file
    ///
    /// The body is re-encoded as compact JSON; signatures must be computed
    /// over that encoding.
    pub fn from_event_file(path: &Path) -> Result<Self, CliError> {
        let recorded: Value = read_json(path)?;
        let headers = header_map(path, &recorded["headers"])?;

        let body = match recorded.get("body") {
            Some(body) => serde_json::to_vec(body).map_err(|e| invalid(path, e))?,
            None => return Err(invalid(path, "missing 'body'")),
        };
        Ok(Self { headers, body })
    }

    /// Read a headers object file and an undecoded body file
    pub fn from_parts(headers: &Path, body: &Path) -> Result<Self, CliError> {
        let header_value: Value = read_json(headers)?;
        Ok(Self {
            headers: header_map(headers, &header_value)?,
            body: std::fs::read(body)?,
        })
    }
}

fn invalid(path: &Path, message: impl ToString) -> CliError {
    CliError::InvalidInput {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn read_json(path: &Path) -> Result<Value, CliError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| invalid(path, e))
}

fn header_map(path: &Path, value: &Value) -> Result<HashMap<String, String>, CliError> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid(path, "'headers' must be a JSON object"))?;

    object
        .iter()
        .map(|(name, value)| match value.as_str() {
            Some(text) => Ok((name.clone(), text.to_string())),
            None => Err(invalid(path, format!("header '{}' must be a string", name))),
        })
        .collect()
}

// ============================================================================
// Commands
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(cli.log_level.as_deref(), cli.json_logs)?;
    run(cli).await
}

/// Execute a parsed command line, printing results to stdout
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Process {
            event,
            headers,
            body,
            rules,
            secrets,
            dry_run,
        } => {
            let request = match (event, headers, body) {
                (Some(event), _, _) => RecordedRequest::from_event_file(&event)?,
                (None, Some(headers), Some(body)) => RecordedRequest::from_parts(&headers, &body)?,
                _ => {
                    return Err(ConfigError::MissingRequired {
                        key: "--event or --headers with --body".to_string(),
                    }
                    .into())
                }
            };
            let rules = settings.rules_path(rules)?;

            let report =
                execute_process_command(&request, &rules, secrets, dry_run, &settings).await?;
            print_json(&ProcessOutput {
                dry_run: logs_cloud_calls(dry_run),
                report: &report,
            })?;

            let failed = report.failures().count();
            if failed > 0 {
                return Err(CliError::RulesFailed {
                    failed,
                    total: report.rules.len(),
                });
            }
            Ok(())
        }
        Commands::ValidateRules { rules } => {
            let rules = settings.rules_path(rules)?;
            print_json(&execute_validate_rules_command(&rules, &settings)?)
        }
        Commands::Discriminate { event } => {
            let request = RecordedRequest::from_event_file(&event)?;
            print_json(&execute_discriminate_command(&request)?)
        }
    }
}

/// Report printed by the `process` command
#[derive(Debug, Serialize)]
pub struct ProcessOutput<'a> {
    /// Set when destinations only logged their cloud calls
    pub dry_run: bool,

    #[serde(flatten)]
    pub report: &'a ProcessingReport,
}

/// Whether `process` logs cloud calls instead of making them
///
/// Builds without the `aws` feature always do.
pub fn logs_cloud_calls(dry_run: bool) -> bool {
    dry_run || !cfg!(feature = "aws")
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{}", text);
    Ok(())
}

/// Process a request against the rule set in `rules`
pub async fn execute_process_command(
    request: &RecordedRequest,
    rules: &Path,
    secrets: Vec<(String, String)>,
    dry_run: bool,
    settings: &CliSettings,
) -> Result<ProcessingReport, CliError> {
    info!(rules = %rules.display(), dry_run, "Processing webhook request");

    let (services, secret_store) = collaborators(secrets, dry_run, settings).await;
    let rule_set = RuleSet::load_from_file(rules)?;
    let built = rule_set.build(&TransformRegistry::with_builtins(), &services)?;

    let processor = EventProcessor::new(built, secret_store);
    Ok(processor
        .process_raw_event(&request.headers, &request.body)
        .await?)
}

#[cfg(feature = "aws")]
async fn collaborators(
    secrets: Vec<(String, String)>,
    dry_run: bool,
    settings: &CliSettings,
) -> (CloudServices, Arc<dyn SecretStore>) {
    use launch_webhook_core::adapters::{aws_services, load_sdk_config, SecretsManagerStore};

    let sdk_config = load_sdk_config().await;
    let services = if dry_run {
        DryRunCloud::new().services(settings.dispatch.clone())
    } else {
        aws_services(&sdk_config, settings.dispatch.clone())
    };

    let secret_store: Arc<dyn SecretStore> = if secrets.is_empty() {
        Arc::new(SecretsManagerStore::new(&sdk_config))
    } else {
        Arc::new(memory_secrets(secrets))
    };
    (services, secret_store)
}

#[cfg(not(feature = "aws"))]
async fn collaborators(
    secrets: Vec<(String, String)>,
    dry_run: bool,
    settings: &CliSettings,
) -> (CloudServices, Arc<dyn SecretStore>) {
    if !dry_run {
        tracing::warn!("Built without AWS support; cloud calls will be logged only");
    }
    (
        DryRunCloud::new().services(settings.dispatch.clone()),
        Arc::new(memory_secrets(secrets)),
    )
}

fn memory_secrets(secrets: Vec<(String, String)>) -> InMemorySecretStore {
    secrets
        .into_iter()
        .map(|(reference, value)| (reference, SecretValue::from_string(value)))
        .collect()
}

/// Construct every rule and describe it
pub fn execute_validate_rules_command(
    rules: &Path,
    settings: &CliSettings,
) -> Result<Value, CliError> {
    let rule_set = RuleSet::load_from_file(rules)?;
    let services = DryRunCloud::new().services(settings.dispatch.clone());
    let built = rule_set.build(&TransformRegistry::with_builtins(), &services)?;

    info!(rules = built.len(), "Rule set is valid");
    Ok(json!({
        "valid": true,
        "rules": built
            .iter()
            .map(|rule| json!({
                "name": rule.name(),
                "source_type": rule.source().source_type(),
                "verify_signature": rule.source().verify_signature(),
                "destination": rule.destination().config().kind_name(),
            }))
            .collect::<Vec<_>>(),
    }))
}

/// Identify the provider and event of a request
pub fn execute_discriminate_command(request: &RecordedRequest) -> Result<Value, CliError> {
    let source_type =
        discriminate(&WebhookHeaders::from_map(&request.headers)).map_err(WebhookError::from)?;

    let body: Value = serde_json::from_slice(&request.body).map_err(|e| {
        WebhookError::MalformedPayload {
            message: e.to_string(),
        }
    })?;
    let envelope = normalize(&request.headers, body)?;

    Ok(json!({
        "source_type": source_type,
        "event_kind": envelope.event.event_kind(),
        "event": envelope.event.qualified_name(),
        "scope": envelope.event.project_or_organization_key(),
        "repository": envelope.event.repository_name(),
    }))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
