//! Tests for the launch-webhook-cli library module.

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn data_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../launch-webhook-core/tests/data")
        .join(relative)
}

fn no_env(_: &str) -> Option<String> {
    None
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_cli_parsing() {
    let cli = Cli::try_parse_from([
        "launch-webhook",
        "--json-logs",
        "process",
        "--event",
        "pr.json",
        "--rules",
        "rules.yaml",
        "--secret",
        "github-secret=abc=def",
    ])
    .unwrap();

    assert!(cli.json_logs);
    match cli.command {
        Commands::Process {
            event,
            rules,
            secrets,
            dry_run,
            ..
        } => {
            assert_eq!(event, Some(PathBuf::from("pr.json")));
            assert_eq!(rules, Some(PathBuf::from("rules.yaml")));
            assert_eq!(
                secrets,
                vec![("github-secret".to_string(), "abc=def".to_string())]
            );
            assert!(!dry_run);
        }
        other => panic!("Expected Process command, got {:?}", other),
    }
}

#[test]
fn test_cli_rejects_event_with_headers() {
    let result = Cli::try_parse_from([
        "launch-webhook",
        "process",
        "--event",
        "pr.json",
        "--headers",
        "h.json",
        "--body",
        "b.json",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_cli_headers_require_body() {
    let result = Cli::try_parse_from(["launch-webhook", "process", "--headers", "h.json"]);
    assert!(result.is_err());
}

#[test]
fn test_cli_rejects_malformed_secret() {
    let result = Cli::try_parse_from([
        "launch-webhook",
        "process",
        "--event",
        "pr.json",
        "--secret",
        "no-separator",
    ]);
    assert!(result.is_err());
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn test_settings_defaults() {
    let settings = load_settings_with(None, no_env).unwrap();
    assert_eq!(settings.dispatch, DispatchSettings::default());
    assert_eq!(settings.dispatch.session_duration_seconds, 900);
}

#[test]
fn test_settings_file_and_session_environment() {
    let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
    writeln!(
        file,
        "rules: /etc/launch-webhook/rules.json\ndispatch:\n  session_name: from-file\n  session_duration_seconds: 1200"
    )
    .unwrap();

    let settings = load_settings_with(Some(file.path()), |name| {
        (name == "SESSION_NAME").then(|| "from-env".to_string())
    })
    .unwrap();

    assert_eq!(
        settings.rules,
        Some(PathBuf::from("/etc/launch-webhook/rules.json"))
    );
    assert_eq!(settings.dispatch.session_duration_seconds, 1200);
    assert_eq!(settings.dispatch.session_name, "from-env");
}

#[test]
fn test_settings_invalid_duration() {
    let err = load_settings_with(None, |name| {
        (name == "ASSUMED_ROLE_SESSION_DURATION_SECONDS").then(|| "soon".to_string())
    })
    .unwrap_err();

    assert!(matches!(err, ConfigError::Validation(_)));
    assert_eq!(CliError::from(err).exit_code(), 1);
}

#[test]
fn test_settings_missing_file() {
    let err = load_settings_with(Some(Path::new("/nonexistent/settings.yaml")), no_env)
        .unwrap_err();
    assert!(matches!(err, ConfigError::Settings(_)));
}

#[test]
fn test_rules_path_requires_a_source() {
    let settings = CliSettings::default();
    assert!(matches!(
        settings.rules_path(None),
        Err(ConfigError::MissingRequired { .. })
    ));
    assert_eq!(
        settings.rules_path(Some(PathBuf::from("r.json"))).unwrap(),
        PathBuf::from("r.json")
    );
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_discriminate_command() {
    let request = RecordedRequest::from_event_file(&data_path("github/pr_merged.json")).unwrap();

    let output = execute_discriminate_command(&request).unwrap();
    assert_eq!(output["source_type"], "github");
    assert_eq!(output["event_kind"], "pull_request.closed");
    assert_eq!(output["scope"], "example-org");
}

#[test]
fn test_discriminate_rejects_unknown_provider() {
    let request = RecordedRequest {
        headers: HashMap::from([("Accept".to_string(), "*/*".to_string())]),
        body: b"{}".to_vec(),
    };

    let err = execute_discriminate_command(&request).unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_validate_rules_command() {
    let output = execute_validate_rules_command(
        &data_path("rules/example_rules.json"),
        &CliSettings::default(),
    )
    .unwrap();

    assert_eq!(output["valid"], true);
    assert_eq!(output["rules"][0]["name"], "github-merged-pull-requests");
    assert_eq!(output["rules"][1]["destination"], "codebuild");
}

#[test]
fn test_validate_rules_reports_construction_failure() {
    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    write!(
        file,
        r#"[{{"source": {{"type": "github", "organization": "o", "events": ["push"]}},
             "transform": "builtin.missing",
             "destination": {{"type": "none"}}}}]"#
    )
    .unwrap();

    let err = execute_validate_rules_command(file.path(), &CliSettings::default()).unwrap_err();
    assert!(matches!(err, CliError::Rules(_)));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_process_command_dry_run() {
    let request = RecordedRequest::from_event_file(&data_path("github/pr_merged.json")).unwrap();

    let report = execute_process_command(
        &request,
        &data_path("rules/example_rules.json"),
        Vec::new(),
        true,
        &CliSettings::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.dispatched(), 1);

    let printed = serde_json::to_value(ProcessOutput {
        dry_run: logs_cloud_calls(true),
        report: &report,
    })
    .unwrap();
    assert_eq!(printed["dry_run"], true);
    assert_eq!(printed["rules"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_dry_run_marker_without_aws_support() {
    assert!(logs_cloud_calls(true));
    assert_eq!(logs_cloud_calls(false), !cfg!(feature = "aws"));
}

#[test]
fn test_event_file_errors() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"headers": {{"X-Event-Key": 7}}, "body": {{}}}}"#).unwrap();

    let err = RecordedRequest::from_event_file(file.path()).unwrap_err();
    assert!(matches!(err, CliError::InvalidInput { .. }));
    assert_eq!(err.exit_code(), 4);

    let err = RecordedRequest::from_event_file(Path::new("/nonexistent/event.json")).unwrap_err();
    assert!(matches!(err, CliError::Io(_)));
}
