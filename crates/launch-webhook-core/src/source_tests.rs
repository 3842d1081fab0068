//! Tests for rule source matching.

use super::*;
use crate::test_support::{envelope, LogCapture};
use serde_json::json;

fn github_source(extra: serde_json::Value) -> SourceSpec {
    let mut config = json!({
        "type": "github",
        "organization": "example-org",
        "events": ["pull_request.opened"],
    });
    if let (Some(config), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        config.extend(extra.clone());
    }
    serde_json::from_value(config).unwrap()
}

fn bitbucket_source(extra: serde_json::Value) -> SourceSpec {
    let mut config = json!({
        "type": "bitbucket_server",
        "project_key": "DSO",
        "events": ["pr:merged"],
    });
    if let (Some(config), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        config.extend(extra.clone());
    }
    serde_json::from_value(config).unwrap()
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_source_config_defaults() {
    let source = github_source(json!({}));

    assert_eq!(source.source_type(), SourceType::Github);
    assert!(!source.verify_signature());
    assert!(source.signature().required_secret().is_none());
}

#[test]
fn test_verify_signature_requires_secret() {
    let result: Result<SourceSpec, _> = serde_json::from_value(json!({
        "type": "github",
        "organization": "example-org",
        "events": ["push"],
        "verify_signature": true,
    }));

    let err = result.unwrap_err().to_string();
    assert!(
        err.contains("signature_secret must be set if verify_signature is True"),
        "unexpected error: {}",
        err
    );
}

#[test]
fn test_secret_without_verification_is_kept_but_not_required() {
    let source = github_source(json!({
        "signature_secret": "github-webhook-secret",
    }));

    match source.signature() {
        SignatureRequirement::NotRequired { signature_secret } => {
            assert_eq!(
                signature_secret.as_ref().map(|s| s.as_str()),
                Some("github-webhook-secret")
            );
        }
        other => panic!("unexpected requirement: {:?}", other),
    }
    assert!(source.signature().required_secret().is_none());
}

#[test]
fn test_verified_source_exposes_secret() {
    let source = bitbucket_source(json!({
        "verify_signature": true,
        "signature_secret": "bitbucket-webhook-secret",
    }));

    assert!(source.verify_signature());
    assert_eq!(
        source.signature().required_secret().map(|s| s.as_str()),
        Some("bitbucket-webhook-secret")
    );
}

#[test]
fn test_unknown_event_kind_is_rejected() {
    let result: Result<SourceSpec, _> = serde_json::from_value(json!({
        "type": "github",
        "organization": "example-org",
        "events": ["issues.opened"],
    }));
    assert!(result.is_err());

    let result: Result<SourceSpec, _> = serde_json::from_value(json!({
        "type": "bitbucket_server",
        "project_key": "DSO",
        "events": ["pull_request.opened"],
    }));
    assert!(result.is_err());
}

#[test]
fn test_unknown_source_field_is_rejected() {
    let result: Result<SourceSpec, _> = serde_json::from_value(json!({
        "type": "github",
        "organization": "example-org",
        "events": ["push"],
        "project_key": "DSO",
    }));
    assert!(result.is_err());
}

#[test]
fn test_patterns_accept_string_list_or_null() {
    let single = github_source(json!({ "include_repositories": "^test-" }));
    let list = github_source(json!({ "include_repositories": ["^test-", "-app$"] }));
    let null = github_source(json!({ "include_repositories": null }));

    let patterns = |source: &SourceSpec| -> Vec<String> {
        match source {
            SourceSpec::Github(source) => source
                .repositories
                .include_patterns()
                .map(str::to_string)
                .collect(),
            SourceSpec::BitbucketServer(_) => unreachable!(),
        }
    };

    assert_eq!(patterns(&single), vec!["^test-"]);
    assert_eq!(patterns(&list), vec!["^test-", "-app$"]);
    assert!(patterns(&null).is_empty());
}

#[test]
fn test_invalid_pattern_is_rejected() {
    let result: Result<SourceSpec, _> = serde_json::from_value(json!({
        "type": "github",
        "organization": "example-org",
        "events": ["push"],
        "exclude_repositories": ["(unclosed"],
    }));

    let err = result.unwrap_err().to_string();
    assert!(err.contains("exclude_repositories"), "unexpected error: {}", err);
    assert!(err.contains("(unclosed"), "unexpected error: {}", err);

    let result: Result<SourceSpec, _> = serde_json::from_value(json!({
        "type": "github",
        "organization": "example-org",
        "events": ["push"],
        "include_repositories": [42],
    }));
    assert!(result.is_err());
}

// ============================================================================
// Matching
// ============================================================================

#[test]
fn test_github_source_matches_event() {
    let envelope = envelope("github/pr_open.json");
    let source = github_source(json!({}));

    assert_eq!(source.evaluate(&envelope.event), MatchOutcome::Matched);
    assert!(source.matches(&envelope.event));
}

#[test]
fn test_bitbucket_source_matches_event() {
    let envelope = envelope("bitbucket_server/pr_merged.json");
    let source = bitbucket_source(json!({}));

    assert!(source.matches(&envelope.event));
}

#[test]
fn test_source_type_mismatch() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let envelope = envelope("github/pr_open.json");
    let outcome = bitbucket_source(json!({})).evaluate(&envelope.event);

    assert!(matches!(outcome, MatchOutcome::SourceMismatch { .. }));
    assert_eq!(
        outcome.to_string(),
        "Event source mismatch: github::PullRequestOpened is not a BitbucketServerEvent"
    );
    assert!(logs.contains(
        "Event source mismatch: github::PullRequestOpened is not a BitbucketServerEvent"
    ));
}

#[test]
fn test_event_action_mismatch() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let envelope = envelope("github/pr_open.json");
    let source = github_source(json!({ "events": ["pull_request.closed"] }));
    let outcome = source.evaluate(&envelope.event);

    assert_eq!(
        outcome.to_string(),
        "Event action mismatch: pull_request.opened not in ['pull_request.closed']"
    );
    assert!(logs
        .contains("Event action mismatch: pull_request.opened not in ['pull_request.closed']"));
}

#[test]
fn test_action_mismatch_lists_every_accepted_kind() {
    let envelope = envelope("bitbucket_server/push.json");
    let source = bitbucket_source(json!({ "events": ["pr:opened", "pr:merged"] }));

    assert_eq!(
        source.evaluate(&envelope.event).to_string(),
        "Event action mismatch: repo:refs_changed not in ['pr:opened', 'pr:merged']"
    );
}

#[test]
fn test_organization_mismatch() {
    let envelope = envelope("github/pr_open.json");
    let source = github_source(json!({ "organization": "other-org" }));

    let outcome = source.evaluate(&envelope.event);
    assert_eq!(
        outcome,
        MatchOutcome::OrganizationMismatch {
            actual: "example-org".to_string(),
            expected: "other-org".to_string(),
        }
    );
    assert_eq!(
        outcome.to_string(),
        "Organization mismatch: example-org != other-org"
    );
}

#[test]
fn test_project_key_mismatch() {
    let envelope = envelope("bitbucket_server/pr_merged.json");
    let source = bitbucket_source(json!({ "project_key": "OPS" }));

    assert_eq!(
        source.evaluate(&envelope.event).to_string(),
        "Project key mismatch: DSO != OPS"
    );
}

#[test]
fn test_project_key_comparison_is_case_sensitive() {
    let envelope = envelope("bitbucket_server/pr_merged.json");
    let source = bitbucket_source(json!({ "project_key": "dso" }));

    assert!(!source.matches(&envelope.event));
}

// ============================================================================
// Repository filters
// ============================================================================

#[test]
fn test_no_include_patterns_includes_by_default() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let envelope = envelope("github/pr_open.json");
    assert!(github_source(json!({})).matches(&envelope.event));
    assert!(logs.contains(
        "No source include patterns defined, this repository is included by default."
    ));
}

#[test]
fn test_include_pattern_is_an_unanchored_search() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let envelope = envelope("github/pr_open.json");
    let source = github_source(json!({ "include_repositories": ["app"] }));

    assert!(source.matches(&envelope.event));
    assert!(logs.contains("Repository name test-app matched source include pattern app"));
}

#[test]
fn test_repository_not_included() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let envelope = envelope("github/pr_open.json");
    let source = github_source(json!({ "include_repositories": ["^service-", "^lib-"] }));

    let outcome = source.evaluate(&envelope.event);
    assert_eq!(
        outcome,
        MatchOutcome::NotIncluded {
            repository: "test-app".to_string()
        }
    );
    assert!(logs.contains("Repository name test-app did not match source include pattern ^service-"));
    assert!(logs.contains("Repository name test-app did not match source include pattern ^lib-"));
}

#[test]
fn test_exclusion_wins_over_inclusion() {
    let logs = LogCapture::new();
    let _guard = logs.install();

    let envelope = envelope("bitbucket_server/pr_merged.json");
    let source = bitbucket_source(json!({
        "include_repositories": ["^test-"],
        "exclude_repositories": ["-app$"],
    }));

    let outcome = source.evaluate(&envelope.event);
    assert_eq!(
        outcome,
        MatchOutcome::Excluded {
            repository: "test-app".to_string(),
            pattern: "-app$".to_string(),
        }
    );
    assert!(logs.contains("Repository name test-app matched source include pattern ^test-"));
    assert!(logs.contains("Repository name test-app matched source exclude pattern -app$"));
}

#[test]
fn test_exclusion_without_inclusion_patterns() {
    let envelope = envelope("bitbucket_server/push.json");
    let source = bitbucket_source(json!({
        "events": ["repo:refs_changed"],
        "exclude_repositories": "test",
    }));

    assert!(!source.matches(&envelope.event));
}

#[test]
fn test_non_matching_exclusion_keeps_event() {
    let envelope = envelope("bitbucket_server/push.json");
    let source = bitbucket_source(json!({
        "events": ["repo:refs_changed"],
        "exclude_repositories": ["^legacy-"],
    }));

    assert!(source.matches(&envelope.event));
}

#[test]
fn test_match_outcome_serialization() {
    let outcome = MatchOutcome::NotIncluded {
        repository: "test-app".to_string(),
    };
    let value = serde_json::to_value(&outcome).unwrap();

    assert_eq!(value["outcome"], "not_included");
    assert_eq!(value["repository"], "test-app");
}
