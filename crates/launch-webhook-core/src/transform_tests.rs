//! Tests for transforms and the transform registry.

use super::*;
use crate::test_support::envelope;
use serde_json::json;

// ============================================================================
// Results
// ============================================================================

#[test]
fn test_result_from_mapping() {
    let mapping = json!({
        "codebuild": {
            "project_name": "override-project",
            "environment_variables_override": [
                {"name": "A", "value": "1"},
                {"name": "B", "value": "/param", "type": "PARAMETER_STORE"}
            ]
        },
        "note": "kept"
    });
    let mapping = mapping.as_object().unwrap().clone();

    let result = TransformResult::from_mapping(mapping).unwrap();
    let codebuild = result.codebuild.unwrap();

    assert_eq!(codebuild.project_name.as_deref(), Some("override-project"));
    let variables = codebuild.environment_variables_override.unwrap();
    assert_eq!(variables[0].variable_type, CodeBuildVariableType::Plaintext);
    assert_eq!(variables[1].variable_type, CodeBuildVariableType::ParameterStore);
    assert_eq!(result.extra["note"], "kept");
}

#[test]
fn test_result_from_invalid_mapping() {
    let mapping = json!({ "codepipeline": { "variables": "not-a-list" } });

    let err = TransformResult::from_mapping(mapping.as_object().unwrap().clone()).unwrap_err();
    assert!(matches!(err, TransformError::InvalidOutput { .. }));
}

#[test]
fn test_lambda_payload_distinguishes_null_from_absent() {
    let explicit: TransformResult =
        serde_json::from_value(json!({ "lambdafunction": { "payload": null } })).unwrap();
    let absent: TransformResult =
        serde_json::from_value(json!({ "lambdafunction": { "function_name": "f" } })).unwrap();

    assert_eq!(explicit.lambdafunction.unwrap().payload, Some(Value::Null));
    assert_eq!(absent.lambdafunction.unwrap().payload, None);
}

#[test]
fn test_codebuild_variable_type_names() {
    assert_eq!(CodeBuildVariableType::Plaintext.as_str(), "PLAINTEXT");
    assert_eq!(CodeBuildVariableType::SecretsManager.as_str(), "SECRETS_MANAGER");

    let variable: Result<CodeBuildVariable, _> =
        serde_json::from_value(json!({"name": "A", "value": "1", "type": "ENCRYPTED"}));
    assert!(variable.is_err());
}

// ============================================================================
// Transforms
// ============================================================================

#[test]
fn test_identity_passes_structured_event_through() {
    let envelope = envelope("github/pr_merged.json");

    let result = Transform::identity().apply(&envelope.event).unwrap();

    assert!(result.codebuild.is_none());
    assert_eq!(result.extra["event_kind"], "pull_request.closed");
    assert_eq!(result.extra["source_type"], "github");
}

#[test]
fn test_structured_transform_receives_json() {
    let transform = Transform::structured(
        |event: Map<String, Value>| -> Result<TransformResult, TransformError> {
            let repository = event["repository"]["name"]
                .as_str()
                .ok_or_else(|| TransformError::failed("repository name missing"))?
                .to_string();
            Ok(TransformResult {
                codepipeline: Some(CodePipelineOverride {
                    pipeline_name: Some(format!("{}-pipeline", repository)),
                    variables: None,
                }),
                ..TransformResult::default()
            })
        },
    );
    assert_eq!(transform.input(), TransformInput::Structured);

    let envelope = envelope("github/push.json");
    let result = transform.apply(&envelope.event).unwrap();

    assert_eq!(
        result.codepipeline.unwrap().pipeline_name.as_deref(),
        Some("test-app-pipeline")
    );
}

#[test]
fn test_typed_transform_receives_event() {
    let transform = Transform::typed(|event: &ScmEvent| {
        let mut mapping = Map::new();
        mapping.insert(
            "lambdafunction".to_string(),
            json!({ "payload": { "kind": event.event_kind() } }),
        );
        Ok::<_, TransformError>(mapping)
    });

    let envelope = envelope("bitbucket_server/pr_open.json");
    let result = transform.apply(&envelope.event).unwrap();

    assert_eq!(
        result.lambdafunction.unwrap().payload,
        Some(json!({ "kind": "pr:opened" }))
    );
}

#[test]
fn test_typed_variant_transform_narrows_event() {
    let transform = Transform::typed_variant::<PushEvent, _, _>(|push: &PushEvent| {
        Ok::<_, TransformError>(TransformResult {
            codebuild: Some(CodeBuildOverride {
                project_name: None,
                environment_variables_override: Some(vec![CodeBuildVariable::plaintext(
                    "COMMIT",
                    push.after.as_str(),
                )]),
            }),
            ..TransformResult::default()
        })
    });
    assert_eq!(
        transform.input(),
        TransformInput::Typed {
            variant: "github::Push"
        }
    );

    let push = envelope("github/push.json");
    let result = transform.apply(&push.event).unwrap();
    let variables = result.codebuild.unwrap().environment_variables_override.unwrap();
    assert_eq!(variables[0].value, "6dcb09b5b57875f334f61aebed695e2e4193db5e");

    let pull_request = envelope("github/pr_open.json");
    let err = transform.apply(&pull_request.event).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Transform expects github::Push but received github::PullRequestOpened"
    );
}

#[test]
fn test_pull_request_variant_covers_every_action() {
    let transform = Transform::typed_variant::<PullRequestEvent, _, _>(|pr: &PullRequestEvent| {
        let mut mapping = Map::new();
        mapping.insert("action".to_string(), json!(pr.action));
        Ok::<_, TransformError>(mapping)
    });

    for fixture in [
        "github/pr_open.json",
        "github/pr_merged.json",
        "github/pr_source_updated.json",
    ] {
        assert!(transform.apply(&envelope(fixture).event).is_ok(), "{}", fixture);
    }
}

#[test]
fn test_transform_failure_is_propagated() {
    let transform = Transform::typed(|_: &ScmEvent| -> Result<TransformResult, TransformError> {
        Err(TransformError::failed("boom"))
    });

    let err = transform
        .apply(&envelope("github/push.json").event)
        .unwrap_err();
    assert_eq!(err.to_string(), "Transform failed: boom");
    assert_eq!(err.error_category(), ErrorCategory::Permanent);
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_registry_builtins() {
    let registry = TransformRegistry::with_builtins();

    assert_eq!(
        registry.references(),
        vec!["builtin.codebuild_event_variables", "builtin.identity"]
    );
    assert!(registry.resolve(DEFAULT_TRANSFORM).is_ok());
}

#[test]
fn test_registry_resolution_errors() {
    let registry = TransformRegistry::with_builtins();

    let err = registry.resolve("missing.handler").unwrap_err();
    assert!(matches!(err, TransformError::ModuleNotFound { ref module } if module == "missing"));

    let err = registry.resolve("builtin.missing").unwrap_err();
    assert!(matches!(err, TransformError::FunctionNotFound { .. }));
    assert_eq!(
        err.to_string(),
        "Transform function 'missing' not found in module 'builtin'"
    );

    let err = registry.resolve("builtin").unwrap_err();
    assert!(matches!(err, TransformError::NotCallable { .. }));

    let err = registry.resolve("builtin.").unwrap_err();
    assert!(matches!(err, TransformError::NotCallable { .. }));

    let err = registry.resolve("handler").unwrap_err();
    assert!(matches!(err, TransformError::ModuleNotFound { .. }));
    assert!(err.is_configuration());
}

#[test]
fn test_registry_register_nested_module() {
    let mut registry = TransformRegistry::new();
    registry
        .register("company.transforms.to_lambda", Transform::identity())
        .unwrap();

    assert!(registry.resolve("company.transforms.to_lambda").is_ok());
    assert!(matches!(
        registry.resolve("company.transforms"),
        Err(TransformError::NotCallable { .. })
    ));
    assert!(registry.register("no_module", Transform::identity()).is_err());
}

#[test]
fn test_codebuild_event_variables_builtin() {
    let registry = TransformRegistry::with_builtins();
    let transform = registry.resolve("builtin.codebuild_event_variables").unwrap();

    let result = transform
        .apply(&envelope("bitbucket_server/pr_merged.json").event)
        .unwrap();
    let variables = result.codebuild.unwrap().environment_variables_override.unwrap();

    let value = |name: &str| {
        variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.clone())
    };
    assert_eq!(value("WEBHOOK_SOURCE").as_deref(), Some("bitbucket_server"));
    assert_eq!(value("WEBHOOK_EVENT").as_deref(), Some("pr:merged"));
    assert_eq!(value("WEBHOOK_SCOPE").as_deref(), Some("DSO"));
    assert_eq!(value("WEBHOOK_REPOSITORY").as_deref(), Some("test-app"));
}
