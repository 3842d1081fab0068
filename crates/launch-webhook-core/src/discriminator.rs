//! Provider discrimination and payload normalization.
//!
//! Discrimination is two-phase. The provider family is decided from the
//! headers alone; the header-derived discriminant then selects the concrete
//! event variant, and the body is parsed as that variant's payload.
//!
//! Parse failures name the offending field path. When the body does not
//! decode, the provider's raw format checks still run over it so that one
//! error lists every violated path.

use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_path_to_error::Segment;
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::bitbucket_server::event::{
    EVENT_KEY_FIELD, EVENT_KEY_HEADER, HOOK_UUID_HEADER, RAW_FORMATS as BITBUCKET_RAW_FORMATS,
    REQUEST_ID_HEADER,
};
use crate::bitbucket_server::{
    BitbucketServerEvent, BitbucketServerEventKind, BitbucketServerHeaders,
    BitbucketServerWebhookEvent,
};
use crate::event::{EventEnvelope, ScmEvent, SourceType, WebhookError, WebhookHeaders};
use crate::github::event::{
    event_kind_discriminant, ENTERPRISE_VERSION_HEADER, EVENT_HEADER, EVENT_KIND_FIELD,
    RAW_FORMATS as GITHUB_RAW_FORMATS,
};
use crate::github::{GithubEvent, GithubEventKind, GithubHeaders, GithubWebhookEvent};
use crate::types::{field_path, RawFormats, Validate, Violations};
use crate::ValidationError;

/// Root of every body violation path
const BODY_PATH: &str = "body";

/// The header set matches no known provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to discriminate header source: none of [{}] present", .expected.join(", "))]
pub struct DiscriminationError {
    /// Identifying headers that were looked for
    pub expected: Vec<String>,
}

/// Determine the provider family from the identifying headers
///
/// Checked in fixed priority order: a GitHub event header means GitHub (or
/// GitHub Enterprise when the enterprise version header is present); otherwise
/// a Bitbucket request id or event key header means Bitbucket, Cloud when the
/// hook UUID header is present and Server when it is not.
///
/// # Errors
///
/// Returns [`DiscriminationError`] when no identifying header is present.
pub fn discriminate(headers: &WebhookHeaders) -> Result<SourceType, DiscriminationError> {
    if headers.contains(EVENT_HEADER) {
        if headers.contains(ENTERPRISE_VERSION_HEADER) {
            return Ok(SourceType::GithubEnterprise);
        }
        return Ok(SourceType::Github);
    }

    if headers.contains(REQUEST_ID_HEADER) || headers.contains(EVENT_KEY_HEADER) {
        if headers.contains(HOOK_UUID_HEADER) {
            return Ok(SourceType::BitbucketCloud);
        }
        return Ok(SourceType::BitbucketServer);
    }

    Err(DiscriminationError {
        expected: vec![
            EVENT_HEADER.to_string(),
            REQUEST_ID_HEADER.to_string(),
            EVENT_KEY_HEADER.to_string(),
        ],
    })
}

/// Discriminate and parse a decoded request into an [`EventEnvelope`]
///
/// # Errors
///
/// - [`WebhookError::Discrimination`] when no provider is recognised
/// - [`WebhookError::Validation`] when the provider is unsupported, a required
///   header is missing, or the body does not match any event variant
#[instrument(skip(headers, body))]
pub fn normalize(
    headers: &HashMap<String, String>,
    body: Value,
) -> Result<EventEnvelope, WebhookError> {
    let headers = WebhookHeaders::from_map(headers);
    let source_type = discriminate(&headers)?;
    debug!(source_type = %source_type, "Discriminated webhook source");

    if !body.is_object() {
        return Err(ValidationError::InvalidFormat {
            field: BODY_PATH.to_string(),
            message: format!("expected a JSON object, found {}", json_type_name(&body)),
        }
        .into());
    }

    let event = match source_type {
        SourceType::Github => {
            let github_headers = GithubHeaders::from_headers(&headers)?;
            let action = body.get("action").and_then(Value::as_str);
            let kind = event_kind_discriminant(&github_headers.event, action);

            let event = parse_github(&kind, &body)?;
            ScmEvent::Github(GithubWebhookEvent {
                headers: github_headers,
                event,
            })
        }
        SourceType::BitbucketServer => {
            let bitbucket_headers = BitbucketServerHeaders::from_headers(&headers)?;

            let event = parse_bitbucket_server(&bitbucket_headers.event_key, &body)?;
            ScmEvent::BitbucketServer(BitbucketServerWebhookEvent {
                headers: bitbucket_headers,
                event,
            })
        }
        unsupported => {
            return Err(ValidationError::UnsupportedSource {
                source_type: unsupported.display_name().to_string(),
            }
            .into())
        }
    };

    debug!(event = %event.qualified_name(), "Normalized webhook event");
    Ok(EventEnvelope { headers, event })
}

fn parse_github(kind: &str, body: &Value) -> Result<GithubEvent, ValidationError> {
    let mut violations = Violations::new();
    let event = match kind.parse::<GithubEventKind>() {
        Ok(GithubEventKind::Ping) => decode(body, &mut violations).map(GithubEvent::Ping),
        Ok(GithubEventKind::Push) => decode(body, &mut violations).map(GithubEvent::Push),
        Ok(GithubEventKind::PullRequestOpened) => {
            decode(body, &mut violations).map(GithubEvent::PullRequestOpened)
        }
        Ok(GithubEventKind::PullRequestClosed) => {
            decode(body, &mut violations).map(GithubEvent::PullRequestClosed)
        }
        Ok(GithubEventKind::PullRequestSynchronize) => {
            decode(body, &mut violations).map(GithubEvent::PullRequestSynchronize)
        }
        Err(_) => {
            violations.push(
                field_path(BODY_PATH, EVENT_KIND_FIELD),
                format!("unknown GitHub event kind '{}'", kind),
            );
            None
        }
    };
    finish(event, body, &GITHUB_RAW_FORMATS, violations)
}

fn parse_bitbucket_server(
    event_key: &str,
    body: &Value,
) -> Result<BitbucketServerEvent, ValidationError> {
    let mut violations = Violations::new();
    let event = match event_key.parse::<BitbucketServerEventKind>() {
        Ok(BitbucketServerEventKind::RepoRefsChanged) => {
            decode(body, &mut violations).map(BitbucketServerEvent::Push)
        }
        Ok(BitbucketServerEventKind::PrFromRefUpdated) => {
            decode(body, &mut violations).map(BitbucketServerEvent::SourceBranchUpdated)
        }
        Ok(BitbucketServerEventKind::PrOpened) => {
            decode(body, &mut violations).map(BitbucketServerEvent::PullRequestOpened)
        }
        Ok(BitbucketServerEventKind::PrMerged) => {
            decode(body, &mut violations).map(BitbucketServerEvent::PullRequestMerged)
        }
        Err(_) => {
            violations.push(
                field_path(BODY_PATH, EVENT_KEY_FIELD),
                format!("unknown Bitbucket Server event key '{}'", event_key),
            );
            None
        }
    };
    finish(event, body, &BITBUCKET_RAW_FORMATS, violations)
}

/// Decode one variant payload, recording the failing field on error
fn decode<T: DeserializeOwned>(body: &Value, violations: &mut Violations) -> Option<T> {
    match serde_path_to_error::deserialize(body) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            let mut path = BODY_PATH.to_string();
            for segment in error.path().iter() {
                match segment {
                    Segment::Seq { index } => path = format!("{}[{}]", path, index),
                    Segment::Map { key } => path = field_path(&path, key),
                    Segment::Enum { .. } | Segment::Unknown => {}
                }
            }

            let message = error.into_inner().to_string();
            match missing_field(&message) {
                Some(name) => violations.push(field_path(&path, name), "field is required"),
                None => violations.push(path, message),
            }
            None
        }
    }
}

/// Field name of a serde `missing field` error
fn missing_field(message: &str) -> Option<&str> {
    message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.strip_suffix('`'))
}

/// Validate a decoded event, or scan the raw body when decoding failed
fn finish<E: Validate>(
    event: Option<E>,
    body: &Value,
    formats: &RawFormats,
    mut violations: Violations,
) -> Result<E, ValidationError> {
    match event {
        Some(event) => {
            event.validate(BODY_PATH, &mut violations);
            violations.into_result()?;
            Ok(event)
        }
        None => {
            formats.scan(body, BODY_PATH, &mut violations);
            Err(violations.into_error())
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[path = "discriminator_tests.rs"]
mod tests;
