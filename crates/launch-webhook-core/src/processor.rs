//! Rule evaluation over raw webhook requests.
//!
//! [`EventProcessor::process_raw_event`] normalizes a request once, then walks
//! every rule in configured order. Failures after matching (secret retrieval,
//! signature verification, transform and dispatch) are confined to the rule
//! that raised them and recorded in the returned [`ProcessingReport`].

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::discriminator::normalize;
use crate::event::{EventEnvelope, SourceType, WebhookError, WebhookEvent};
use crate::rule::Rule;
use crate::secrets::{SecretError, SecretStore};
use crate::signature::{verify_signature, SignatureError};
use crate::source::MatchOutcome;

/// Pipeline stage at which a matched rule was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Signature,
    Transform,
    Dispatch,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signature => write!(f, "signature"),
            Self::Transform => write!(f, "transform"),
            Self::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// What happened to one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleOutcome {
    Skipped { reason: MatchOutcome },
    Failed { stage: FailureStage, error: String },
    Dispatched,
}

impl RuleOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched)
    }

    pub fn failed_stage(&self) -> Option<FailureStage> {
        match self {
            Self::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub outcome: RuleOutcome,
}

/// Per-rule outcomes of one processed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingReport {
    pub source_type: SourceType,
    pub event: String,
    pub rules: Vec<RuleReport>,
}

impl ProcessingReport {
    /// Number of rules whose destination was invoked
    pub fn dispatched(&self) -> usize {
        self.rules
            .iter()
            .filter(|report| report.outcome.is_dispatched())
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleReport> {
        self.rules
            .iter()
            .filter(|report| matches!(report.outcome, RuleOutcome::Failed { .. }))
    }
}

/// Signature check failures for one rule
#[derive(Debug, thiserror::Error)]
enum VerificationError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Routes webhook requests through an ordered rule list
pub struct EventProcessor {
    rules: Vec<Rule>,
    secrets: Arc<dyn SecretStore>,
}

impl EventProcessor {
    pub fn new(rules: Vec<Rule>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { rules, secrets }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Process one request given its headers and undecoded body
    ///
    /// # Errors
    ///
    /// Only request-level failures are returned: an undecodable body, an
    /// unrecognised provider, or a payload that fails validation. Per-rule
    /// failures are reported in the [`ProcessingReport`].
    #[instrument(skip(self, headers, body), fields(rules = self.rules.len()))]
    pub async fn process_raw_event(
        &self,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<ProcessingReport, WebhookError> {
        let decoded: Value =
            serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload {
                message: e.to_string(),
            })?;
        let envelope = normalize(headers, decoded)?;
        info!(
            source_type = %envelope.source_type(),
            event = %envelope.event.qualified_name(),
            "Processing webhook event"
        );

        let mut reports = Vec::with_capacity(self.rules.len());
        for (index, rule) in self.rules.iter().enumerate() {
            let outcome = self.process_rule(rule, &envelope, body).await;
            reports.push(RuleReport {
                index,
                name: rule.name().to_string(),
                outcome,
            });
        }

        let report = ProcessingReport {
            source_type: envelope.source_type(),
            event: envelope.event.qualified_name(),
            rules: reports,
        };
        info!(
            dispatched = report.dispatched(),
            failed = report.failures().count(),
            "Finished processing webhook event"
        );
        Ok(report)
    }

    async fn process_rule(&self, rule: &Rule, envelope: &EventEnvelope, body: &[u8]) -> RuleOutcome {
        let matched = rule.evaluate(&envelope.event);
        if !matched.is_match() {
            return RuleOutcome::Skipped { reason: matched };
        }
        info!(rule = rule.name(), "Event matched rule");

        if let Err(e) = self.verify(rule, envelope, body).await {
            warn!(rule = rule.name(), error = %e, "Failure while verifying event signature");
            return RuleOutcome::Failed {
                stage: FailureStage::Signature,
                error: e.to_string(),
            };
        }

        let transformed = match rule.transform().apply(&envelope.event) {
            Ok(transformed) => transformed,
            Err(e) => {
                error!(rule = rule.name(), error = %e, "Failure while transforming event");
                return RuleOutcome::Failed {
                    stage: FailureStage::Transform,
                    error: e.to_string(),
                };
            }
        };

        if let Err(e) = rule.destination().invoke(&transformed).await {
            error!(
                rule = rule.name(),
                error = %e,
                "Failure while invoking destination, nothing further can be processed for this rule"
            );
            return RuleOutcome::Failed {
                stage: FailureStage::Dispatch,
                error: e.to_string(),
            };
        }

        RuleOutcome::Dispatched
    }

    async fn verify(
        &self,
        rule: &Rule,
        envelope: &EventEnvelope,
        body: &[u8],
    ) -> Result<(), VerificationError> {
        let Some(reference) = rule.source().signature().required_secret() else {
            return Ok(());
        };

        let secret = self.secrets.get_secret(reference).await?;
        verify_signature(&secret, body, envelope.event.signature_hash_sha256())?;
        info!(rule = rule.name(), "Event signature verified");
        Ok(())
    }
}

impl fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventProcessor")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
