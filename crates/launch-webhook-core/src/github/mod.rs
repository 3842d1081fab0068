//! # GitHub Provider
//!
//! Payload model, header set and closed event variant set for GitHub.com
//! webhooks. GitHub Enterprise deliveries are recognised by the discriminator
//! but not parsed.

pub mod event;
pub mod types;

pub use event::{
    GithubEvent, GithubEventKind, GithubHeaders, GithubWebhookEvent, PingEvent, PullRequestEvent,
    PushEvent,
};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
