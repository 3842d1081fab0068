//! # Bitbucket Server Provider
//!
//! Payload model, header set and closed event variant set for Bitbucket
//! Server (Data Center) webhooks. Bitbucket Cloud deliveries are recognised by
//! the discriminator but not parsed.

pub mod event;
pub mod types;

pub use event::{
    BitbucketServerEvent, BitbucketServerEventKind, BitbucketServerHeaders,
    BitbucketServerWebhookEvent, PullRequestEvent, PushEvent, SourceBranchUpdatedEvent,
};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
