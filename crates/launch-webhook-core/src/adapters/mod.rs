//! # Infrastructure Adapters
//!
//! Implementations of the secret store and cloud collaborator traits.

pub mod dry_run;
pub mod memory;

#[cfg(feature = "aws")]
pub mod aws;

pub use dry_run::DryRunCloud;
pub use memory::InMemorySecretStore;

#[cfg(feature = "aws")]
pub use aws::{
    aws_services, load_sdk_config, AwsServiceClientFactory, SecretsManagerStore, StsRoleAssumer,
};
