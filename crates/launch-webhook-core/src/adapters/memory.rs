//! # In-Memory Secret Store
//!
//! Thread-safe secret store for tests, local runs and dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::secrets::{SecretError, SecretReference, SecretStore, SecretValue};

/// Secret store backed by a shared map
///
/// Clones share the same map, so secrets added after handing a clone to an
/// [`crate::EventProcessor`] are visible to it.
#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<String, SecretValue>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with_secret(self, reference: impl Into<String>, value: impl Into<SecretValue>) -> Self {
        self.insert(reference, value);
        self
    }

    pub fn insert(&self, reference: impl Into<String>, value: impl Into<SecretValue>) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.into(), value.into());
    }

    pub fn remove(&self, reference: &str) -> Option<SecretValue> {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(reference)
    }

    pub fn len(&self) -> usize {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(String, SecretValue)> for InMemorySecretStore {
    fn from_iter<I: IntoIterator<Item = (String, SecretValue)>>(iter: I) -> Self {
        Self {
            secrets: Arc::new(RwLock::new(iter.into_iter().collect())),
        }
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_secret(&self, reference: &SecretReference) -> Result<SecretValue, SecretError> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| SecretError::Backend {
                message: "secret map lock poisoned".to_string(),
            })?;

        secrets
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                reference: reference.to_string(),
            })
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
