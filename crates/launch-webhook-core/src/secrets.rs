//! Secret values and the secret store abstraction.
//!
//! Webhook signing secrets and assumed-role credentials are held in
//! [`SecretValue`], which never prints its content and is zeroized on drop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{ErrorCategory, ValidationError};

// ============================================================================
// Secret reference
// ============================================================================

/// Reference to a secret held by a [`SecretStore`], such as a name or ARN
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretReference(String);

impl SecretReference {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "signature_secret".to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SecretReference {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SecretReference> for String {
    fn from(reference: SecretReference) -> Self {
        reference.0
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Secret value
// ============================================================================

/// Secure container for secret material
///
/// `Debug` and `Display` render a fixed redaction marker. The content is only
/// reachable through [`SecretValue::expose_secret`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue {
    inner: String,
}

impl SecretValue {
    pub fn from_string(value: String) -> Self {
        Self { inner: value }
    }

    /// Get secret as string (only for immediate use)
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    pub fn expose_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get secret length without exposing content
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::from_string(value.to_string())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("length", &self.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

// ============================================================================
// Secret store
// ============================================================================

/// Source of webhook signing secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve the current value of a secret
    ///
    /// # Errors
    ///
    /// - [`SecretError::NotFound`] when the reference does not exist
    /// - [`SecretError::AccessDenied`] when the caller may not read it
    /// - [`SecretError::Backend`] for any other store failure
    async fn get_secret(&self, reference: &SecretReference) -> Result<SecretValue, SecretError>;
}

/// Secret retrieval errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not found: {reference}")]
    NotFound { reference: String },

    #[error("Access denied to secret: {reference}")]
    AccessDenied { reference: String },

    #[error("Secret {reference} has no string value")]
    NoStringValue { reference: String },

    #[error("Secret store error: {message}")]
    Backend { message: String },
}

impl SecretError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::NoStringValue { .. } => ErrorCategory::Configuration,
            Self::AccessDenied { .. } => ErrorCategory::Security,
            Self::Backend { .. } => ErrorCategory::Transient,
        }
    }
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
