//! Shared validated value types.
//!
//! Payload newtypes such as [`CommitHash`] and [`HttpsUrl`] deserialize from any
//! string and are checked afterwards through [`Validate`], so that a single
//! parse reports every violated field instead of stopping at the first one.
//! Values built through their `new` constructors are always valid.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{FieldViolation, ValidationError};

// ============================================================================
// Validation plumbing
// ============================================================================

/// Collector for field violations found while walking a parsed payload
#[derive(Debug, Default)]
pub struct Violations {
    items: Vec<FieldViolation>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation at `path`
    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.items.push(FieldViolation {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Convert the collected violations into a result
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            Ok(())
        } else {
            Err(self.into_error())
        }
    }

    /// Convert the collected violations into an error, even when empty
    pub fn into_error(self) -> ValidationError {
        ValidationError::Payload {
            violations: self.items,
        }
    }
}

/// Join a parent path and a child field name
pub fn field_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", parent, child)
    }
}

/// Semantic validation of a deserialized value
pub trait Validate {
    /// Record every violation found under `path`
    fn validate(&self, path: &str, violations: &mut Violations);

    /// Validate the value from the root and fail with every violation found
    fn validate_all(&self, root: &str) -> Result<(), ValidationError> {
        let mut violations = Violations::new();
        self.validate(root, &mut violations);
        violations.into_result()
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self, path: &str, violations: &mut Violations) {
        if let Some(value) = self {
            value.validate(path, violations);
        }
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self, path: &str, violations: &mut Violations) {
        for (index, value) in self.iter().enumerate() {
            value.validate(&format!("{}[{}]", path, index), violations);
        }
    }
}

impl<T: Validate> Validate for Box<T> {
    fn validate(&self, path: &str, violations: &mut Violations) {
        self.as_ref().validate(path, violations);
    }
}

/// Check run against a raw JSON value found at a given path
pub type FormatCheck = fn(&Value, &str, &mut Violations);

/// Decode `value` as `T` and validate it; values that do not decode are skipped
pub fn check_format<T>(value: &Value, path: &str, violations: &mut Violations)
where
    T: DeserializeOwned + Validate,
{
    if let Ok(parsed) = T::deserialize(value) {
        parsed.validate(path, violations);
    }
}

/// A [`FormatCheck`] applied wherever `pattern` matches
///
/// Patterns are `.` separated field names. `name[]` visits every element of
/// an array field and `**` matches any number of levels.
#[derive(Clone, Copy)]
pub struct FieldFormat {
    pub pattern: &'static str,
    pub check: FormatCheck,
}

/// Format checks for a raw payload that failed to decode
///
/// Used to keep reporting format violations when the typed model cannot be
/// built, so one response still lists every violated path.
#[derive(Clone, Copy)]
pub struct RawFormats {
    pub fields: &'static [FieldFormat],

    /// Object keys `**` never descends into
    pub opaque: &'static [&'static str],
}

impl RawFormats {
    /// Record every format violation found under `root`
    pub fn scan(&self, value: &Value, root: &str, violations: &mut Violations) {
        for field in self.fields {
            let segments: Vec<&str> = field.pattern.split('.').collect();
            self.scan_segments(value, root, &segments, field.check, violations);
        }
    }

    fn scan_segments(
        &self,
        value: &Value,
        path: &str,
        segments: &[&str],
        check: FormatCheck,
        violations: &mut Violations,
    ) {
        let (segment, rest) = match segments.split_first() {
            Some(split) => split,
            None => {
                check(value, path, violations);
                return;
            }
        };

        if *segment == "**" {
            self.scan_segments(value, path, rest, check, violations);
            match value {
                Value::Object(map) => {
                    for (key, child) in map {
                        if !self.opaque.iter().any(|opaque| *opaque == key.as_str()) {
                            let child_path = field_path(path, key);
                            self.scan_segments(child, &child_path, segments, check, violations);
                        }
                    }
                }
                Value::Array(items) => {
                    for (index, child) in items.iter().enumerate() {
                        let child_path = format!("{}[{}]", path, index);
                        self.scan_segments(child, &child_path, segments, check, violations);
                    }
                }
                _ => {}
            }
            return;
        }

        let (key, each) = match segment.strip_suffix("[]") {
            Some(key) => (key, true),
            None => (*segment, false),
        };
        let child = match value.get(key) {
            Some(child) => child,
            None => return,
        };
        let child_path = field_path(path, key);

        if each {
            if let Some(items) = child.as_array() {
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", child_path, index);
                    self.scan_segments(item, &item_path, rest, check, violations);
                }
            }
        } else {
            self.scan_segments(child, &child_path, rest, check, violations);
        }
    }
}

// ============================================================================
// Commit hash
// ============================================================================

/// A full 40 character hexadecimal git object id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    /// Create a commit hash, rejecting anything but 40 hex digits
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if !Self::is_valid(&value) {
            return Err(ValidationError::InvalidFormat {
                field: "commit_hash".to_string(),
                message: format!("'{}' is not a 40 character hexadecimal string", value),
            });
        }
        Ok(Self(value))
    }

    fn is_valid(value: &str) -> bool {
        value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for CommitHash {
    fn validate(&self, path: &str, violations: &mut Violations) {
        if !Self::is_valid(&self.0) {
            violations.push(
                path,
                format!("'{}' is not a 40 character hexadecimal string", self.0),
            );
        }
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CommitHash {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Scheme-constrained URLs
// ============================================================================

fn scheme_violation(value: &str, scheme: &str) -> Option<String> {
    match url::Url::parse(value) {
        Ok(parsed) if parsed.scheme() == scheme => None,
        Ok(parsed) => Some(format!(
            "URL scheme should be '{}', found '{}'",
            scheme,
            parsed.scheme()
        )),
        Err(e) => Some(format!("'{}' is not a valid URL: {}", value, e)),
    }
}

macro_rules! scheme_url {
    ($(#[$meta:meta])* $name:ident, $scheme:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Required URL scheme
            pub const SCHEME: &'static str = $scheme;

            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                match scheme_violation(&value, Self::SCHEME) {
                    None => Ok(Self(value)),
                    Some(message) => Err(ValidationError::InvalidFormat {
                        field: "url".to_string(),
                        message,
                    }),
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Validate for $name {
            fn validate(&self, path: &str, violations: &mut Violations) {
                if let Some(message) = scheme_violation(&self.0, Self::SCHEME) {
                    violations.push(path, message);
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

scheme_url!(
    /// URL restricted to the `https` scheme
    HttpsUrl,
    "https"
);
scheme_url!(
    /// URL restricted to the `ssh` scheme
    SshUrl,
    "ssh"
);
scheme_url!(
    /// URL restricted to the `git` scheme
    GitUrl,
    "git"
);

// ============================================================================
// Email address
// ============================================================================

/// A syntactically plausible email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if let Some(message) = Self::violation(&value) {
            return Err(ValidationError::InvalidFormat {
                field: "email".to_string(),
                message,
            });
        }
        Ok(Self(value))
    }

    fn violation(value: &str) -> Option<String> {
        if value.chars().any(char::is_whitespace) {
            return Some(format!("'{}' contains whitespace", value));
        }
        match value.split_once('@') {
            Some((local, domain))
                if !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.') =>
            {
                None
            }
            _ => Some(format!("'{}' is not a valid email address", value)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for EmailAddress {
    fn validate(&self, path: &str, violations: &mut Violations) {
        if let Some(message) = Self::violation(&self.0) {
            violations.push(path, message);
        }
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ARN
// ============================================================================

/// An Amazon Resource Name
///
/// Format: `arn:<partition>:<service>:<region>:<account>:<resource>`. Region and
/// account may be empty; the resource may itself contain `:` or `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Arn {
    value: String,
    partition_end: usize,
}

impl Arn {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let invalid = |message: &str| ValidationError::InvalidFormat {
            field: "arn".to_string(),
            message: format!("'{}' {}", value, message),
        };

        let parts: Vec<&str> = value.splitn(6, ':').collect();
        if parts.len() != 6 {
            return Err(invalid("does not have six ':' separated sections"));
        }
        if parts[0] != "arn" {
            return Err(invalid("must start with 'arn:'"));
        }
        if parts[1].is_empty() {
            return Err(invalid("has an empty partition"));
        }
        if parts[2].is_empty() {
            return Err(invalid("has an empty service"));
        }
        if !parts[2]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(invalid("has an invalid service name"));
        }
        if !parts[3]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(invalid("has an invalid region"));
        }
        if !parts[4].chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("has an invalid account id"));
        }
        if parts[5].is_empty() {
            return Err(invalid("has an empty resource"));
        }

        let partition_end = 4 + parts[1].len();
        Ok(Self {
            value,
            partition_end,
        })
    }

    fn section(&self, index: usize) -> &str {
        self.value.splitn(6, ':').nth(index).unwrap_or("")
    }

    pub fn partition(&self) -> &str {
        &self.value[4..self.partition_end]
    }

    pub fn service(&self) -> &str {
        self.section(2)
    }

    pub fn region(&self) -> &str {
        self.section(3)
    }

    pub fn account(&self) -> &str {
        self.section(4)
    }

    pub fn resource(&self) -> &str {
        self.section(5)
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl TryFrom<String> for Arn {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Arn> for String {
    fn from(arn: Arn) -> Self {
        arn.value
    }
}

impl FromStr for Arn {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Parse the timestamp formats used by the supported providers
///
/// Accepts RFC 3339 (`2024-05-08T14:31:19Z`), offsets without a colon
/// (`2024-05-08T14:31:19-0400`) and naive UTC values.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(parsed.and_utc());
    }
    Err(format!("'{}' is not a recognised timestamp", value))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Seconds(i64),
    Text(String),
}

impl TimestampRepr {
    fn resolve(self) -> Result<DateTime<Utc>, String> {
        match self {
            Self::Seconds(seconds) => DateTime::from_timestamp(seconds, 0)
                .ok_or_else(|| format!("{} is out of range for a timestamp", seconds)),
            Self::Text(text) => parse_timestamp(&text),
        }
    }
}

/// Serde helpers for timestamps that arrive as epoch seconds or text
pub mod flexible_timestamp {
    use super::*;

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        TimestampRepr::deserialize(deserializer)?
            .resolve()
            .map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`flexible_timestamp`]
pub mod flexible_timestamp_option {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match value {
            Some(value) => serializer.serialize_some(&value.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<TimestampRepr>::deserialize(deserializer)?
            .map(TimestampRepr::resolve)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
