//! Core identifier types for Antidote.
//!
//! This module provides strongly-typed identifiers for live labs, learner
//! sessions and curriculum lessons. All IDs are cheap to clone and hash so they
//! can be used directly as map keys by the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a Kubernetes label value.
const MAX_LABEL_LEN: usize = 63;

/// A 16-byte live lab identifier based on UUID v4.
///
/// Lab IDs are globally unique and name the isolation scope (namespace)
/// that holds all of a lab's cluster objects.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LabId(uuid::Uuid);

impl LabId {
    /// Create a new `LabId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random `LabId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Name of the namespace that isolates this lab's resources.
    ///
    /// Derived deterministically from the ID so teardown never needs
    /// anything other than the ID itself.
    #[must_use]
    pub fn namespace(&self) -> String {
        format!("{}-ns", self.0)
    }
}

impl FromStr for LabId {
    type Err = IdError;

    /// Parse a `LabId` from a UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for LabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LabId({})", self.0)
    }
}

impl fmt::Display for LabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for LabId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LabId> for String {
    fn from(id: LabId) -> Self {
        id.0.to_string()
    }
}

/// A learner session identifier.
///
/// Sessions come from the browser front-end and are opaque strings. They are
/// stamped onto cluster objects as label values, so they are restricted to
/// the label value alphabet.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Parse a `SessionId`, validating it as a label value.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty, longer than 63 characters,
    /// or contains characters other than ASCII alphanumerics, `-`, `_` and `.`.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_LABEL_LEN {
            return Err(IdError::InvalidLength {
                max: MAX_LABEL_LEN,
                got: value.len(),
            });
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(IdError::InvalidCharacter(c));
        }
        Ok(Self(value))
    }

    /// Return the session as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Numeric identifier of a lesson in the curriculum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct LessonId(pub i32);

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LessonId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self).map_err(|_| IdError::InvalidLessonId)
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input has an incorrect length.
    #[error("invalid length: expected 1..={max} characters, got {got}")]
    InvalidLength {
        /// The maximum number of characters.
        max: usize,
        /// The actual number of characters.
        got: usize,
    },

    /// The input contains a character that cannot appear in a label value.
    #[error("invalid character {0:?}")]
    InvalidCharacter(char),

    /// The input is not a valid lesson number.
    #[error("invalid lesson id")]
    InvalidLessonId,
}
