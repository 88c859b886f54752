//! Common error types for Antidote.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::{IdError, LessonId};
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while handling curriculum data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A lesson with the specified ID is not in the curriculum.
    #[error("lesson not found: {0}")]
    LessonNotFound(LessonId),

    /// A lesson cannot be turned into a lab.
    #[error("invalid lesson {lesson_id}: {reason}")]
    InvalidLesson {
        /// The offending lesson.
        lesson_id: LessonId,
        /// What is wrong with it.
        reason: String,
    },

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// The curriculum file could not be read.
    #[error("curriculum i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The curriculum file could not be decoded.
    #[error("curriculum decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
