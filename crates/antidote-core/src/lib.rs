//! Core types for the Antidote lesson scheduler.
//!
//! This crate provides the foundational types shared by the scheduler and
//! its callers:
//!
//! - **Identifiers**: Strongly-typed IDs for labs, sessions and lessons
//! - **Curriculum**: Lessons, stages, endpoints, presentations and connections
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use antidote_core::{LabId, SessionId};
//!
//! let lab_id = LabId::generate();
//! assert!(lab_id.namespace().ends_with("-ns"));
//!
//! let session = SessionId::new("browser-session-1").unwrap();
//! assert_eq!(session.as_str(), "browser-session-1");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod lesson;

pub use error::{CoreError, Result};
pub use ids::{IdError, LabId, LessonId, SessionId};
pub use lesson::{
    Connection, Curriculum, Endpoint, Lesson, LessonStage, Presentation, PresentationType,
};
