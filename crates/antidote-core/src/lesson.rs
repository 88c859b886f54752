//! Curriculum data model.
//!
//! Lessons are static definitions loaded by an external collaborator and
//! handed to the scheduler read-only. The scheduler only cares about the
//! topology: endpoints, their presentations, and the connections between them.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ids::LessonId;

/// A curriculum lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Curriculum-wide lesson number.
    pub lesson_id: LessonId,
    /// Human readable name.
    pub lesson_name: String,
    /// Ordered stages; the index is the stage number.
    pub stages: Vec<LessonStage>,
    /// Compute endpoints that make up the lab.
    pub endpoints: Vec<Endpoint>,
    /// Topology edges between endpoints.
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Curriculum category, e.g. `fundamentals`.
    #[serde(default)]
    pub category: String,
    /// Deployment tier, e.g. `prod` or `ptr`.
    #[serde(default)]
    pub tier: String,
}

/// One stage of a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonStage {
    /// Stage number.
    pub id: u32,
    /// Lab guide text shown to the learner.
    #[serde(default)]
    pub description: String,
}

/// A compute endpoint in a lesson topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Name, unique within the lesson. Also the pod and service name.
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Externally reachable interfaces.
    #[serde(default)]
    pub presentations: Vec<Presentation>,
}

/// One exposed interface of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    /// Name, unique within the endpoint.
    pub name: String,
    /// Transport port.
    pub port: u16,
    /// Protocol tag.
    #[serde(rename = "type")]
    pub kind: PresentationType,
}

/// Protocol of a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationType {
    /// Interactive shell over SSH.
    #[serde(alias = "shell")]
    Ssh,
    /// Web application.
    #[serde(alias = "web")]
    Http,
    /// Remote desktop.
    #[serde(alias = "rdp")]
    Vnc,
}

impl PresentationType {
    /// Whether the presentation is an interactive shell.
    #[must_use]
    pub const fn is_shell(self) -> bool {
        matches!(self, Self::Ssh)
    }

    /// Whether the presentation should be routed through the lab ingress.
    #[must_use]
    pub const fn is_web(self) -> bool {
        matches!(self, Self::Http)
    }

    /// The tag used in object names and labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Http => "http",
            Self::Vnc => "vnc",
        }
    }
}

/// An undirected topology edge between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// First endpoint name.
    pub a: String,
    /// Second endpoint name.
    pub b: String,
}

impl Lesson {
    /// Look up a stage by index.
    #[must_use]
    pub fn stage(&self, stage: u32) -> Option<&LessonStage> {
        usize::try_from(stage).ok().and_then(|i| self.stages.get(i))
    }

    /// Total number of presentations across all endpoints.
    #[must_use]
    pub fn presentation_count(&self) -> usize {
        self.endpoints.iter().map(|e| e.presentations.len()).sum()
    }

    /// Names of the endpoints connected to `endpoint`, sorted.
    #[must_use]
    pub fn peers_of(&self, endpoint: &str) -> Vec<&str> {
        let mut peers: Vec<&str> = self
            .connections
            .iter()
            .filter_map(|c| {
                if c.a == endpoint {
                    Some(c.b.as_str())
                } else if c.b == endpoint {
                    Some(c.a.as_str())
                } else {
                    None
                }
            })
            .collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }

    /// Check that the lesson describes a topology that can be provisioned.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidLesson` if the lesson has no endpoints,
    /// no presentations, duplicate endpoint names, an endpoint exposing the
    /// same port twice, or connections that reference unknown endpoints.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| CoreError::InvalidLesson {
            lesson_id: self.lesson_id,
            reason,
        };

        if self.endpoints.is_empty() {
            return Err(invalid("lesson has no endpoints".to_string()));
        }
        if self.presentation_count() == 0 {
            return Err(invalid("lesson has no presentations".to_string()));
        }

        let mut names = HashSet::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            if !names.insert(endpoint.name.as_str()) {
                return Err(invalid(format!("duplicate endpoint {}", endpoint.name)));
            }
            let mut ports = HashSet::with_capacity(endpoint.presentations.len());
            for presentation in &endpoint.presentations {
                if !ports.insert(presentation.port) {
                    return Err(invalid(format!(
                        "endpoint {} exposes port {} twice",
                        endpoint.name, presentation.port
                    )));
                }
            }
        }

        for connection in &self.connections {
            for side in [&connection.a, &connection.b] {
                if !names.contains(side.as_str()) {
                    return Err(invalid(format!("connection references unknown endpoint {side}")));
                }
            }
        }

        Ok(())
    }
}

/// All lessons known to the platform, keyed by lesson ID.
#[derive(Debug, Clone, Default)]
pub struct Curriculum {
    lessons: BTreeMap<LessonId, Arc<Lesson>>,
}

impl Curriculum {
    /// Build a curriculum from a list of lessons.
    #[must_use]
    pub fn new(lessons: impl IntoIterator<Item = Lesson>) -> Self {
        Self {
            lessons: lessons
                .into_iter()
                .map(|l| (l.lesson_id, Arc::new(l)))
                .collect(),
        }
    }

    /// Load a curriculum from a JSON array of lessons.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let lessons: Vec<Lesson> = serde_json::from_slice(&raw)?;
        Ok(Self::new(lessons))
    }

    /// Look up a lesson.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::LessonNotFound` if the lesson is not in the curriculum.
    pub fn lesson(&self, id: LessonId) -> Result<Arc<Lesson>> {
        self.lessons
            .get(&id)
            .cloned()
            .ok_or(CoreError::LessonNotFound(id))
    }

    /// Number of lessons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    /// Whether the curriculum has no lessons.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}
