//! Error types for the scheduler crate.

use antidote_core::{CoreError, LabId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::ObjectRef;

/// Errors that can occur during scheduling operations.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// Cluster error that did not come from the Kubernetes client.
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// The cluster API could not be reached at startup.
    #[error("Cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// No live lab with this ID exists.
    #[error("Lab not found: {0}")]
    LabNotFound(LabId),

    /// A live lab with this ID already exists.
    #[error("Lab already exists: {0}")]
    LabAlreadyExists(LabId),

    /// The requested stage does not exist in the lesson.
    #[error("Lab {lab_id}: stage {stage} out of range (lesson has {stages} stages)")]
    InvalidStage {
        /// Lab the request targeted.
        lab_id: LabId,
        /// Requested stage.
        stage: u32,
        /// Number of stages in the lesson.
        stages: usize,
    },

    /// Creating a lab's objects failed part way; created objects were rolled back.
    #[error("Provisioning failed for lab {lab_id}: {reason}")]
    ProvisioningFailed {
        /// Lab being provisioned.
        lab_id: LabId,
        /// Underlying cluster failure.
        reason: String,
    },

    /// Some of a lab's objects could not be deleted.
    #[error("Teardown failed for lab {lab_id}: {} objects left behind", failed.len())]
    TeardownFailed {
        /// Lab being torn down.
        lab_id: LabId,
        /// Objects whose delete call failed.
        failed: Vec<ObjectRef>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Curriculum or identifier error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Coarse classification of a failed request, carried in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request referenced an unknown lab.
    NotFound,
    /// The request would overwrite an existing lab.
    AlreadyExists,
    /// The request or its lesson is malformed.
    InvalidRequest,
    /// Cluster objects could not be created.
    Provisioning,
    /// Cluster objects could not be deleted.
    Teardown,
    /// The cluster API failed outside of provisioning or teardown.
    Cluster,
}

impl SchedulerError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::KubeApi(_)
                | Self::Cluster(_)
                | Self::ClusterUnreachable(_)
                | Self::ProvisioningFailed { .. }
                | Self::TeardownFailed { .. }
        )
    }

    /// Classify the error for inclusion in a result.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::LabNotFound(_) => FailureKind::NotFound,
            Self::LabAlreadyExists(_) => FailureKind::AlreadyExists,
            Self::InvalidStage { .. } | Self::Config(_) | Self::Core(_) => {
                FailureKind::InvalidRequest
            }
            Self::ProvisioningFailed { .. } => FailureKind::Provisioning,
            Self::TeardownFailed { .. } => FailureKind::Teardown,
            Self::KubeApi(_) | Self::Cluster(_) | Self::ClusterUnreachable(_) => {
                FailureKind::Cluster
            }
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self.failure_kind() {
            FailureKind::NotFound => 404,
            FailureKind::AlreadyExists => 409,
            FailureKind::InvalidRequest => 400,
            FailureKind::Provisioning | FailureKind::Teardown => 500,
            FailureKind::Cluster => 503,
        }
    }
}

/// A specialized Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
