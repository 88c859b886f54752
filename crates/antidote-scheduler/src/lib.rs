//! Lesson scheduler for Antidote live labs.
//!
//! This crate provisions, tracks, health-checks and reclaims the
//! Kubernetes objects that make up a learner's lab. It handles:
//!
//! - Lab provisioning with rollback when a create fails part way
//! - Teardown on request and time-based reclamation (GC)
//! - Exempting active sessions from GC through a whitelist
//! - Protocol-level health probes of lab presentations
//!
//! # Architecture
//!
//! ```text
//!   LessonScheduleRequest ──► ┌──────────────────────────────┐ ──► LessonScheduleResult
//!        (mpsc channel)       │       LessonScheduler        │       (mpsc channel)
//!                             │  ┌───────────┐ ┌──────────┐  │
//!                             │  │LabRegistry│ │GcWhitelist│ │
//!                             │  └───────────┘ └──────────┘  │
//!                             └──────┬───────────────┬───────┘
//!                                    ▼               ▼
//!                             ┌────────────┐  ┌─────────────┐
//!                             │Provisioner │  │HealthProber │
//!                             └─────┬──────┘  └─────────────┘
//!                                   ▼
//!                             ┌────────────┐
//!                             │  Cluster   │──► Kubernetes API
//!                             └────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use antidote_scheduler::{
//!     KubeCluster, LessonScheduler, NetworkProber, SchedulerConfig,
//! };
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SchedulerConfig::default();
//! let cluster = Arc::new(KubeCluster::new().await?);
//! let prober = Arc::new(NetworkProber::new(Duration::from_secs(2)));
//!
//! let (request_tx, request_rx) = mpsc::channel(128);
//! let (result_tx, mut result_rx) = mpsc::channel(128);
//! let scheduler = Arc::new(LessonScheduler::new(config, cluster, prober, result_tx));
//!
//! tokio::spawn(Arc::clone(&scheduler).start(request_rx));
//! # drop(request_tx);
//!
//! while let Some(result) = result_rx.recv().await {
//!     println!("{:?} {} success={}", result.operation, result.uuid, result.success);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real Kubernetes cluster, enable the `test-utils`
//! feature and use [`MockCluster`] with [`StaticProber`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cluster;
pub mod error;
pub mod health;
pub mod kubelab;
pub mod provisioner;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cluster::{Cluster, KubeCluster, LabObject, ObjectRef, ResourceKind};
pub use error::{FailureKind, Result, SchedulerError};
pub use health::{HealthProber, NetworkProber};
pub use kubelab::{KubeLab, ProvisionedLab};
pub use provisioner::Provisioner;
pub use registry::{GcWhitelist, LabRegistry};
pub use scheduler::LessonScheduler;
pub use types::{
    LabStatus, LessonScheduleRequest, LessonScheduleResult, LiveEndpoint, LiveLesson, Operation,
    OrphanedLab, ScheduleFailure, SchedulerConfig, MIN_GC_INTERVAL,
};

#[cfg(any(test, feature = "test-utils"))]
pub use cluster::mock::MockCluster;
#[cfg(any(test, feature = "test-utils"))]
pub use health::mock::StaticProber;
