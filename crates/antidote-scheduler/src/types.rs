//! Types for the scheduler crate.

use std::sync::Arc;
use std::time::Duration;

use antidote_core::{LabId, Lesson, LessonId, Presentation, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::ObjectRef;
use crate::error::{FailureKind, SchedulerError};

/// What a schedule request asks the scheduler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Provision a new lab.
    Create,
    /// Tear down an existing lab.
    Delete,
    /// Move an existing lab to another stage.
    Modify,
    /// Probe an existing lab's presentations.
    Verify,
}

/// A unit of work for the scheduler.
///
/// Requests are consumed exactly once and always produce exactly one
/// [`LessonScheduleResult`].
#[derive(Debug, Clone)]
pub struct LessonScheduleRequest {
    /// Lesson the lab is built from.
    pub lesson: Arc<Lesson>,
    /// Requested operation.
    pub operation: Operation,
    /// Target stage index.
    pub stage: u32,
    /// Lab identifier.
    pub uuid: LabId,
    /// Learner session that owns the lab.
    pub session_id: SessionId,
    /// When the request was made. For CREATE this starts the lab's TTL.
    pub created: DateTime<Utc>,
}

impl LessonScheduleRequest {
    /// Build a request for a brand new lab.
    #[must_use]
    pub fn create(lesson: Arc<Lesson>, session_id: SessionId, stage: u32) -> Self {
        Self {
            lesson,
            operation: Operation::Create,
            stage,
            uuid: LabId::generate(),
            session_id,
            created: Utc::now(),
        }
    }

    /// Build a follow-up request against the same lab.
    #[must_use]
    pub fn follow_up(&self, operation: Operation, stage: u32) -> Self {
        Self {
            lesson: Arc::clone(&self.lesson),
            operation,
            stage,
            uuid: self.uuid,
            session_id: self.session_id.clone(),
            created: Utc::now(),
        }
    }
}

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleFailure {
    /// Failure class.
    pub kind: FailureKind,
    /// Human-readable error.
    pub message: String,
}

/// Outcome of processing one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonScheduleResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Echo of the request's operation.
    pub operation: Operation,
    /// Lab the request targeted.
    pub uuid: LabId,
    /// Lesson the request targeted.
    pub lesson_id: LessonId,
    /// Stage the request targeted.
    pub stage: u32,
    /// Failure detail, set when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScheduleFailure>,
    /// Snapshot of the lab after the operation, if it is still live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_lesson: Option<LiveLesson>,
}

impl LessonScheduleResult {
    /// A successful result for `request`.
    #[must_use]
    pub fn succeeded(request: &LessonScheduleRequest, live_lesson: Option<LiveLesson>) -> Self {
        Self {
            success: true,
            operation: request.operation,
            uuid: request.uuid,
            lesson_id: request.lesson.lesson_id,
            stage: request.stage,
            error: None,
            live_lesson,
        }
    }

    /// A failed result for `request`.
    #[must_use]
    pub fn failed(request: &LessonScheduleRequest, error: &SchedulerError) -> Self {
        Self {
            success: false,
            operation: request.operation,
            uuid: request.uuid,
            lesson_id: request.lesson.lesson_id,
            stage: request.stage,
            error: Some(ScheduleFailure {
                kind: error.failure_kind(),
                message: error.to_string(),
            }),
            live_lesson: None,
        }
    }

    /// The failure class, if the request failed.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Overall status of a live lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    /// Objects exist but have never been probed.
    #[default]
    Initialized,
    /// Probed at least once; not every presentation answered.
    Booting,
    /// Every presentation answered its last probe.
    Ready,
}

impl LabStatus {
    /// Status implied by a probe round.
    #[must_use]
    pub const fn from_health(healthy: usize, total: usize) -> Self {
        if healthy == total {
            Self::Ready
        } else {
            Self::Booting
        }
    }
}

/// A reachable endpoint of a live lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEndpoint {
    /// Endpoint name.
    pub name: String,
    /// Address the presentations are reachable on.
    pub host: String,
    /// Exposed interfaces.
    pub presentations: Vec<Presentation>,
}

/// Serializable snapshot of a live lab, as shown to the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveLesson {
    /// Lab identifier.
    pub lab_id: LabId,
    /// Lesson the lab was built from.
    pub lesson_id: LessonId,
    /// Owning session.
    pub session_id: SessionId,
    /// Endpoints with at least one presentation.
    pub live_endpoints: Vec<LiveEndpoint>,
    /// Current stage.
    pub lesson_stage: u32,
    /// Lab guide of the current stage.
    pub lab_guide: String,
    /// Overall status.
    pub status: LabStatus,
    /// Presentations that answered the last probe.
    pub healthy_tests: usize,
    /// Presentations probed.
    pub total_tests: usize,
    /// When the lab was requested.
    pub created: DateTime<Utc>,
}

/// A lab whose teardown left objects behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedLab {
    /// Lab that was torn down.
    pub lab_id: LabId,
    /// Its namespace.
    pub namespace: String,
    /// Objects whose delete failed.
    pub objects: Vec<ObjectRef>,
    /// When the failure was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Shortest period the GC loop will tick at.
pub const MIN_GC_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the lesson scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Age after which a lab is reclaimed by GC.
    pub lesson_ttl: Duration,
    /// Interval between periodic GC sweeps.
    pub gc_interval: Duration,
    /// Disable the periodic GC sweep.
    pub disable_gc: bool,
    /// Timeout of a single health probe.
    pub probe_timeout: Duration,
    /// Base DNS domain for lab ingress hosts.
    pub domain: String,
    /// Ingress class of lab ingresses.
    pub ingress_class: String,
    /// Namespace of the ingress controller, allowed through lab isolation policies.
    pub ingress_namespace: String,
    /// Capacity of the request and result queues.
    pub request_queue_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lesson_ttl: Duration::from_secs(30 * 60),
            gc_interval: Duration::from_secs(5 * 60),
            disable_gc: false,
            probe_timeout: Duration::from_secs(2),
            domain: "antidote.local".to_string(),
            ingress_class: "nginx".to_string(),
            ingress_namespace: "ingress-nginx".to_string(),
            request_queue_depth: 128,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `LESSON_TTL_MINUTES`: Age in minutes after which labs are reclaimed
    /// - `GC_INTERVAL_SECS`: Seconds between GC sweeps
    /// - `DISABLE_GC`: `true`/`1` to disable periodic GC
    /// - `PROBE_TIMEOUT_MS`: Health probe timeout in milliseconds
    /// - `ANTIDOTE_DOMAIN`: Base domain for lab ingress hosts
    /// - `INGRESS_CLASS`: Ingress class name
    /// - `INGRESS_NAMESPACE`: Namespace of the ingress controller
    /// - `REQUEST_QUEUE_DEPTH`: Capacity of the request and result queues
    ///
    /// Values that fail to parse keep their default. A zero GC interval is
    /// raised to [`MIN_GC_INTERVAL`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());
        let mut config = Self::default();

        if let Some(n) = parse("LESSON_TTL_MINUTES") {
            config.lesson_ttl = Duration::from_secs(n.saturating_mul(60));
        }
        if let Some(n) = parse("GC_INTERVAL_SECS") {
            config.gc_interval = Duration::from_secs(n).max(MIN_GC_INTERVAL);
        }
        if let Some(val) = lookup("DISABLE_GC") {
            config.disable_gc = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(n) = parse("PROBE_TIMEOUT_MS") {
            config.probe_timeout = Duration::from_millis(n);
        }
        if let Some(val) = lookup("ANTIDOTE_DOMAIN") {
            config.domain = val;
        }
        if let Some(val) = lookup("INGRESS_CLASS") {
            config.ingress_class = val;
        }
        if let Some(val) = lookup("INGRESS_NAMESPACE") {
            config.ingress_namespace = val;
        }
        if let Some(n) = lookup("REQUEST_QUEUE_DEPTH").and_then(|v| v.parse::<usize>().ok()) {
            config.request_queue_depth = n.max(1);
        }

        config
    }

    /// TTL as a chrono duration, for comparisons against request timestamps.
    #[must_use]
    pub fn lesson_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lesson_ttl).unwrap_or(chrono::Duration::MAX)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use antidote_core::LessonStage;

    fn lesson() -> Arc<Lesson> {
        Arc::new(Lesson {
            lesson_id: LessonId(7),
            lesson_name: "Tiny".to_string(),
            stages: vec![LessonStage {
                id: 0,
                description: String::new(),
            }],
            endpoints: vec![],
            connections: vec![],
            category: String::new(),
            tier: String::new(),
        })
    }

    #[test]
    fn scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.lesson_ttl, Duration::from_secs(1800));
        assert!(!config.disable_gc);
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.lesson_ttl_chrono(), chrono::Duration::minutes(30));
    }

    fn config_from(vars: &[(&str, &str)]) -> SchedulerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        SchedulerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn zero_gc_interval_is_raised_to_minimum() {
        let config = config_from(&[("GC_INTERVAL_SECS", "0")]);
        assert_eq!(config.gc_interval, MIN_GC_INTERVAL);

        let config = config_from(&[("GC_INTERVAL_SECS", "90")]);
        assert_eq!(config.gc_interval, Duration::from_secs(90));
    }

    #[test]
    fn huge_ttl_saturates() {
        let max = u64::MAX.to_string();
        let config = config_from(&[("LESSON_TTL_MINUTES", max.as_str())]);
        assert_eq!(config.lesson_ttl, Duration::from_secs(u64::MAX));
        assert_eq!(config.lesson_ttl_chrono(), chrono::Duration::MAX);

        let config = config_from(&[("LESSON_TTL_MINUTES", "5")]);
        assert_eq!(config.lesson_ttl, Duration::from_secs(300));
    }

    #[test]
    fn unparsable_values_keep_defaults() {
        let config = config_from(&[
            ("GC_INTERVAL_SECS", "soon"),
            ("REQUEST_QUEUE_DEPTH", "0"),
            ("DISABLE_GC", "TRUE"),
        ]);
        let defaults = SchedulerConfig::default();
        assert_eq!(config.gc_interval, defaults.gc_interval);
        assert_eq!(config.request_queue_depth, 1);
        assert!(config.disable_gc);
    }

    #[test]
    fn lab_status_from_health() {
        assert_eq!(LabStatus::from_health(3, 3), LabStatus::Ready);
        assert_eq!(LabStatus::from_health(2, 3), LabStatus::Booting);
        assert_eq!(LabStatus::default(), LabStatus::Initialized);
    }

    #[test]
    fn follow_up_keeps_lab_identity() {
        let session = SessionId::new("s1").unwrap();
        let create = LessonScheduleRequest::create(lesson(), session.clone(), 0);
        let verify = create.follow_up(Operation::Verify, 0);

        assert_eq!(verify.uuid, create.uuid);
        assert_eq!(verify.session_id, session);
        assert_eq!(verify.operation, Operation::Verify);
    }

    #[test]
    fn failed_result_carries_kind() {
        let request = LessonScheduleRequest::create(lesson(), SessionId::new("s1").unwrap(), 0);
        let result =
            LessonScheduleResult::failed(&request, &SchedulerError::LabNotFound(request.uuid));

        assert!(!result.success);
        assert_eq!(result.operation, Operation::Create);
        assert_eq!(result.failure_kind(), Some(FailureKind::NotFound));
        assert!(result.live_lesson.is_none());
    }

    #[test]
    fn result_json_shape() {
        let request = LessonScheduleRequest::create(lesson(), SessionId::new("s1").unwrap(), 0);
        let result =
            LessonScheduleResult::failed(&request, &SchedulerError::LabNotFound(request.uuid));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["operation"], "create");
        assert_eq!(json["uuid"], request.uuid.to_string());
        assert_eq!(json["lesson_id"], 7);
        assert_eq!(json["error"]["kind"], "not_found");
        assert!(json.get("live_lesson").is_none());
    }
}
