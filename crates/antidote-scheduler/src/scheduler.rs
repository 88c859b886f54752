//! The lesson scheduler: request dispatch, lab bookkeeping and GC.

use std::sync::Arc;

use antidote_core::{LabId, PresentationType, SessionId};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cluster::{Cluster, ObjectRef};
use crate::health::{probe, HealthProber};
use crate::kubelab::KubeLab;
use crate::provisioner::Provisioner;
use crate::registry::{GcWhitelist, LabRegistry};
use crate::types::{
    LessonScheduleRequest, LessonScheduleResult, LiveLesson, Operation, OrphanedLab,
    SchedulerConfig, MIN_GC_INTERVAL,
};
use crate::{Result, SchedulerError};

/// One presentation to probe, captured outside the registry lock.
struct ProbeTarget {
    kind: PresentationType,
    host: Option<String>,
    port: u16,
}

/// Provisions, tracks, health-checks and reclaims live labs.
///
/// Requests arrive on a channel consumed by [`LessonScheduler::start`] and
/// run concurrently, one task per request. Each produces exactly one
/// [`LessonScheduleResult`] on the result channel.
pub struct LessonScheduler {
    config: SchedulerConfig,
    cluster: Arc<dyn Cluster>,
    prober: Arc<dyn HealthProber>,
    provisioner: Provisioner,
    labs: LabRegistry,
    whitelist: GcWhitelist,
    orphans: Mutex<Vec<OrphanedLab>>,
    results: mpsc::Sender<LessonScheduleResult>,
}

impl LessonScheduler {
    /// Create a scheduler that reports results on `results`.
    #[must_use]
    pub fn new(
        config: SchedulerConfig,
        cluster: Arc<dyn Cluster>,
        prober: Arc<dyn HealthProber>,
        results: mpsc::Sender<LessonScheduleResult>,
    ) -> Self {
        let provisioner = Provisioner::new(Arc::clone(&cluster), config.clone());
        Self {
            config,
            cluster,
            prober,
            provisioner,
            labs: LabRegistry::new(),
            whitelist: GcWhitelist::new(),
            orphans: Mutex::new(Vec::new()),
            results,
        }
    }

    /// Get the scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run the control loop until the request channel closes.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ClusterUnreachable` if the cluster API
    /// cannot be reached before the first request is accepted.
    pub async fn start(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<LessonScheduleRequest>,
    ) -> Result<()> {
        if let Err(e) = self.cluster.ping().await {
            error!(error = %e, "Cannot reach cluster API, scheduler not started");
            return Err(e);
        }

        info!(
            lesson_ttl_secs = self.config.lesson_ttl.as_secs(),
            disable_gc = self.config.disable_gc,
            "Lesson scheduler started"
        );

        while let Some(request) = requests.recv().await {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                let result = scheduler.handle_request(&request).await;
                if scheduler.results.send(result).await.is_err() {
                    warn!(lab_id = %request.uuid, "Result channel closed, dropping result");
                }
            });
        }

        info!("Request channel closed, lesson scheduler stopping");
        Ok(())
    }

    /// Process one request and build its result.
    pub async fn handle_request(&self, request: &LessonScheduleRequest) -> LessonScheduleResult {
        debug!(
            lab_id = %request.uuid,
            operation = ?request.operation,
            stage = request.stage,
            "Handling schedule request"
        );

        let outcome = match request.operation {
            Operation::Create => self.create_lab(request).await.map(Some),
            Operation::Delete => self.delete_lab(&request.uuid).await.map(|()| None),
            Operation::Modify => self.modify_lab(&request.uuid, request.stage).map(Some),
            Operation::Verify => self.verify_lab(&request.uuid).await.map(Some),
        };

        match outcome {
            Ok(live) => {
                info!(
                    lab_id = %request.uuid,
                    operation = ?request.operation,
                    "Schedule request succeeded"
                );
                LessonScheduleResult::succeeded(request, live)
            }
            Err(e) => {
                warn!(
                    lab_id = %request.uuid,
                    operation = ?request.operation,
                    error = %e,
                    "Schedule request failed"
                );
                LessonScheduleResult::failed(request, &e)
            }
        }
    }

    async fn create_lab(&self, request: &LessonScheduleRequest) -> Result<LiveLesson> {
        let lab_id = request.uuid;
        let lesson = &request.lesson;

        lesson.validate()?;
        if lesson.stage(request.stage).is_none() {
            return Err(SchedulerError::InvalidStage {
                lab_id,
                stage: request.stage,
                stages: lesson.stages.len(),
            });
        }
        if self.labs.contains(&lab_id) {
            return Err(SchedulerError::LabAlreadyExists(lab_id));
        }

        let resources = self.provisioner.create(request).await?;
        let lab = KubeLab::new(request.clone(), resources);
        let live = lab.to_live_lesson();

        // The namespace name is derived from the lab ID, so a second
        // provisioning of the same ID fails at the namespace and never
        // gets here with objects of its own.
        if self.labs.insert_new(lab).is_err() {
            return Err(SchedulerError::LabAlreadyExists(lab_id));
        }

        info!(
            lab_id = %lab_id,
            lesson_id = %lesson.lesson_id,
            session_id = %request.session_id,
            "Lab registered"
        );
        Ok(live)
    }

    async fn delete_lab(&self, lab_id: &LabId) -> Result<()> {
        let lab = self
            .labs
            .remove(lab_id)
            .ok_or(SchedulerError::LabNotFound(*lab_id))?;

        let failed = self.teardown(&lab).await;
        if failed.is_empty() {
            info!(lab_id = %lab_id, "Lab deleted");
            Ok(())
        } else {
            Err(SchedulerError::TeardownFailed {
                lab_id: *lab_id,
                failed,
            })
        }
    }

    fn modify_lab(&self, lab_id: &LabId, stage: u32) -> Result<LiveLesson> {
        self.labs
            .update(lab_id, |lab| {
                if lab.lesson().stage(stage).is_none() {
                    return Err(SchedulerError::InvalidStage {
                        lab_id: *lab_id,
                        stage,
                        stages: lab.lesson().stages.len(),
                    });
                }
                lab.current_stage = stage;
                Ok(lab.to_live_lesson())
            })
            .ok_or(SchedulerError::LabNotFound(*lab_id))?
    }

    async fn verify_lab(&self, lab_id: &LabId) -> Result<LiveLesson> {
        let lab = self
            .labs
            .get(lab_id)
            .ok_or(SchedulerError::LabNotFound(*lab_id))?;

        let targets: Vec<ProbeTarget> = lab
            .lesson()
            .endpoints
            .iter()
            .flat_map(|ep| {
                let host = lab.endpoint_host(&ep.name);
                ep.presentations.iter().map(move |p| ProbeTarget {
                    kind: p.kind,
                    host: host.clone(),
                    port: p.port,
                })
            })
            .collect();

        let prober = self.prober.as_ref();
        let answers = join_all(targets.iter().map(|t| async move {
            match &t.host {
                Some(host) => probe(prober, t.kind, host, t.port).await,
                None => false,
            }
        }))
        .await;

        let total = answers.len();
        let healthy = answers.into_iter().filter(|ok| *ok).count();
        debug!(lab_id = %lab_id, healthy, total, "Probed lab presentations");

        self.labs
            .update(lab_id, |lab| {
                lab.record_health(healthy, total);
                lab.to_live_lesson()
            })
            .ok_or(SchedulerError::LabNotFound(*lab_id))
    }

    /// Delete every object of a lab, recording an orphan if any delete fails.
    async fn teardown(&self, lab: &KubeLab) -> Vec<ObjectRef> {
        let failed = self.provisioner.delete(&lab.teardown_order()).await;
        if !failed.is_empty() {
            error!(
                lab_id = %lab.create_request.uuid,
                namespace = %lab.namespace(),
                failed = failed.len(),
                "Lab teardown left objects behind"
            );
            self.orphans.lock().push(OrphanedLab {
                lab_id: lab.create_request.uuid,
                namespace: lab.namespace().to_string(),
                objects: failed.clone(),
                recorded_at: Utc::now(),
            });
        }
        failed
    }

    /// Reclaim every lab older than the TTL whose session is not whitelisted.
    ///
    /// Returns the IDs removed from the registry. A lab whose teardown
    /// partly fails is still removed and listed; its leftovers show up in
    /// [`LessonScheduler::orphans`].
    pub async fn purge_old_lessons(&self) -> Vec<LabId> {
        self.purge_expired_at(Utc::now()).await
    }

    /// Run a GC sweep as if the current time were `now`.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Vec<LabId> {
        let exempt = self.whitelist.snapshot();
        let expired = self
            .labs
            .take_expired(now, self.config.lesson_ttl_chrono(), &exempt);

        if expired.is_empty() {
            debug!("GC sweep found no expired labs");
            return Vec::new();
        }

        join_all(expired.iter().map(|lab| async move {
            self.teardown(lab).await;
            info!(
                lab_id = %lab.create_request.uuid,
                session_id = %lab.session_id(),
                age_secs = lab.age(now).num_seconds(),
                "Reclaimed expired lab"
            );
            lab.create_request.uuid
        }))
        .await
    }

    /// Run [`LessonScheduler::purge_old_lessons`] every `gc_interval`,
    /// never more often than [`MIN_GC_INTERVAL`].
    pub async fn run_gc(self: Arc<Self>) {
        let period = self.config.gc_interval.max(MIN_GC_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            interval_secs = period.as_secs(),
            "Starting lab GC loop"
        );

        loop {
            ticker.tick().await;
            let reclaimed = self.purge_old_lessons().await;
            if !reclaimed.is_empty() {
                info!(reclaimed = reclaimed.len(), remaining = self.labs.len(), "GC sweep finished");
            }
        }
    }

    /// Exempt a session's labs from GC.
    pub fn add_session_to_gc_whitelist(&self, session: SessionId) {
        if self.whitelist.add(session.clone()) {
            debug!(session_id = %session, "Session added to GC whitelist");
        }
    }

    /// Lift a session's GC exemption. Removing a non-member is a no-op.
    pub fn remove_session_from_gc_whitelist(&self, session: &SessionId) {
        if self.whitelist.remove(session) {
            debug!(session_id = %session, "Session removed from GC whitelist");
        }
    }

    /// Whitelisted sessions, sorted.
    #[must_use]
    pub fn gc_whitelist(&self) -> Vec<SessionId> {
        self.whitelist.list()
    }

    /// Snapshot of one live lab.
    #[must_use]
    pub fn live_lesson(&self, lab_id: &LabId) -> Option<LiveLesson> {
        self.labs.get(lab_id).map(|lab| lab.to_live_lesson())
    }

    /// Snapshots of every live lab, oldest first.
    #[must_use]
    pub fn list_live_lessons(&self) -> Vec<LiveLesson> {
        let mut lessons: Vec<_> = self
            .labs
            .snapshot()
            .iter()
            .map(KubeLab::to_live_lesson)
            .collect();
        lessons.sort_by_key(|l| (l.created, l.lab_id));
        lessons
    }

    /// Copy of a registered lab.
    #[must_use]
    pub fn lab(&self, lab_id: &LabId) -> Option<KubeLab> {
        self.labs.get(lab_id)
    }

    /// Number of live labs.
    #[must_use]
    pub fn lab_count(&self) -> usize {
        self.labs.len()
    }

    /// Labs whose teardown left objects in the cluster.
    #[must_use]
    pub fn orphans(&self) -> Vec<OrphanedLab> {
        self.orphans.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockCluster;
    use crate::cluster::ResourceKind;
    use crate::error::FailureKind;
    use crate::health::mock::StaticProber;
    use crate::testing::{test_request, test_request_for_session};
    use crate::types::LabStatus;
    use std::collections::HashSet;
    use std::time::Duration;

    struct Harness {
        scheduler: Arc<LessonScheduler>,
        cluster: Arc<MockCluster>,
        prober: Arc<StaticProber>,
        results: mpsc::Receiver<LessonScheduleResult>,
    }

    fn harness(config: SchedulerConfig) -> Harness {
        let cluster = Arc::new(MockCluster::new());
        let prober = Arc::new(StaticProber::new());
        let (tx, results) = mpsc::channel(16);
        let scheduler = Arc::new(LessonScheduler::new(
            config,
            cluster.clone(),
            prober.clone(),
            tx,
        ));
        Harness {
            scheduler,
            cluster,
            prober,
            results,
        }
    }

    fn default_harness() -> Harness {
        harness(SchedulerConfig::default())
    }

    async fn create(h: &Harness, session: &str) -> LabId {
        let request = test_request_for_session(session);
        let result = h.scheduler.handle_request(&request).await;
        assert!(result.success, "create failed: {:?}", result.error);
        request.uuid
    }

    fn assert_lab_objects(cluster: &MockCluster, lab_id: &LabId) {
        let ns = lab_id.namespace();
        assert_eq!(cluster.count(ResourceKind::Pod, &ns), 5);
        assert_eq!(cluster.count(ResourceKind::Service, &ns), 5);
        assert_eq!(cluster.count(ResourceKind::Ingress, &ns), 1);
        assert_eq!(cluster.count(ResourceKind::NetworkPolicy, &ns), 1);
    }

    #[tokio::test]
    async fn five_labs_are_created_then_purged() {
        let h = default_harness();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(create(&h, "session-1").await);
        }

        assert_eq!(h.scheduler.lab_count(), 5);
        for id in &ids {
            assert_lab_objects(&h.cluster, id);
            let lab = h.scheduler.lab(id).unwrap();
            assert_eq!(lab.resources.pods.len(), 5);
            assert_eq!(lab.resources.services.len(), 5);
            assert_eq!(lab.resources.ingresses.len(), 1);
            assert_eq!(lab.resources.network_policies.len(), 1);
        }

        let an_hour_later = Utc::now() + chrono::Duration::hours(1);
        let mut purged = h.scheduler.purge_expired_at(an_hour_later).await;
        purged.sort();
        ids.sort();

        assert_eq!(purged, ids);
        assert_eq!(h.scheduler.lab_count(), 0);
        assert_eq!(h.cluster.object_count(), 0);
        assert!(h.scheduler.purge_expired_at(an_hour_later).await.is_empty());
    }

    #[tokio::test]
    async fn purge_leaves_fresh_labs_alone() {
        let h = default_harness();
        create(&h, "session-1").await;

        assert!(h.scheduler.purge_old_lessons().await.is_empty());
        assert_eq!(h.scheduler.lab_count(), 1);
    }

    #[tokio::test]
    async fn whitelisted_sessions_survive_gc() {
        let h = default_harness();
        let kept = create(&h, "kept").await;
        let dropped = create(&h, "dropped").await;
        let session = SessionId::new("kept").unwrap();

        h.scheduler.add_session_to_gc_whitelist(session.clone());
        h.scheduler.add_session_to_gc_whitelist(session.clone());
        assert_eq!(h.scheduler.gc_whitelist(), vec![session.clone()]);

        let later = Utc::now() + chrono::Duration::days(7);
        assert_eq!(h.scheduler.purge_expired_at(later).await, vec![dropped]);
        assert!(h.scheduler.live_lesson(&kept).is_some());

        h.scheduler.remove_session_from_gc_whitelist(&session);
        h.scheduler.remove_session_from_gc_whitelist(&session);
        assert_eq!(h.scheduler.purge_expired_at(later).await, vec![kept]);
    }

    #[tokio::test]
    async fn delete_then_delete_again_is_not_found() {
        let h = default_harness();
        let request = test_request();
        assert!(h.scheduler.handle_request(&request).await.success);

        let delete = request.follow_up(Operation::Delete, request.stage);
        let first = h.scheduler.handle_request(&delete).await;
        assert!(first.success);
        assert!(first.live_lesson.is_none());
        assert_eq!(h.cluster.object_count(), 0);

        let second = h.scheduler.handle_request(&delete).await;
        assert!(!second.success);
        assert_eq!(second.failure_kind(), Some(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn unknown_labs_are_not_found() {
        let h = default_harness();
        let request = test_request();

        for op in [Operation::Delete, Operation::Modify, Operation::Verify] {
            let result = h.scheduler.handle_request(&request.follow_up(op, 0)).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::NotFound), "{op:?}");
        }
        assert!(h.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let h = default_harness();
        let request = test_request();

        assert!(h.scheduler.handle_request(&request).await.success);
        let again = h.scheduler.handle_request(&request).await;

        assert_eq!(again.failure_kind(), Some(FailureKind::AlreadyExists));
        assert_eq!(h.scheduler.lab_count(), 1);
        assert_lab_objects(&h.cluster, &request.uuid);
    }

    #[tokio::test]
    async fn failed_create_rolls_back_and_is_not_registered() {
        let h = default_harness();
        h.cluster.fail_creates(ResourceKind::NetworkPolicy);
        let request = test_request();

        let result = h.scheduler.handle_request(&request).await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Provisioning));
        assert_eq!(h.scheduler.lab_count(), 0);
        assert_eq!(h.cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn invalid_stage_is_rejected_before_provisioning() {
        let h = default_harness();
        let mut request = test_request();
        request.stage = 7;

        let result = h.scheduler.handle_request(&request).await;

        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidRequest));
        assert!(h.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_endpoint_with_reused_port() {
        let h = default_harness();
        let mut request = test_request();
        let mut lesson = (*request.lesson).clone();
        let extra = lesson.endpoints[0].presentations[0].clone();
        lesson.endpoints[0].presentations.push(extra);
        request.lesson = Arc::new(lesson);

        let result = h.scheduler.handle_request(&request).await;

        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidRequest));
        assert!(h.cluster.calls().is_empty());
        assert_eq!(h.scheduler.lab_count(), 0);
    }

    #[tokio::test]
    async fn modify_moves_lab_to_another_stage() {
        let h = default_harness();
        let request = test_request();
        h.scheduler.handle_request(&request).await;

        let result = h
            .scheduler
            .handle_request(&request.follow_up(Operation::Modify, 0))
            .await;
        assert!(result.success);
        let live = result.live_lesson.unwrap();
        assert_eq!(live.lesson_stage, 0);
        assert_eq!(live.lab_guide, "");

        let result = h
            .scheduler
            .handle_request(&request.follow_up(Operation::Modify, 2))
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidRequest));
        assert_eq!(h.scheduler.lab(&request.uuid).unwrap().current_stage, 0);
    }

    #[tokio::test]
    async fn verify_counts_healthy_presentations() {
        let h = default_harness();
        let request = test_request();
        h.scheduler.handle_request(&request).await;
        let verify = request.follow_up(Operation::Verify, request.stage);

        let down = h.scheduler.lab(&request.uuid).unwrap().endpoint_host("vqfx1").unwrap();
        h.prober.set_down(down.clone());

        let live = h.scheduler.handle_request(&verify).await.live_lesson.unwrap();
        assert_eq!((live.healthy_tests, live.total_tests), (4, 5));
        assert_eq!(live.status, LabStatus::Booting);
        assert_eq!(h.prober.shell_calls(), 4);
        assert_eq!(h.prober.tcp_calls(), 1);

        h.prober.set_up(&down);
        let live = h.scheduler.handle_request(&verify).await.live_lesson.unwrap();
        assert_eq!((live.healthy_tests, live.total_tests), (5, 5));
        assert_eq!(live.status, LabStatus::Ready);
        assert_eq!(h.scheduler.live_lesson(&request.uuid).unwrap().status, LabStatus::Ready);
    }

    #[tokio::test]
    async fn failed_teardown_is_recorded_as_orphan() {
        let h = default_harness();
        let request = test_request();
        h.scheduler.handle_request(&request).await;
        h.cluster.fail_deletes(ResourceKind::Pod);

        let result = h
            .scheduler
            .handle_request(&request.follow_up(Operation::Delete, request.stage))
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::Teardown));
        assert_eq!(h.scheduler.lab_count(), 0);

        let orphans = h.scheduler.orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].lab_id, request.uuid);
        assert_eq!(orphans[0].objects.len(), 5);
    }

    #[tokio::test]
    async fn gc_continues_past_teardown_failures() {
        let h = default_harness();
        create(&h, "a").await;
        create(&h, "b").await;
        h.cluster.fail_deletes(ResourceKind::Service);

        let purged = h
            .scheduler
            .purge_expired_at(Utc::now() + chrono::Duration::hours(1))
            .await;

        assert_eq!(purged.len(), 2);
        assert_eq!(h.scheduler.lab_count(), 0);
        assert_eq!(h.scheduler.orphans().len(), 2);
    }

    #[tokio::test]
    async fn start_fails_when_cluster_unreachable() {
        let h = default_harness();
        h.cluster.set_unreachable(true);
        let (_tx, rx) = mpsc::channel(1);

        let err = Arc::clone(&h.scheduler).start(rx).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ClusterUnreachable(_)));
    }

    #[tokio::test]
    async fn start_runs_requests_concurrently() {
        let mut h = default_harness();
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(Arc::clone(&h.scheduler).start(rx));

        let mut sent = HashSet::new();
        for i in 0..5 {
            let request = test_request_for_session(&format!("learner-{i}"));
            sent.insert(request.uuid);
            tx.send(request).await.unwrap();
        }

        let mut received = HashSet::new();
        for _ in 0..5 {
            let result = h.results.recv().await.unwrap();
            assert!(result.success);
            assert_eq!(result.operation, Operation::Create);
            received.insert(result.uuid);
        }

        assert_eq!(received, sent);
        assert_eq!(h.scheduler.lab_count(), 5);
        assert_eq!(h.cluster.namespaces().len(), 5);
        for id in &sent {
            assert_lab_objects(&h.cluster, id);
        }

        drop(tx);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_create_does_not_hold_up_verify() {
        let mut h = default_harness();
        let ready = test_request_for_session("ready-learner");
        assert!(h.scheduler.handle_request(&ready).await.success);

        h.cluster
            .delay_creates(ResourceKind::Namespace, Duration::from_secs(60));
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(Arc::clone(&h.scheduler).start(rx));

        let slow = test_request_for_session("slow-learner");
        tx.send(slow.clone()).await.unwrap();
        tx.send(ready.follow_up(Operation::Verify, ready.stage))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let first = h.results.recv().await.unwrap();
        assert_eq!(first.operation, Operation::Verify);
        assert_eq!(first.uuid, ready.uuid);
        assert!(first.success);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(h.scheduler.lab(&slow.uuid).is_none());

        let second = h.results.recv().await.unwrap();
        assert_eq!(second.operation, Operation::Create);
        assert_eq!(second.uuid, slow.uuid);
        assert!(second.success);
        assert_eq!(h.scheduler.lab_count(), 2);

        drop(tx);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn live_lessons_are_listed_oldest_first() {
        let h = default_harness();
        let mut older = test_request();
        older.created = Utc::now() - chrono::Duration::minutes(5);
        h.scheduler.handle_request(&older).await;
        let newer = create(&h, "session-2").await;

        let listed: Vec<_> = h
            .scheduler
            .list_live_lessons()
            .into_iter()
            .map(|l| l.lab_id)
            .collect();
        assert_eq!(listed, vec![older.uuid, newer]);
    }

    #[tokio::test(start_paused = true)]
    async fn gc_loop_reclaims_expired_labs() {
        let config = SchedulerConfig {
            gc_interval: Duration::from_secs(60),
            ..SchedulerConfig::default()
        };
        let h = harness(config);
        let mut request = test_request();
        request.created = Utc::now() - chrono::Duration::hours(1);
        h.scheduler.handle_request(&request).await;

        let gc = tokio::spawn(Arc::clone(&h.scheduler).run_gc());
        for _ in 0..10 {
            if h.scheduler.lab_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
        }

        assert_eq!(h.scheduler.lab_count(), 0);
        gc.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn gc_loop_survives_zero_interval() {
        let config = SchedulerConfig {
            gc_interval: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        let h = harness(config);
        let mut request = test_request();
        request.created = Utc::now() - chrono::Duration::hours(1);
        h.scheduler.handle_request(&request).await;

        let gc = tokio::spawn(Arc::clone(&h.scheduler).run_gc());
        for _ in 0..5 {
            if h.scheduler.lab_count() == 0 {
                break;
            }
            tokio::time::sleep(MIN_GC_INTERVAL).await;
        }

        assert_eq!(h.scheduler.lab_count(), 0);
        assert!(!gc.is_finished());
        gc.abort();
    }
}
