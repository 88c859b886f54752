//! Live state of one instantiated lab.

use std::collections::BTreeMap;
use std::sync::Arc;

use antidote_core::{Lesson, SessionId};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};

use crate::cluster::{ObjectRef, ResourceKind};
use crate::types::{LabStatus, LessonScheduleRequest, LiveEndpoint, LiveLesson};

/// Objects created for a lab, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProvisionedLab {
    /// Namespace holding every other object.
    pub namespace: String,
    /// Compute endpoints.
    pub pods: BTreeMap<String, Pod>,
    /// Endpoint services, as stored by the cluster.
    pub services: BTreeMap<String, Service>,
    /// HTTP routes.
    pub ingresses: BTreeMap<String, Ingress>,
    /// Isolation policies.
    pub network_policies: BTreeMap<String, NetworkPolicy>,
}

/// A lab tracked by the registry.
#[derive(Debug, Clone)]
pub struct KubeLab {
    /// The CREATE request the lab was built from.
    pub create_request: LessonScheduleRequest,
    /// Objects that make up the lab.
    pub resources: ProvisionedLab,
    /// Current stage.
    pub current_stage: u32,
    /// Presentations that answered the last probe round.
    pub healthy_tests: usize,
    /// Presentations probed in the last round.
    pub total_tests: usize,
    /// Overall status.
    pub status: LabStatus,
}

impl KubeLab {
    /// Track a freshly provisioned lab.
    #[must_use]
    pub fn new(create_request: LessonScheduleRequest, resources: ProvisionedLab) -> Self {
        let current_stage = create_request.stage;
        Self {
            create_request,
            resources,
            current_stage,
            healthy_tests: 0,
            total_tests: 0,
            status: LabStatus::Initialized,
        }
    }

    /// The lesson the lab was built from.
    #[must_use]
    pub fn lesson(&self) -> &Arc<Lesson> {
        &self.create_request.lesson
    }

    /// The owning session.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.create_request.session_id
    }

    /// Namespace of the lab.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.resources.namespace
    }

    /// Time since the lab was requested.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.create_request.created
    }

    /// Record the outcome of a probe round.
    pub fn record_health(&mut self, healthy: usize, total: usize) {
        self.healthy_tests = healthy;
        self.total_tests = total;
        self.status = LabStatus::from_health(healthy, total);
    }

    /// Every object of the lab, in the order they must be deleted.
    ///
    /// Policies go first and the namespace last, the reverse of creation.
    #[must_use]
    pub fn teardown_order(&self) -> Vec<ObjectRef> {
        let ns = self.namespace();
        let r = &self.resources;
        let groups = [
            (ResourceKind::NetworkPolicy, r.network_policies.keys().collect::<Vec<_>>()),
            (ResourceKind::Ingress, r.ingresses.keys().collect()),
            (ResourceKind::Service, r.services.keys().collect()),
            (ResourceKind::Pod, r.pods.keys().collect()),
        ];

        let mut order = Vec::new();
        for (kind, names) in groups {
            order.extend(names.into_iter().map(|name| ObjectRef::new(kind, ns, name.as_str())));
        }
        order.push(ObjectRef::namespace(ns));
        order
    }

    /// Address an endpoint's presentations are reachable on.
    ///
    /// Prefers the service's cluster IP and falls back to its DNS name.
    #[must_use]
    pub fn endpoint_host(&self, endpoint: &str) -> Option<String> {
        let service = self.resources.services.get(endpoint)?;
        let cluster_ip = service
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.clone())
            .filter(|ip| !ip.is_empty() && ip != "None");
        Some(cluster_ip.unwrap_or_else(|| format!("{endpoint}.{}.svc", self.namespace())))
    }

    /// Learner-facing snapshot.
    #[must_use]
    pub fn to_live_lesson(&self) -> LiveLesson {
        let lesson = self.lesson();
        let live_endpoints = lesson
            .endpoints
            .iter()
            .filter(|ep| !ep.presentations.is_empty())
            .filter_map(|ep| {
                self.endpoint_host(&ep.name).map(|host| LiveEndpoint {
                    name: ep.name.clone(),
                    host,
                    presentations: ep.presentations.clone(),
                })
            })
            .collect();

        LiveLesson {
            lab_id: self.create_request.uuid,
            lesson_id: lesson.lesson_id,
            session_id: self.session_id().clone(),
            live_endpoints,
            lesson_stage: self.current_stage,
            lab_guide: lesson
                .stage(self.current_stage)
                .map(|s| s.description.clone())
                .unwrap_or_default(),
            status: self.status,
            healthy_tests: self.healthy_tests,
            total_tests: self.total_tests,
            created: self.create_request.created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_request;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn lab_with_services() -> KubeLab {
        let request = test_request();
        let mut resources = ProvisionedLab {
            namespace: request.uuid.namespace(),
            ..Default::default()
        };
        for ep in &request.lesson.endpoints {
            resources.pods.insert(ep.name.clone(), Pod::default());
            resources.services.insert(ep.name.clone(), Service::default());
        }
        resources.services.insert(
            "vqfx1".to_string(),
            Service {
                spec: Some(ServiceSpec {
                    cluster_ip: Some("10.96.0.7".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        resources.ingresses.insert("lab-ingress".to_string(), Ingress::default());
        resources
            .network_policies
            .insert("lab-isolation".to_string(), NetworkPolicy::default());
        KubeLab::new(request, resources)
    }

    #[test]
    fn new_lab_starts_initialized_at_requested_stage() {
        let lab = lab_with_services();
        assert_eq!(lab.current_stage, 1);
        assert_eq!(lab.status, LabStatus::Initialized);
        assert_eq!(lab.total_tests, 0);
    }

    #[test]
    fn teardown_reverses_creation_order() {
        let lab = lab_with_services();
        let order = lab.teardown_order();

        assert_eq!(order.len(), 1 + 1 + 5 + 5 + 1);
        assert_eq!(order[0].kind, ResourceKind::NetworkPolicy);
        assert_eq!(order[1].kind, ResourceKind::Ingress);
        assert!(order[2..7].iter().all(|r| r.kind == ResourceKind::Service));
        assert!(order[7..12].iter().all(|r| r.kind == ResourceKind::Pod));
        assert_eq!(order.last(), Some(&ObjectRef::namespace(lab.namespace())));
    }

    #[test]
    fn endpoint_host_prefers_cluster_ip() {
        let lab = lab_with_services();
        assert_eq!(lab.endpoint_host("vqfx1").as_deref(), Some("10.96.0.7"));
        assert_eq!(
            lab.endpoint_host("web1"),
            Some(format!("web1.{}.svc", lab.namespace()))
        );
        assert!(lab.endpoint_host("missing").is_none());
    }

    #[test]
    fn live_lesson_reflects_stage_and_health() {
        let mut lab = lab_with_services();
        lab.record_health(4, 5);

        let live = lab.to_live_lesson();
        assert_eq!(live.lab_guide, "foobar");
        assert_eq!(live.live_endpoints.len(), 5);
        assert_eq!(live.status, LabStatus::Booting);
        assert_eq!((live.healthy_tests, live.total_tests), (4, 5));
    }
}
