//! Turns a lesson into cluster objects and removes them again.
//!
//! Creation order is namespace, pods, services, ingress, network policy.
//! Every object created is pushed onto a compensation list; if any create
//! fails, the list is deleted in reverse before the error is returned.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cluster::{Cluster, LabObject, ObjectRef};
use crate::kubelab::ProvisionedLab;
use crate::resources::{
    build_ingress, build_namespace, build_network_policy, build_pod, build_service,
};
use crate::types::{LessonScheduleRequest, SchedulerConfig};
use crate::{Result, SchedulerError};

/// Issues create and delete calls for lab objects.
pub struct Provisioner {
    cluster: Arc<dyn Cluster>,
    config: SchedulerConfig,
}

impl Provisioner {
    /// Create a provisioner over a cluster.
    #[must_use]
    pub fn new(cluster: Arc<dyn Cluster>, config: SchedulerConfig) -> Self {
        Self { cluster, config }
    }

    /// Create every object of the lab described by `request`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ProvisioningFailed` if any create call fails.
    /// Objects created before the failure have been deleted again on a
    /// best-effort basis.
    pub async fn create(&self, request: &LessonScheduleRequest) -> Result<ProvisionedLab> {
        let mut created = Vec::new();
        match self.create_all(request, &mut created).await {
            Ok(lab) => {
                info!(
                    lab_id = %request.uuid,
                    namespace = %lab.namespace,
                    objects = created.len(),
                    "Provisioned lab"
                );
                Ok(lab)
            }
            Err(e) => {
                warn!(
                    lab_id = %request.uuid,
                    error = %e,
                    rollback = created.len(),
                    "Provisioning failed, rolling back"
                );
                created.reverse();
                let leftover = self.delete(&created).await;
                if !leftover.is_empty() {
                    error!(
                        lab_id = %request.uuid,
                        leftover = leftover.len(),
                        "Rollback left objects behind"
                    );
                }
                Err(SchedulerError::ProvisioningFailed {
                    lab_id: request.uuid,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn create_all(
        &self,
        request: &LessonScheduleRequest,
        created: &mut Vec<ObjectRef>,
    ) -> Result<ProvisionedLab> {
        let mut lab = ProvisionedLab {
            namespace: request.uuid.namespace(),
            ..Default::default()
        };

        self.create_one(LabObject::Namespace(build_namespace(request)), created)
            .await?;

        for endpoint in &request.lesson.endpoints {
            if let LabObject::Pod(pod) = self
                .create_one(LabObject::Pod(build_pod(request, endpoint)), created)
                .await?
            {
                lab.pods.insert(endpoint.name.clone(), pod);
            }
        }

        for endpoint in &request.lesson.endpoints {
            let Some(service) = build_service(request, endpoint) else {
                continue;
            };
            if let LabObject::Service(service) =
                self.create_one(LabObject::Service(service), created).await?
            {
                lab.services.insert(endpoint.name.clone(), service);
            }
        }

        let ingress = build_ingress(request, &self.config);
        if let LabObject::Ingress(ingress) =
            self.create_one(LabObject::Ingress(ingress), created).await?
        {
            let name = ingress.metadata.name.clone().unwrap_or_default();
            lab.ingresses.insert(name, ingress);
        }

        let policy = build_network_policy(request, &self.config);
        if let LabObject::NetworkPolicy(policy) = self
            .create_one(LabObject::NetworkPolicy(policy), created)
            .await?
        {
            let name = policy.metadata.name.clone().unwrap_or_default();
            lab.network_policies.insert(name, policy);
        }

        Ok(lab)
    }

    async fn create_one(&self, object: LabObject, created: &mut Vec<ObjectRef>) -> Result<LabObject> {
        let target = object.object_ref()?;
        let stored = self.cluster.create(object).await?;
        debug!(object = %target, "Created lab object");
        created.push(target);
        Ok(stored)
    }

    /// Delete objects in the given order.
    ///
    /// Every object is attempted; absent objects count as deleted. Returns
    /// the objects whose delete failed.
    pub async fn delete(&self, objects: &[ObjectRef]) -> Vec<ObjectRef> {
        let mut failed = Vec::new();
        for object in objects {
            if let Err(e) = self.cluster.delete(object).await {
                error!(object = %object, error = %e, "Failed to delete lab object");
                failed.push(object.clone());
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{Call, MockCluster};
    use crate::cluster::ResourceKind;
    use crate::kubelab::KubeLab;
    use crate::testing::test_request;

    fn provisioner() -> (Arc<MockCluster>, Provisioner) {
        let cluster = Arc::new(MockCluster::new());
        let provisioner = Provisioner::new(cluster.clone(), SchedulerConfig::default());
        (cluster, provisioner)
    }

    fn created_kinds(cluster: &MockCluster) -> Vec<ResourceKind> {
        cluster
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(r) => Some(r.kind),
                Call::Delete(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn create_builds_full_topology_in_order() {
        let (cluster, provisioner) = provisioner();
        let request = test_request();
        let ns = request.uuid.namespace();

        let lab = provisioner.create(&request).await.unwrap();

        assert_eq!(lab.namespace, ns);
        assert_eq!(lab.pods.len(), 5);
        assert_eq!(lab.services.len(), 5);
        assert_eq!(lab.ingresses.len(), 1);
        assert_eq!(lab.network_policies.len(), 1);
        assert_eq!(cluster.count(ResourceKind::Pod, &ns), 5);
        assert_eq!(cluster.count(ResourceKind::Service, &ns), 5);

        let kinds = created_kinds(&cluster);
        assert_eq!(kinds.first(), Some(&ResourceKind::Namespace));
        assert_eq!(kinds.last(), Some(&ResourceKind::NetworkPolicy));
        assert!(kinds.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn create_keeps_assigned_service_addresses() {
        let (_cluster, provisioner) = provisioner();
        let lab = provisioner.create(&test_request()).await.unwrap();

        let ip = lab.services["vqfx1"]
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.clone());
        assert!(ip.is_some_and(|ip| ip.starts_with("10.96.")));
    }

    #[tokio::test]
    async fn create_rolls_back_on_failure() {
        let (cluster, provisioner) = provisioner();
        cluster.fail_creates(ResourceKind::Ingress);
        let request = test_request();

        let err = provisioner.create(&request).await.unwrap_err();

        assert!(matches!(err, SchedulerError::ProvisioningFailed { lab_id, .. } if lab_id == request.uuid));
        assert_eq!(cluster.object_count(), 0);

        let deletes: Vec<_> = cluster
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(r) => Some(r),
                Call::Create(_) => None,
            })
            .collect();
        assert_eq!(deletes.len(), 11);
        assert_eq!(deletes.last(), Some(&ObjectRef::namespace(request.uuid.namespace())));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (cluster, provisioner) = provisioner();
        let request = test_request();
        let lab = KubeLab::new(request.clone(), provisioner.create(&request).await.unwrap());
        let order = lab.teardown_order();

        assert!(provisioner.delete(&order).await.is_empty());
        assert_eq!(cluster.object_count(), 0);
        assert!(provisioner.delete(&order).await.is_empty());
    }

    #[tokio::test]
    async fn delete_reports_failures_and_continues() {
        let (cluster, provisioner) = provisioner();
        let request = test_request();
        let lab = KubeLab::new(request.clone(), provisioner.create(&request).await.unwrap());
        cluster.fail_deletes(ResourceKind::Service);

        let failed = provisioner.delete(&lab.teardown_order()).await;

        assert_eq!(failed.len(), 5);
        assert!(failed.iter().all(|r| r.kind == ResourceKind::Service));
        assert!(cluster.namespaces().is_empty());
    }
}
