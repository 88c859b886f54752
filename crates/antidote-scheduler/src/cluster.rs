//! Kubernetes cluster access.
//!
//! The scheduler never talks to `kube` directly. It goes through the
//! [`Cluster`] trait, which deals in [`LabObject`]s and [`ObjectRef`]s so
//! the provisioner can keep a single list of compensating actions across
//! every resource kind it creates.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Result, SchedulerError};

/// The kinds of cluster objects a lab is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// The lab's isolation scope.
    Namespace,
    /// A compute endpoint.
    Pod,
    /// Network service in front of an endpoint.
    Service,
    /// HTTP route into the lab.
    Ingress,
    /// Isolation policy.
    NetworkPolicy,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Namespace => "namespace",
            Self::Pod => "pod",
            Self::Service => "service",
            Self::Ingress => "ingress",
            Self::NetworkPolicy => "networkpolicy",
        };
        f.write_str(name)
    }
}

/// Identifies one object in the cluster.
///
/// For namespaces, `namespace` and `name` are both the namespace name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object kind.
    pub kind: ResourceKind,
    /// Namespace holding the object.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectRef {
    /// Reference to a namespaced object.
    #[must_use]
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Reference to a namespace.
    #[must_use]
    pub fn namespace(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: ResourceKind::Namespace,
            namespace: name.clone(),
            name,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == ResourceKind::Namespace {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// A typed object belonging to a lab.
#[derive(Debug, Clone)]
pub enum LabObject {
    /// Isolation scope.
    Namespace(Namespace),
    /// Compute endpoint.
    Pod(Pod),
    /// Endpoint service.
    Service(Service),
    /// Lab ingress.
    Ingress(Ingress),
    /// Isolation policy.
    NetworkPolicy(NetworkPolicy),
}

impl LabObject {
    /// Kind of the wrapped object.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Namespace(_) => ResourceKind::Namespace,
            Self::Pod(_) => ResourceKind::Pod,
            Self::Service(_) => ResourceKind::Service,
            Self::Ingress(_) => ResourceKind::Ingress,
            Self::NetworkPolicy(_) => ResourceKind::NetworkPolicy,
        }
    }

    /// Reference to the wrapped object.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the object has no name, or a
    /// namespaced object has no namespace.
    pub fn object_ref(&self) -> Result<ObjectRef> {
        let (name, namespace) = match self {
            Self::Namespace(o) => (o.meta().name.clone(), o.meta().name.clone()),
            Self::Pod(o) => (o.meta().name.clone(), o.meta().namespace.clone()),
            Self::Service(o) => (o.meta().name.clone(), o.meta().namespace.clone()),
            Self::Ingress(o) => (o.meta().name.clone(), o.meta().namespace.clone()),
            Self::NetworkPolicy(o) => (o.meta().name.clone(), o.meta().namespace.clone()),
        };
        let kind = self.kind();
        let name = name.ok_or_else(|| SchedulerError::Config(format!("{kind} without a name")))?;
        let namespace = namespace
            .ok_or_else(|| SchedulerError::Config(format!("{kind} {name} without a namespace")))?;
        Ok(ObjectRef {
            kind,
            namespace,
            name,
        })
    }
}

/// The `Cluster` trait defines the cluster operations the scheduler relies on.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Check that the cluster API is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the API server cannot be reached.
    async fn ping(&self) -> Result<()>;

    /// Create an object, returning it as stored by the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the create call fails, including when the
    /// object already exists.
    async fn create(&self, object: LabObject) -> Result<LabObject>;

    /// Delete an object. An object that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete call fails for any other reason.
    async fn delete(&self, object: &ObjectRef) -> Result<()>;

    /// List the names of objects of `kind` in `namespace`.
    ///
    /// For `ResourceKind::Namespace` the namespace argument filters by name.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>>;
}

/// Cluster access through the Kubernetes API.
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using in-cluster config or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes client cannot be created.
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| SchedulerError::ClusterUnreachable(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Wrap a pre-configured client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

async fn create_with<K>(api: Api<K>, object: &K) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + fmt::Debug,
{
    Ok(api.create(&PostParams::default(), object).await?)
}

async fn delete_with<K>(api: Api<K>, object: &ObjectRef) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug,
{
    match api.delete(&object.name, &DeleteParams::background()).await {
        Ok(_) => {
            debug!(object = %object, "Deleted object");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!(object = %object, "Object not found, already deleted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_with<K>(api: Api<K>) -> Result<Vec<String>>
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug,
{
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.iter().map(ResourceExt::name_any).collect())
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn ping(&self) -> Result<()> {
        let version = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| SchedulerError::ClusterUnreachable(e.to_string()))?;
        info!(
            major = %version.major,
            minor = %version.minor,
            "Connected to Kubernetes API server"
        );
        Ok(())
    }

    async fn create(&self, object: LabObject) -> Result<LabObject> {
        let target = object.object_ref()?;
        let created = match object {
            LabObject::Namespace(o) => LabObject::Namespace(create_with(self.namespaces(), &o).await?),
            LabObject::Pod(o) => {
                LabObject::Pod(create_with(self.namespaced(&target.namespace), &o).await?)
            }
            LabObject::Service(o) => {
                LabObject::Service(create_with(self.namespaced(&target.namespace), &o).await?)
            }
            LabObject::Ingress(o) => {
                LabObject::Ingress(create_with(self.namespaced(&target.namespace), &o).await?)
            }
            LabObject::NetworkPolicy(o) => LabObject::NetworkPolicy(
                create_with(self.namespaced(&target.namespace), &o).await?,
            ),
        };
        debug!(object = %target, "Created object");
        Ok(created)
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        let ns = object.namespace.as_str();
        match object.kind {
            ResourceKind::Namespace => delete_with(self.namespaces(), object).await,
            ResourceKind::Pod => delete_with(self.namespaced::<Pod>(ns), object).await,
            ResourceKind::Service => delete_with(self.namespaced::<Service>(ns), object).await,
            ResourceKind::Ingress => delete_with(self.namespaced::<Ingress>(ns), object).await,
            ResourceKind::NetworkPolicy => {
                delete_with(self.namespaced::<NetworkPolicy>(ns), object).await
            }
        }
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>> {
        match kind {
            ResourceKind::Namespace => Ok(list_with(self.namespaces())
                .await?
                .into_iter()
                .filter(|name| name == namespace)
                .collect()),
            ResourceKind::Pod => list_with(self.namespaced::<Pod>(namespace)).await,
            ResourceKind::Service => list_with(self.namespaced::<Service>(namespace)).await,
            ResourceKind::Ingress => list_with(self.namespaced::<Ingress>(namespace)).await,
            ResourceKind::NetworkPolicy => {
                list_with(self.namespaced::<NetworkPolicy>(namespace)).await
            }
        }
    }
}

/// An in-memory cluster for testing without a real Kubernetes cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::time::Duration;

    /// A cluster call recorded by [`MockCluster`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        /// A successful create.
        Create(ObjectRef),
        /// A delete call, successful or not.
        Delete(ObjectRef),
    }

    #[derive(Default)]
    struct State {
        objects: BTreeMap<ObjectRef, LabObject>,
        calls: Vec<Call>,
        fail_creates: HashSet<ResourceKind>,
        fail_deletes: HashSet<ResourceKind>,
        create_delays: HashMap<ResourceKind, Duration>,
        unreachable: bool,
        next_ip: u32,
    }

    /// A mock cluster that stores objects in memory.
    ///
    /// It enforces the rules the provisioner depends on: namespaced objects
    /// need their namespace to exist, names are unique per kind and
    /// namespace, and deleting a namespace removes everything in it.
    #[derive(Default)]
    pub struct MockCluster {
        state: Mutex<State>,
    }

    impl MockCluster {
        /// Create an empty mock cluster.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every create of `kind` fail.
        pub fn fail_creates(&self, kind: ResourceKind) {
            self.state.lock().fail_creates.insert(kind);
        }

        /// Make every delete of `kind` fail.
        pub fn fail_deletes(&self, kind: ResourceKind) {
            self.state.lock().fail_deletes.insert(kind);
        }

        /// Hold every create of `kind` for `delay` before applying it.
        pub fn delay_creates(&self, kind: ResourceKind, delay: Duration) {
            self.state.lock().create_delays.insert(kind, delay);
        }

        /// Clear injected failures and delays.
        pub fn heal(&self) {
            let mut state = self.state.lock();
            state.fail_creates.clear();
            state.fail_deletes.clear();
            state.create_delays.clear();
        }

        /// Make `ping` fail.
        pub fn set_unreachable(&self, unreachable: bool) {
            self.state.lock().unreachable = unreachable;
        }

        /// Number of objects of `kind` in `namespace`.
        #[must_use]
        pub fn count(&self, kind: ResourceKind, namespace: &str) -> usize {
            self.state
                .lock()
                .objects
                .keys()
                .filter(|r| r.kind == kind && r.namespace == namespace)
                .count()
        }

        /// Total number of objects of any kind.
        #[must_use]
        pub fn object_count(&self) -> usize {
            self.state.lock().objects.len()
        }

        /// Names of all namespaces.
        #[must_use]
        pub fn namespaces(&self) -> Vec<String> {
            self.state
                .lock()
                .objects
                .keys()
                .filter(|r| r.kind == ResourceKind::Namespace)
                .map(|r| r.name.clone())
                .collect()
        }

        /// Calls made against the cluster, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().calls.clone()
        }

        /// Look up a stored object.
        #[must_use]
        pub fn get(&self, object: &ObjectRef) -> Option<LabObject> {
            self.state.lock().objects.get(object).cloned()
        }
    }

    #[async_trait]
    impl Cluster for MockCluster {
        async fn ping(&self) -> Result<()> {
            if self.state.lock().unreachable {
                return Err(SchedulerError::ClusterUnreachable(
                    "mock cluster unreachable".to_string(),
                ));
            }
            Ok(())
        }

        async fn create(&self, object: LabObject) -> Result<LabObject> {
            let target = object.object_ref()?;
            let delay = self.state.lock().create_delays.get(&target.kind).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.state.lock();

            if state.fail_creates.contains(&target.kind) {
                return Err(SchedulerError::Cluster(format!("injected create failure: {target}")));
            }
            if target.kind != ResourceKind::Namespace
                && !state
                    .objects
                    .contains_key(&ObjectRef::namespace(target.namespace.clone()))
            {
                return Err(SchedulerError::Cluster(format!(
                    "namespace {} not found",
                    target.namespace
                )));
            }
            if state.objects.contains_key(&target) {
                return Err(SchedulerError::Cluster(format!("{target} already exists")));
            }

            let stored = match object {
                LabObject::Service(mut svc) => {
                    state.next_ip += 1;
                    let ip = format!("10.96.{}.{}", state.next_ip / 250, state.next_ip % 250 + 1);
                    svc.spec.get_or_insert_with(ServiceSpec::default).cluster_ip = Some(ip);
                    LabObject::Service(svc)
                }
                other => other,
            };

            state.objects.insert(target.clone(), stored.clone());
            state.calls.push(Call::Create(target));
            Ok(stored)
        }

        async fn delete(&self, object: &ObjectRef) -> Result<()> {
            let mut state = self.state.lock();
            state.calls.push(Call::Delete(object.clone()));

            if state.fail_deletes.contains(&object.kind) {
                return Err(SchedulerError::Cluster(format!("injected delete failure: {object}")));
            }

            if object.kind == ResourceKind::Namespace {
                state.objects.retain(|r, _| r.namespace != object.name);
            } else {
                state.objects.remove(object);
            }
            Ok(())
        }

        async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>> {
            Ok(self
                .state
                .lock()
                .objects
                .keys()
                .filter(|r| r.kind == kind && r.namespace == namespace)
                .map(|r| r.name.clone())
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{Call, MockCluster};
    use super::*;
    use kube::api::ObjectMeta;

    fn namespace(name: &str) -> LabObject {
        LabObject::Namespace(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn pod(namespace: &str, name: &str) -> LabObject {
        LabObject::Pod(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn object_ref_for_namespace_uses_own_name() {
        let r = namespace("lab-ns").object_ref().unwrap();
        assert_eq!(r, ObjectRef::namespace("lab-ns"));
        assert_eq!(r.to_string(), "namespace/lab-ns");
    }

    #[test]
    fn object_ref_requires_namespace() {
        let orphan = LabObject::Pod(Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(matches!(orphan.object_ref(), Err(SchedulerError::Config(_))));
    }

    #[tokio::test]
    async fn mock_requires_namespace_before_objects() {
        let cluster = MockCluster::new();
        assert!(cluster.create(pod("lab-ns", "vqfx1")).await.is_err());

        cluster.create(namespace("lab-ns")).await.unwrap();
        cluster.create(pod("lab-ns", "vqfx1")).await.unwrap();
        assert_eq!(cluster.count(ResourceKind::Pod, "lab-ns"), 1);
        assert_eq!(
            cluster.list(ResourceKind::Pod, "lab-ns").await.unwrap(),
            vec!["vqfx1".to_string()]
        );
    }

    #[tokio::test]
    async fn mock_rejects_duplicates() {
        let cluster = MockCluster::new();
        cluster.create(namespace("lab-ns")).await.unwrap();
        assert!(cluster.create(namespace("lab-ns")).await.is_err());
    }

    #[tokio::test]
    async fn mock_delete_is_idempotent_and_cascades() {
        let cluster = MockCluster::new();
        cluster.create(namespace("lab-ns")).await.unwrap();
        cluster.create(pod("lab-ns", "vqfx1")).await.unwrap();

        let pod_ref = ObjectRef::new(ResourceKind::Pod, "lab-ns", "vqfx2");
        cluster.delete(&pod_ref).await.unwrap();

        cluster.delete(&ObjectRef::namespace("lab-ns")).await.unwrap();
        assert_eq!(cluster.object_count(), 0);
        assert!(matches!(cluster.calls().last(), Some(Call::Delete(_))));
    }

    #[tokio::test]
    async fn mock_injected_failures() {
        let cluster = MockCluster::new();
        cluster.fail_creates(ResourceKind::Namespace);
        assert!(matches!(
            cluster.create(namespace("lab-ns")).await,
            Err(SchedulerError::Cluster(_))
        ));

        cluster.heal();
        cluster.create(namespace("lab-ns")).await.unwrap();

        cluster.set_unreachable(true);
        assert!(matches!(
            cluster.ping().await,
            Err(SchedulerError::ClusterUnreachable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_delayed_create_waits_then_applies() {
        let cluster = MockCluster::new();
        cluster.delay_creates(ResourceKind::Namespace, std::time::Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        cluster.create(namespace("lab-ns")).await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_secs(30));
        assert_eq!(cluster.namespaces(), vec!["lab-ns".to_string()]);
    }
}
