//! Object builders for a lab's cluster resources.
//!
//! This module turns a lesson plus a schedule request into the concrete
//! Kubernetes objects that make up one lab: a namespace, a pod and a
//! service per endpoint, one ingress and one network policy.

use std::collections::BTreeMap;

use antidote_core::{Endpoint, Lesson, Presentation};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Namespace, Pod, PodSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, NetworkPolicy, NetworkPolicyEgressRule,
    NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::types::{LessonScheduleRequest, SchedulerConfig};

/// Label carrying the lab ID on every lab object.
pub const LAB_ID_LABEL: &str = "antidote.io/lab-id";
/// Label carrying the owning session.
pub const SESSION_ID_LABEL: &str = "antidote.io/session-id";
/// Label carrying the lesson ID.
pub const LESSON_ID_LABEL: &str = "antidote.io/lesson-id";
/// Label naming the endpoint a pod or service belongs to.
pub const ENDPOINT_LABEL: &str = "antidote.io/endpoint";
/// Pod annotation listing the endpoint's topology peers.
pub const LINKS_ANNOTATION: &str = "antidote.io/links";

const CREATED_AT_ANNOTATION: &str = "antidote.io/created-at";
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";
const INGRESS_NAME: &str = "lab-ingress";
const NETWORK_POLICY_NAME: &str = "lab-isolation";

/// Build the namespace that isolates a lab.
#[must_use]
pub fn build_namespace(request: &LessonScheduleRequest) -> Namespace {
    let name = request.uuid.namespace();
    let mut annotations = BTreeMap::new();
    annotations.insert(
        CREATED_AT_ANNOTATION.to_string(),
        request.created.to_rfc3339(),
    );

    Namespace {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(lab_labels(request)),
            annotations: Some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Build the pod for one endpoint.
///
/// The endpoint's topology peers are recorded in the `antidote.io/links`
/// annotation, comma separated and sorted.
#[must_use]
pub fn build_pod(request: &LessonScheduleRequest, endpoint: &Endpoint) -> Pod {
    let mut annotations = BTreeMap::new();
    let peers = request.lesson.peers_of(&endpoint.name);
    if !peers.is_empty() {
        annotations.insert(LINKS_ANNOTATION.to_string(), peers.join(","));
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(endpoint.name.clone()),
            namespace: Some(request.uuid.namespace()),
            labels: Some(endpoint_labels(request, endpoint)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![build_container(endpoint)],
            restart_policy: Some("Always".to_string()),
            termination_grace_period_seconds: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_container(endpoint: &Endpoint) -> Container {
    let ports: Vec<ContainerPort> = endpoint
        .presentations
        .iter()
        .map(|p| ContainerPort {
            container_port: i32::from(p.port),
            name: Some(port_name(p)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    Container {
        name: endpoint.name.clone(),
        image: Some(endpoint.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: (!ports.is_empty()).then_some(ports),
        ..Default::default()
    }
}

/// Build the service in front of one endpoint.
///
/// Returns `None` for endpoints without presentations, since there is
/// nothing to expose.
#[must_use]
pub fn build_service(request: &LessonScheduleRequest, endpoint: &Endpoint) -> Option<Service> {
    if endpoint.presentations.is_empty() {
        return None;
    }

    let mut selector = BTreeMap::new();
    selector.insert(LAB_ID_LABEL.to_string(), request.uuid.to_string());
    selector.insert(ENDPOINT_LABEL.to_string(), endpoint.name.clone());

    let ports = endpoint
        .presentations
        .iter()
        .map(|p| ServicePort {
            name: Some(port_name(p)),
            port: i32::from(p.port),
            target_port: Some(IntOrString::Int(i32::from(p.port))),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    Some(Service {
        metadata: ObjectMeta {
            name: Some(endpoint.name.clone()),
            namespace: Some(request.uuid.namespace()),
            labels: Some(endpoint_labels(request, endpoint)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(ports),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the single ingress for a lab.
///
/// Every web presentation gets a `/{endpoint}/{presentation}` path on the
/// host `{lab_id}.{domain}`. A lab with no web presentation gets a default
/// backend pointing at the first exposed port instead.
#[must_use]
pub fn build_ingress(request: &LessonScheduleRequest, config: &SchedulerConfig) -> Ingress {
    let paths: Vec<HTTPIngressPath> = web_presentations(&request.lesson)
        .map(|(endpoint, p)| HTTPIngressPath {
            path: Some(format!("/{}/{}", endpoint.name, p.name)),
            path_type: "Prefix".to_string(),
            backend: service_backend(&endpoint.name, p.port),
        })
        .collect();

    let (rules, default_backend) = if paths.is_empty() {
        let fallback = request
            .lesson
            .endpoints
            .iter()
            .find_map(|e| e.presentations.first().map(|p| service_backend(&e.name, p.port)));
        (None, fallback)
    } else {
        let rule = IngressRule {
            host: Some(ingress_host(request, config)),
            http: Some(HTTPIngressRuleValue { paths }),
        };
        (Some(vec![rule]), None)
    };

    Ingress {
        metadata: ObjectMeta {
            name: Some(INGRESS_NAME.to_string()),
            namespace: Some(request.uuid.namespace()),
            labels: Some(lab_labels(request)),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(config.ingress_class.clone()),
            rules,
            default_backend,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Host name of a lab's ingress.
#[must_use]
pub fn ingress_host(request: &LessonScheduleRequest, config: &SchedulerConfig) -> String {
    format!("{}.{}", request.uuid, config.domain)
}

/// Build the isolation policy for a lab.
///
/// All pods in the lab namespace may talk to each other. Ingress is also
/// allowed from the ingress controller namespace, and egress to DNS.
#[must_use]
pub fn build_network_policy(
    request: &LessonScheduleRequest,
    config: &SchedulerConfig,
) -> NetworkPolicy {
    let same_namespace = NetworkPolicyPeer {
        pod_selector: Some(LabelSelector::default()),
        ..Default::default()
    };
    let ingress_controller = NetworkPolicyPeer {
        namespace_selector: Some(namespace_selector(&config.ingress_namespace)),
        ..Default::default()
    };
    let any_namespace = NetworkPolicyPeer {
        namespace_selector: Some(LabelSelector::default()),
        ..Default::default()
    };
    let dns_ports = ["UDP", "TCP"]
        .into_iter()
        .map(|protocol| NetworkPolicyPort {
            port: Some(IntOrString::Int(53)),
            protocol: Some(protocol.to_string()),
            ..Default::default()
        })
        .collect();

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(NETWORK_POLICY_NAME.to_string()),
            namespace: Some(request.uuid.namespace()),
            labels: Some(lab_labels(request)),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![same_namespace.clone(), ingress_controller]),
                ..Default::default()
            }]),
            egress: Some(vec![
                NetworkPolicyEgressRule {
                    to: Some(vec![same_namespace]),
                    ..Default::default()
                },
                NetworkPolicyEgressRule {
                    to: Some(vec![any_namespace]),
                    ports: Some(dns_ports),
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Name of a container or service port for a presentation, e.g. `ssh-22`.
#[must_use]
pub fn port_name(presentation: &Presentation) -> String {
    format!("{}-{}", presentation.kind.as_str(), presentation.port)
}

fn web_presentations(lesson: &Lesson) -> impl Iterator<Item = (&Endpoint, &Presentation)> {
    lesson.endpoints.iter().flat_map(|e| {
        e.presentations
            .iter()
            .filter(|p| p.kind.is_web())
            .map(move |p| (e, p))
    })
}

fn service_backend(service: &str, port: u16) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.to_string(),
            port: Some(ServiceBackendPort {
                number: Some(i32::from(port)),
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}

fn namespace_selector(namespace: &str) -> LabelSelector {
    let mut labels = BTreeMap::new();
    labels.insert(NAMESPACE_NAME_LABEL.to_string(), namespace.to_string());
    LabelSelector {
        match_labels: Some(labels),
        ..Default::default()
    }
}

fn lab_labels(request: &LessonScheduleRequest) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "antidote-lab".to_string());
    labels.insert(LAB_ID_LABEL.to_string(), request.uuid.to_string());
    labels.insert(
        SESSION_ID_LABEL.to_string(),
        request.session_id.as_str().to_string(),
    );
    labels.insert(
        LESSON_ID_LABEL.to_string(),
        request.lesson.lesson_id.to_string(),
    );
    labels
}

fn endpoint_labels(request: &LessonScheduleRequest, endpoint: &Endpoint) -> BTreeMap<String, String> {
    let mut labels = lab_labels(request);
    labels.insert(ENDPOINT_LABEL.to_string(), endpoint.name.clone());
    labels
}
