//! Curated equality between live and desired objects
//!
//! Only the fields the operator sets are compared. Everything the API
//! server defaults or other controllers write (status, managed fields,
//! default probes, termination policies) is ignored, otherwise every pass
//! would see a difference and update the object again.
//!
//! Optional lists compare `None` equal to an empty list, since the API
//! server drops empty lists on the way back.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, ResourceRequirements, Service};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};

use crate::quantity::quantities_equal;

fn list_eq<T: PartialEq>(a: Option<&Vec<T>>, b: Option<&Vec<T>>) -> bool {
    a.map_or(&[][..], Vec::as_slice) == b.map_or(&[][..], Vec::as_slice)
}

fn owners_eq(a: &ObjectMeta, b: &ObjectMeta) -> bool {
    list_eq(a.owner_references.as_ref(), b.owner_references.as_ref())
}

/// Image, command, args, mounts and env of the first container
fn first_container_eq(a: &PodSpec, b: &PodSpec) -> bool {
    match (a.containers.first(), b.containers.first()) {
        (None, None) => true,
        (Some(a), Some(b)) => container_eq(a, b),
        _ => false,
    }
}

fn container_eq(a: &Container, b: &Container) -> bool {
    a.image == b.image
        && list_eq(a.command.as_ref(), b.command.as_ref())
        && list_eq(a.args.as_ref(), b.args.as_ref())
        && list_eq(a.volume_mounts.as_ref(), b.volume_mounts.as_ref())
        && list_eq(a.env.as_ref(), b.env.as_ref())
}

fn service_account(spec: &PodSpec) -> &str {
    spec.service_account_name.as_deref().unwrap_or_default()
}

/// Compare the operator-managed parts of two Deployments
///
/// Container count, replicas, selector, service account, first container,
/// volumes and owner references.
pub fn are_deployments_equal(a: &Deployment, b: &Deployment) -> bool {
    let (Some(sa), Some(sb)) = (a.spec.as_ref(), b.spec.as_ref()) else {
        return a.spec.is_none() && b.spec.is_none() && owners_eq(&a.metadata, &b.metadata);
    };
    let default_pod = PodSpec::default();
    let pa = sa.template.spec.as_ref().unwrap_or(&default_pod);
    let pb = sb.template.spec.as_ref().unwrap_or(&default_pod);

    pa.containers.len() == pb.containers.len()
        && sa.replicas == sb.replicas
        && sa.selector == sb.selector
        && service_account(pa) == service_account(pb)
        && first_container_eq(pa, pb)
        && list_eq(pa.volumes.as_ref(), pb.volumes.as_ref())
        && owners_eq(&a.metadata, &b.metadata)
}

/// Compare ports, selector, type and owner references of two Services
pub fn are_services_equal(a: &Service, b: &Service) -> bool {
    let default_spec = Default::default();
    let sa = a.spec.as_ref().unwrap_or(&default_spec);
    let sb = b.spec.as_ref().unwrap_or(&default_spec);

    list_eq(sa.ports.as_ref(), sb.ports.as_ref())
        && sa.selector.clone().unwrap_or_default() == sb.selector.clone().unwrap_or_default()
        && owners_eq(&a.metadata, &b.metadata)
        && sa.type_ == sb.type_
}

/// Compare the operator-managed parts of two CronJobs
///
/// Container count, service account, tolerations, node pinning (node name
/// and affinity), first container, volumes, job history limits and owner
/// references.
pub fn are_cron_jobs_equal(a: &CronJob, b: &CronJob) -> bool {
    let default_cron = Default::default();
    let ca = a.spec.as_ref().unwrap_or(&default_cron);
    let cb = b.spec.as_ref().unwrap_or(&default_cron);
    let default_pod = PodSpec::default();
    let pod = |spec: &CronJobSpec| -> Option<PodSpec> {
        spec.job_template.spec.as_ref().and_then(|j| j.template.spec.clone())
    };
    let pa = pod(ca);
    let pb = pod(cb);
    let pa = pa.as_ref().unwrap_or(&default_pod);
    let pb = pb.as_ref().unwrap_or(&default_pod);

    pa.containers.len() == pb.containers.len()
        && service_account(pa) == service_account(pb)
        && list_eq(pa.tolerations.as_ref(), pb.tolerations.as_ref())
        && pa.node_name == pb.node_name
        && pa.affinity == pb.affinity
        && first_container_eq(pa, pb)
        && list_eq(pa.volumes.as_ref(), pb.volumes.as_ref())
        && ca.successful_jobs_history_limit == cb.successful_jobs_history_limit
        && ca.failed_jobs_history_limit == cb.failed_jobs_history_limit
        && owners_eq(&a.metadata, &b.metadata)
}

/// Compare data and owner references of two ConfigMaps
pub fn are_config_maps_equal(a: &ConfigMap, b: &ConfigMap) -> bool {
    a.data.clone().unwrap_or_default() == b.data.clone().unwrap_or_default() && owners_eq(&a.metadata, &b.metadata)
}

/// Compare limits and requests by value (`100m` equals `0.1`)
///
/// A resource missing on one side counts as zero.
pub fn are_resource_requirements_equal(a: &ResourceRequirements, b: &ResourceRequirements) -> bool {
    quantity_maps_equal(a.limits.as_ref(), b.limits.as_ref())
        && quantity_maps_equal(a.requests.as_ref(), b.requests.as_ref())
}

/// [`are_deployments_equal`] plus the first container's resource
/// requirements, compared by value
pub fn are_deployments_and_resources_equal(a: &Deployment, b: &Deployment) -> bool {
    let resources = |d: &Deployment| {
        d.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.resources.clone())
            .unwrap_or_default()
    };
    are_deployments_equal(a, b) && are_resource_requirements_equal(&resources(a), &resources(b))
}

fn quantity_maps_equal(
    a: Option<&BTreeMap<String, K8sQuantity>>,
    b: Option<&BTreeMap<String, K8sQuantity>>,
) -> bool {
    let keys: BTreeSet<&String> = a.into_iter().chain(b).flat_map(BTreeMap::keys).collect();
    keys.into_iter().all(|key| {
        let va = a.and_then(|m| m.get(key)).map(|q| q.0.as_str());
        let vb = b.and_then(|m| m.get(key)).map(|q| q.0.as_str());
        quantities_equal(va, vb)
    })
}

/// Copy data and ownership of `desired` onto a live ConfigMap
pub fn update_config_map(live: &mut ConfigMap, desired: &ConfigMap) {
    live.data = desired.data.clone();
    live.metadata.owner_references = desired.metadata.owner_references.clone();
    live.metadata.labels = desired.metadata.labels.clone();
}

/// Copy the managed parts of `desired` onto a live Deployment
pub fn update_deployment(live: &mut Deployment, desired: &Deployment) {
    live.spec = desired.spec.clone();
    live.metadata.owner_references = desired.metadata.owner_references.clone();
    live.metadata.labels = desired.metadata.labels.clone();
}

/// Copy the managed parts of `desired` onto a live Service, keeping the
/// cluster-assigned IPs
pub fn update_service(live: &mut Service, desired: &Service) {
    let desired_spec = desired.spec.clone().unwrap_or_default();
    let spec = live.spec.get_or_insert_with(Default::default);
    spec.ports = desired_spec.ports;
    spec.selector = desired_spec.selector;
    spec.type_ = desired_spec.type_;
    live.metadata.owner_references = desired.metadata.owner_references.clone();
    live.metadata.labels = desired.metadata.labels.clone();
}

/// Copy the managed parts of `desired` onto a live CronJob
pub fn update_cron_job(live: &mut CronJob, desired: &CronJob) {
    live.spec = desired.spec.clone();
    live.metadata.owner_references = desired.metadata.owner_references.clone();
    live.metadata.labels = desired.metadata.labels.clone();
}
