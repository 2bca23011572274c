//! Scan API objects: token Secret, Deployment and Service

use std::collections::BTreeMap;

use crds::AuditConfig;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, Secret,
    SecretKeySelector, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{Component, Owner, component_labels, names, resource_requirements};

/// Port the scan API listens on
pub const SCAN_API_PORT: i32 = 8080;
/// Secret key holding the bearer token
pub const TOKEN_KEY: &str = "token";

/// In-cluster URL of the scan API
pub fn url(owner: &Owner) -> String {
    format!(
        "http://{}.{}.svc:{}",
        names::scan_api(&owner.name),
        owner.namespace,
        SCAN_API_PORT
    )
}

/// Token Secret with a freshly generated token. Only ever created, never
/// updated, so the token stays stable once issued.
pub fn token_secret(owner: &Owner) -> Secret {
    Secret {
        metadata: owner.child_meta(names::scan_api_secret(&owner.name), Component::ScanApi),
        string_data: Some(BTreeMap::from([(
            TOKEN_KEY.to_string(),
            uuid::Uuid::new_v4().to_string(),
        )])),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Scan API Deployment
pub fn deployment(config: &AuditConfig, owner: &Owner, image: &str) -> Deployment {
    let labels = component_labels(&owner.name, Component::ScanApi);

    let container = Container {
        name: "scan-api".to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["audit-scanner".to_string()]),
        args: Some(vec![
            "serve-api".to_string(),
            "--address".to_string(),
            "0.0.0.0".to_string(),
            "--port".to_string(),
            SCAN_API_PORT.to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: SCAN_API_PORT,
            name: Some("http".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(resource_requirements(&config.spec.scan_api.resources)),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health/check".to_string()),
                port: IntOrString::Int(SCAN_API_PORT),
                scheme: Some("HTTP".to_string()),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(10),
            ..Default::default()
        }),
        env: Some(vec![EnvVar {
            name: "SCAN_API_TOKEN".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: names::scan_api_secret(&owner.name),
                    key: TOKEN_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: owner.child_meta(names::scan_api(&owner.name), Component::ScanApi),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ClusterIP Service in front of the scan API
pub fn service(owner: &Owner) -> Service {
    Service {
        metadata: owner.child_meta(names::scan_api(&owner.name), Component::ScanApi),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(component_labels(&owner.name, Component::ScanApi)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: SCAN_API_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(SCAN_API_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::AuditConfigSpec;

    fn owner() -> Owner {
        let mut config = AuditConfig::new("audit", AuditConfigSpec::default());
        config.metadata.namespace = Some("security".to_string());
        config.metadata.uid = Some("uid-1".to_string());
        Owner::of(&config).unwrap()
    }

    #[test]
    fn test_url() {
        assert_eq!(url(&owner()), "http://audit-scan-api.security.svc:8080");
    }

    #[test]
    fn test_token_secret_is_random() {
        let a = token_secret(&owner());
        let b = token_secret(&owner());
        assert_eq!(a.metadata.name.as_deref(), Some("audit-scan-api-token"));
        assert_ne!(a.string_data.unwrap()[TOKEN_KEY], b.string_data.unwrap()[TOKEN_KEY]);
    }

    #[test]
    fn test_service_selects_deployment_pods() {
        let config = AuditConfig::new("audit", AuditConfigSpec::default());
        let owner = owner();
        let d = deployment(&config, &owner, "img");
        let svc = service(&owner);
        assert_eq!(
            d.spec.unwrap().template.metadata.unwrap().labels,
            svc.spec.unwrap().selector
        );
    }
}
