use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use urumi_common::retry::Deadline;

use super::database::{DbConnection, KEY_DB_NAME, KEY_DB_PASSWORD, KEY_DB_USER};
use super::{env_from_secret, env_literal, quantities, workload_labels};
use crate::gateway::Gateway;
use crate::models::Store;
use crate::passwords;

const WORDPRESS_IMAGE: &str = "wordpress:6.7-php8.3-apache";
const COMPONENT: &str = "wordpress";
pub const APP_SERVICE: &str = "storefront";
const HTTP_PORT: i32 = 80;
const CONTAINER_PORT: i32 = 8080;
const CONTENT_PVC: &str = "wp-content";

pub const KEY_ADMIN_USER: &str = "admin-user";
pub const KEY_ADMIN_PASSWORD: &str = "admin-password";
const ADMIN_USER: &str = "admin";

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub fn admin_secret_name(store: &Store) -> String {
    format!("{}-admin", store.namespace)
}

pub fn admin_secret_data() -> BTreeMap<String, String> {
    BTreeMap::from([
        (KEY_ADMIN_USER.to_string(), ADMIN_USER.to_string()),
        (KEY_ADMIN_PASSWORD.to_string(), passwords::generate()),
    ])
}

pub fn hostname(store_id: &str, store_domain: &str) -> String {
    format!("store-{store_id}.{store_domain}")
}

pub fn content_pvc(store: &Store, storage: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(CONTENT_PVC.to_string()),
            namespace: Some(store.namespace.clone()),
            labels: Some(workload_labels(&store.id, COMPONENT)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(quantities(&[("storage", storage)])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn deployment(store: &Store, db: &DbConnection, hostname: &str) -> Deployment {
    let labels = workload_labels(&store.id, COMPONENT);
    let admin_secret = admin_secret_name(store);

    Deployment {
        metadata: ObjectMeta {
            name: Some(COMPONENT.to_string()),
            namespace: Some(store.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: COMPONENT.to_string(),
                        image: Some(WORDPRESS_IMAGE.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: CONTAINER_PORT,
                            name: Some("http".to_string()),
                            ..Default::default()
                        }]),
                        env: Some(vec![
                            env_literal(
                                "WORDPRESS_DB_HOST",
                                &format!("{}:{}", db.host, db.port),
                            ),
                            env_from_secret("WORDPRESS_DB_NAME", &db.secret_name, KEY_DB_NAME),
                            env_from_secret("WORDPRESS_DB_USER", &db.secret_name, KEY_DB_USER),
                            env_from_secret(
                                "WORDPRESS_DB_PASSWORD",
                                &db.secret_name,
                                KEY_DB_PASSWORD,
                            ),
                            env_from_secret("WORDPRESS_ADMIN_USER", &admin_secret, KEY_ADMIN_USER),
                            env_from_secret(
                                "WORDPRESS_ADMIN_PASSWORD",
                                &admin_secret,
                                KEY_ADMIN_PASSWORD,
                            ),
                            env_literal("WORDPRESS_SITE_URL", &format!("http://{hostname}")),
                            env_literal("WORDPRESS_SITE_TITLE", &store.name),
                        ]),
                        resources: Some(ResourceRequirements {
                            requests: Some(quantities(&[("cpu", "100m"), ("memory", "256Mi")])),
                            limits: Some(quantities(&[("cpu", "500m"), ("memory", "512Mi")])),
                            ..Default::default()
                        }),
                        volume_mounts: Some(vec![VolumeMount {
                            name: CONTENT_PVC.to_string(),
                            mount_path: "/var/www/html/wp-content".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: CONTENT_PVC.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: CONTENT_PVC.to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service(store: &Store) -> Service {
    let labels = workload_labels(&store.id, COMPONENT);
    Service {
        metadata: ObjectMeta {
            name: Some(APP_SERVICE.to_string()),
            namespace: Some(store.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: HTTP_PORT,
                target_port: Some(IntOrString::Int(CONTAINER_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ingress(store: &Store, hostname: &str, ingress_class: &str) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(COMPONENT.to_string()),
            namespace: Some(store.namespace.clone()),
            labels: Some(workload_labels(&store.id, COMPONENT)),
            annotations: Some(BTreeMap::from([
                (
                    "nginx.ingress.kubernetes.io/proxy-body-size".to_string(),
                    "64m".to_string(),
                ),
                (
                    "nginx.ingress.kubernetes.io/proxy-read-timeout".to_string(),
                    "120".to_string(),
                ),
            ])),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(ingress_class.to_string()),
            rules: Some(vec![IngressRule {
                host: Some(hostname.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: APP_SERVICE.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(HTTP_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deploy the storefront on top of a ready database and wait for it.
pub async fn deploy(
    gateway: &Gateway,
    deadline: &Deadline,
    store: &Store,
    db: &DbConnection,
    hostname: &str,
    storage: &str,
    ingress_class: &str,
    ready_timeout: Duration,
) -> Result<()> {
    let ns = &store.namespace;

    deadline
        .wrap(gateway.ensure_secret(
            ns,
            &admin_secret_name(store),
            admin_secret_data(),
            workload_labels(&store.id, COMPONENT),
        ))
        .await??;
    deadline
        .wrap(gateway.ensure_pvc(ns, &content_pvc(store, storage)))
        .await??;
    deadline
        .wrap(gateway.ensure_deployment(ns, &deployment(store, db, hostname)))
        .await??;
    deadline.wrap(gateway.ensure_service(ns, &service(store))).await??;
    deadline
        .wrap(gateway.ensure_ingress(ns, &ingress(store, hostname, ingress_class)))
        .await??;

    wait_ready(gateway, deadline, ns, ready_timeout).await
}

pub async fn wait_ready(
    gateway: &Gateway,
    deadline: &Deadline,
    namespace: &str,
    timeout: Duration,
) -> Result<()> {
    let started = Instant::now();
    loop {
        deadline.check()?;
        let ready = deadline
            .wrap(gateway.deployment_ready_replicas(namespace, COMPONENT))
            .await??;
        if ready >= 1 {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            bail!("application not ready within {}s", timeout.as_secs());
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoreEngine;

    fn store() -> Store {
        Store::reserve("my-shop", StoreEngine::Woocommerce)
    }

    fn db() -> DbConnection {
        DbConnection {
            host: "db.store-abc.svc.cluster.local".to_string(),
            port: 3306,
            db_name: "wordpress".to_string(),
            user: "wordpress".to_string(),
            secret_name: "store-abc-db".to_string(),
        }
    }

    #[test]
    fn hostname_combines_id_and_domain() {
        assert_eq!(hostname("a1b2c3d4", "shops.example.com"), "store-a1b2c3d4.shops.example.com");
    }

    #[test]
    fn admin_secret_has_generated_password() {
        let data = admin_secret_data();
        assert_eq!(data[KEY_ADMIN_USER], "admin");
        assert!(data[KEY_ADMIN_PASSWORD].len() >= 16);
    }

    #[test]
    fn deployment_wires_site_env() {
        let store = store();
        let host = hostname(&store.id, "shops.example.com");
        let deploy = deployment(&store, &db(), &host);
        let container = &deploy.spec.unwrap().template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();

        let db_host = env.iter().find(|e| e.name == "WORDPRESS_DB_HOST").unwrap();
        assert_eq!(
            db_host.value.as_deref(),
            Some("db.store-abc.svc.cluster.local:3306")
        );

        let site_url = env.iter().find(|e| e.name == "WORDPRESS_SITE_URL").unwrap();
        assert_eq!(site_url.value.as_deref(), Some(format!("http://{host}").as_str()));

        let password = env
            .iter()
            .find(|e| e.name == "WORDPRESS_DB_PASSWORD")
            .unwrap();
        let selector = password
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name, "store-abc-db");
        assert_eq!(selector.key, KEY_DB_PASSWORD);
    }

    #[test]
    fn service_maps_http_to_container_port() {
        let svc = service(&store());
        let port = &svc.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn ingress_routes_host_prefix_to_service() {
        let store = store();
        let host = hostname(&store.id, "shops.example.com");
        let ing = ingress(&store, &host, "nginx");

        let annotations = ing.metadata.annotations.as_ref().unwrap();
        assert!(annotations.contains_key("nginx.ingress.kubernetes.io/proxy-body-size"));
        assert!(annotations.contains_key("nginx.ingress.kubernetes.io/proxy-read-timeout"));

        let spec = ing.spec.unwrap();
        assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
        let rule = &spec.rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some(host.as_str()));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/"));
        assert_eq!(path.path_type, "Prefix");
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, APP_SERVICE);
        assert_eq!(backend.port.as_ref().unwrap().number, Some(80));
    }
}
