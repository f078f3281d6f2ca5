use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, ExecAction, PersistentVolumeClaim, PersistentVolumeClaimSpec, Probe,
    PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServicePort, ServiceSpec,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use urumi_common::retry::Deadline;

use super::{env_from_secret, quantities, workload_labels};
use crate::gateway::Gateway;
use crate::models::Store;
use crate::passwords;

const MARIADB_IMAGE: &str = "mariadb:11.4";
const COMPONENT: &str = "mariadb";
pub const DB_SERVICE: &str = "db";
pub const DB_PORT: u16 = 3306;
const DB_NAME: &str = "wordpress";
const DB_USER: &str = "wordpress";

/// Well-known secret keys consumed by both workloads.
pub const KEY_ROOT_PASSWORD: &str = "root-password";
pub const KEY_DB_USER: &str = "db-user";
pub const KEY_DB_PASSWORD: &str = "db-password";
pub const KEY_DB_NAME: &str = "db-name";

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Where the application finds its database.
#[derive(Debug, Clone)]
pub struct DbConnection {
    pub host: String,
    pub port: u16,
    pub db_name: String,
    pub user: String,
    pub secret_name: String,
}

pub fn secret_name(store: &Store) -> String {
    format!("{}-db", store.namespace)
}

/// Fresh credentials for root and the application user.
pub fn secret_data() -> BTreeMap<String, String> {
    BTreeMap::from([
        (KEY_ROOT_PASSWORD.to_string(), passwords::generate()),
        (KEY_DB_USER.to_string(), DB_USER.to_string()),
        (KEY_DB_PASSWORD.to_string(), passwords::generate()),
        (KEY_DB_NAME.to_string(), DB_NAME.to_string()),
    ])
}

/// Headless service fronting the StatefulSet at a stable DNS name.
pub fn service(store: &Store) -> Service {
    let labels = workload_labels(&store.id, COMPONENT);
    Service {
        metadata: ObjectMeta {
            name: Some(DB_SERVICE.to_string()),
            namespace: Some(store.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("mysql".to_string()),
                port: DB_PORT as i32,
                target_port: Some(IntOrString::Int(DB_PORT as i32)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn health_probe(initial_delay: i32, period: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "healthcheck.sh".to_string(),
                "--connect".to_string(),
                "--innodb_initialized".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

pub fn stateful_set(store: &Store, storage: &str) -> StatefulSet {
    let labels = workload_labels(&store.id, COMPONENT);
    let secret = secret_name(store);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(COMPONENT.to_string()),
            namespace: Some(store.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: Some(DB_SERVICE.to_string()),
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
                        image: Some(MARIADB_IMAGE.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: DB_PORT as i32,
                            name: Some("mysql".to_string()),
                            ..Default::default()
                        }]),
                        env: Some(vec![
                            env_from_secret("MARIADB_ROOT_PASSWORD", &secret, KEY_ROOT_PASSWORD),
                            env_from_secret("MARIADB_DATABASE", &secret, KEY_DB_NAME),
                            env_from_secret("MARIADB_USER", &secret, KEY_DB_USER),
                            env_from_secret("MARIADB_PASSWORD", &secret, KEY_DB_PASSWORD),
                        ]),
                        liveness_probe: Some(health_probe(30, 10)),
                        readiness_probe: Some(health_probe(5, 2)),
                        resources: Some(ResourceRequirements {
                            requests: Some(quantities(&[("cpu", "100m"), ("memory", "256Mi")])),
                            limits: Some(quantities(&[("cpu", "500m"), ("memory", "512Mi")])),
                            ..Default::default()
                        }),
                        volume_mounts: Some(vec![k8s_openapi::api::core::v1::VolumeMount {
                            name: "data".to_string(),
                            mount_path: "/var/lib/mysql".to_string(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("data".to_string()),
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
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deploy the tenant database and wait for it to come up. Returns the
/// connection descriptor the application phase wires into its deployment.
pub async fn deploy(
    gateway: &Gateway,
    deadline: &Deadline,
    store: &Store,
    storage: &str,
    ready_timeout: Duration,
) -> Result<DbConnection> {
    let ns = &store.namespace;
    let secret = secret_name(store);

    deadline
        .wrap(gateway.ensure_secret(
            ns,
            &secret,
            secret_data(),
            workload_labels(&store.id, COMPONENT),
        ))
        .await??;
    deadline.wrap(gateway.ensure_service(ns, &service(store))).await??;
    deadline
        .wrap(gateway.ensure_stateful_set(ns, &stateful_set(store, storage)))
        .await??;

    wait_ready(gateway, deadline, ns, ready_timeout).await?;

    Ok(DbConnection {
        host: format!("{DB_SERVICE}.{ns}.svc.cluster.local"),
        port: DB_PORT,
        db_name: DB_NAME.to_string(),
        user: DB_USER.to_string(),
        secret_name: secret,
    })
}

/// Poll `readyReplicas` every 2 s until the replica is up or the segment
/// timeout elapses. The shared deadline still bounds the whole wait.
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
            .wrap(gateway.stateful_set_ready_replicas(namespace, COMPONENT))
            .await??;
        if ready >= 1 {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            bail!("database not ready within {}s", timeout.as_secs());
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

    #[test]
    fn secret_holds_all_well_known_keys() {
        let data = secret_data();
        assert!(data[KEY_ROOT_PASSWORD].len() >= 16);
        assert!(data[KEY_DB_PASSWORD].len() >= 16);
        assert_ne!(data[KEY_ROOT_PASSWORD], data[KEY_DB_PASSWORD]);
        assert_eq!(data[KEY_DB_USER], "wordpress");
        assert_eq!(data[KEY_DB_NAME], "wordpress");
    }

    #[test]
    fn service_is_headless_on_mysql_port() {
        let svc = service(&store());
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.unwrap()[0].port, 3306);
    }

    #[test]
    fn stateful_set_wires_env_to_secret_keys() {
        let store = store();
        let sts = stateful_set(&store, "2Gi");
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.service_name, Some(DB_SERVICE.to_string()));

        let container = &spec.template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();
        let root = env.iter().find(|e| e.name == "MARIADB_ROOT_PASSWORD").unwrap();
        let selector = root
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name, secret_name(&store));
        assert_eq!(selector.key, KEY_ROOT_PASSWORD);
        assert!(container.liveness_probe.is_some());
        assert!(container.readiness_probe.is_some());
    }

    #[test]
    fn claim_template_uses_configured_size() {
        let sts = stateful_set(&store(), "4Gi");
        let claims = sts.spec.unwrap().volume_claim_templates.unwrap();
        let requests = claims[0]
            .spec
            .as_ref()
            .unwrap()
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests["storage"].0, "4Gi");
    }

    #[test]
    fn connection_dns_name_is_stable() {
        let store = store();
        let host = format!("{DB_SERVICE}.{}.svc.cluster.local", store.namespace);
        assert_eq!(host, format!("db.store-{}.svc.cluster.local", store.id));
    }
}
