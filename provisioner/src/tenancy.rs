use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{LimitRange, LimitRangeItem, LimitRangeSpec, ResourceQuota, ResourceQuotaSpec};
use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use urumi_common::labels;
use urumi_common::retry::Deadline;

use crate::gateway::Gateway;
use crate::models::Store;

const QUOTA_NAME: &str = "tenant-quota";
const LIMIT_RANGE_NAME: &str = "tenant-limits";
const NETWORK_POLICY_NAME: &str = "tenant-isolation";
const INGRESS_CONTROLLER_NAMESPACE: &str = "ingress-nginx";
const CLUSTER_DNS_NAMESPACE: &str = "kube-system";

fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

pub fn namespace_labels(store: &Store) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string()),
        (labels::STORE_ID.to_string(), store.id.clone()),
        (labels::STORE_NAME.to_string(), store.name.clone()),
        (labels::ENGINE.to_string(), store.engine.to_string()),
    ])
}

pub fn namespace_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([(
        labels::CREATED_AT.to_string(),
        chrono::Utc::now().to_rfc3339(),
    )])
}

/// Hard ceilings on what one tenant namespace can consume.
pub fn quota(namespace: &str) -> ResourceQuota {
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(QUOTA_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(quantities(&[
                ("requests.cpu", "500m"),
                ("limits.cpu", "2"),
                ("requests.memory", "512Mi"),
                ("limits.memory", "2Gi"),
                ("requests.storage", "5Gi"),
                ("pods", "10"),
                ("services", "5"),
                ("secrets", "10"),
                ("configmaps", "10"),
                ("persistentvolumeclaims", "3"),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Per-container defaults and bounds, so unspecified workloads still land
/// inside the quota.
pub fn limit_range(namespace: &str) -> LimitRange {
    LimitRange {
        metadata: ObjectMeta {
            name: Some(LIMIT_RANGE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(LimitRangeSpec {
            limits: vec![LimitRangeItem {
                type_: "Container".to_string(),
                default: Some(quantities(&[("cpu", "500m"), ("memory", "512Mi")])),
                default_request: Some(quantities(&[("cpu", "100m"), ("memory", "128Mi")])),
                min: Some(quantities(&[("cpu", "50m"), ("memory", "64Mi")])),
                max: Some(quantities(&[("cpu", "1"), ("memory", "1Gi")])),
                ..Default::default()
            }],
        }),
    }
}

fn namespace_peer(name: &str) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        namespace_selector: Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(
                "kubernetes.io/metadata.name".to_string(),
                name.to_string(),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn intra_namespace_peer() -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        pod_selector: Some(LabelSelector::default()),
        ..Default::default()
    }
}

fn port(protocol: &str, number: i32) -> NetworkPolicyPort {
    NetworkPolicyPort {
        protocol: Some(protocol.to_string()),
        port: Some(IntOrString::Int(number)),
        ..Default::default()
    }
}

/// Deny-by-default isolation. Ingress only from the ingress controller and
/// in-namespace pods; egress only to cluster DNS, in-namespace pods, and
/// outbound HTTP(S) for plugin fetches.
pub fn network_policy(namespace: &str) -> NetworkPolicy {
    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(NETWORK_POLICY_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector::default()),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![
                    namespace_peer(INGRESS_CONTROLLER_NAMESPACE),
                    intra_namespace_peer(),
                ]),
                ..Default::default()
            }]),
            egress: Some(vec![
                NetworkPolicyEgressRule {
                    to: Some(vec![namespace_peer(CLUSTER_DNS_NAMESPACE)]),
                    ports: Some(vec![port("UDP", 53), port("TCP", 53)]),
                },
                NetworkPolicyEgressRule {
                    to: Some(vec![intra_namespace_peer()]),
                    ..Default::default()
                },
                NetworkPolicyEgressRule {
                    to: Some(vec![NetworkPolicyPeer {
                        ip_block: Some(IPBlock {
                            cidr: "0.0.0.0/0".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ports: Some(vec![port("TCP", 80), port("TCP", 443)]),
                },
            ]),
        }),
    }
}

/// Bring a namespace to a state safe for a tenant workload: namespace with
/// standard labels, then quota, limits and network isolation. Every step is
/// individually idempotent.
pub async fn apply(gateway: &Gateway, deadline: &Deadline, store: &Store) -> anyhow::Result<()> {
    let ns = &store.namespace;

    deadline
        .wrap(gateway.ensure_namespace(ns, namespace_labels(store), namespace_annotations()))
        .await??;
    deadline.wrap(gateway.ensure_quota(ns, &quota(ns))).await??;
    deadline
        .wrap(gateway.ensure_limit_range(ns, &limit_range(ns)))
        .await??;
    deadline
        .wrap(gateway.ensure_network_policy(ns, &network_policy(ns)))
        .await??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Store, StoreEngine};

    fn store() -> Store {
        Store::reserve("my-shop", StoreEngine::Woocommerce)
    }

    #[test]
    fn namespace_labels_identify_the_tenant() {
        let store = store();
        let labels = namespace_labels(&store);
        assert_eq!(labels["managed-by"], "urumi-platform");
        assert_eq!(labels["store-id"], store.id);
        assert_eq!(labels["store-name"], "my-shop");
        assert_eq!(labels["engine"], "woocommerce");
    }

    #[test]
    fn quota_caps_match_tenant_budget() {
        let quota = quota("store-abc");
        let hard = quota.spec.unwrap().hard.unwrap();
        assert_eq!(hard["requests.cpu"].0, "500m");
        assert_eq!(hard["limits.cpu"].0, "2");
        assert_eq!(hard["requests.memory"].0, "512Mi");
        assert_eq!(hard["limits.memory"].0, "2Gi");
        assert_eq!(hard["requests.storage"].0, "5Gi");
        assert_eq!(hard["pods"].0, "10");
        assert_eq!(hard["services"].0, "5");
        assert_eq!(hard["secrets"].0, "10");
        assert_eq!(hard["configmaps"].0, "10");
        assert_eq!(hard["persistentvolumeclaims"].0, "3");
    }

    #[test]
    fn limit_range_bounds_containers() {
        let lr = limit_range("store-abc");
        let item = &lr.spec.unwrap().limits[0];
        assert_eq!(item.type_, "Container");
        assert_eq!(item.default.as_ref().unwrap()["cpu"].0, "500m");
        assert_eq!(item.default_request.as_ref().unwrap()["memory"].0, "128Mi");
        assert_eq!(item.min.as_ref().unwrap()["cpu"].0, "50m");
        assert_eq!(item.max.as_ref().unwrap()["memory"].0, "1Gi");
    }

    #[test]
    fn network_policy_denies_by_default() {
        let policy = network_policy("store-abc");
        let spec = policy.spec.unwrap();
        assert_eq!(spec.pod_selector, Some(LabelSelector::default()));
        assert_eq!(
            spec.policy_types,
            Some(vec!["Ingress".to_string(), "Egress".to_string()])
        );

        let ingress = spec.ingress.unwrap();
        assert_eq!(ingress.len(), 1);
        let from = ingress[0].from.as_ref().unwrap();
        assert_eq!(
            from[0]
                .namespace_selector
                .as_ref()
                .unwrap()
                .match_labels
                .as_ref()
                .unwrap()["kubernetes.io/metadata.name"],
            "ingress-nginx"
        );
        assert!(from[1].pod_selector.is_some());

        let egress = spec.egress.unwrap();
        assert_eq!(egress.len(), 3);
        let dns_ports = egress[0].ports.as_ref().unwrap();
        assert_eq!(dns_ports.len(), 2);
        assert_eq!(dns_ports[0].port, Some(IntOrString::Int(53)));
        let web = egress[2].ports.as_ref().unwrap();
        assert_eq!(web[0].port, Some(IntOrString::Int(80)));
        assert_eq!(web[1].port, Some(IntOrString::Int(443)));
    }
}
