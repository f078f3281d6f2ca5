pub mod application;
pub mod database;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use urumi_common::labels;

/// Selector labels for one workload within a tenant namespace.
pub fn workload_labels(store_id: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string()),
        (labels::STORE_ID.to_string(), store_id.to_string()),
        ("app".to_string(), component.to_string()),
    ])
}

pub fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

pub fn env_literal(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

pub fn env_from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    use k8s_openapi::api::core::v1::{EnvVarSource, SecretKeySelector};

    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_labels_carry_component_selector() {
        let labels = workload_labels("a1b2c3d4", "mariadb");
        assert_eq!(labels["app"], "mariadb");
        assert_eq!(labels["store-id"], "a1b2c3d4");
        assert_eq!(labels["managed-by"], "urumi-platform");
    }

    #[test]
    fn secret_env_references_key() {
        let env = env_from_secret("DB_PASSWORD", "store-db", "db-password");
        let selector = env
            .value_from
            .unwrap()
            .secret_key_ref
            .unwrap();
        assert_eq!(selector.name, "store-db");
        assert_eq!(selector.key, "db-password");
        assert!(env.value.is_none());
    }
}
