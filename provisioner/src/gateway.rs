use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    LimitRange, Namespace, PersistentVolumeClaim, Pod, ResourceQuota, Secret, Service,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::api::{AttachParams, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use tokio::io::AsyncReadExt;

use urumi_common::retry::{self, RetryConfig};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("exec channel error: {0}")]
    Exec(String),

    #[error("command timed out after {0:?}")]
    ExecTimeout(Duration),
}

impl GatewayError {
    /// Transient failures worth another attempt: throttling, server-side
    /// errors, and anything that never reached the API server. Other 4xx
    /// responses are definitive.
    pub fn retryable(&self) -> bool {
        match self {
            GatewayError::Kube {
                source: kube::Error::Api(ae),
            } => matches!(ae.code, 429 | 500 | 502 | 503 | 504),
            GatewayError::Kube { .. } => true,
            GatewayError::Exec(_) | GatewayError::ExecTimeout(_) => false,
        }
    }
}

/// Thin façade over the cluster API, exposing only the operations the
/// provisioning pipeline needs. Every mutation is an idempotent ensure and
/// every call is retry-wrapped, so the whole pipeline is safe to re-run.
#[derive(Clone)]
pub struct Gateway {
    client: Client,
    retry: RetryConfig,
}

impl Gateway {
    /// Infer the cluster config: in-cluster service env vars when deployed,
    /// kubeconfig otherwise.
    pub async fn connect(retry: RetryConfig) -> Result<Self, GatewayError> {
        let client = Client::try_default().await?;
        Ok(Self { client, retry })
    }

    /// Create-if-absent. A 409 from the cluster means the object is already
    /// there, which is success; the existing object is not read back or
    /// mutated.
    async fn ensure<K>(&self, api: &Api<K>, obj: &K) -> Result<(), GatewayError>
    where
        K: Resource + Clone + std::fmt::Debug + serde::Serialize + serde::de::DeserializeOwned,
    {
        retry::retry(&self.retry, GatewayError::retryable, || {
            let api = api.clone();
            async move {
                match api.create(&PostParams::default(), obj).await {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
                    Err(e) => Err(GatewayError::from(e)),
                }
            }
        })
        .await
    }

    pub async fn ensure_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), GatewayError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };
        self.ensure(&api, &namespace).await
    }

    pub async fn ensure_quota(
        &self,
        namespace: &str,
        quota: &ResourceQuota,
    ) -> Result<(), GatewayError> {
        let api: Api<ResourceQuota> = Api::namespaced(self.client.clone(), namespace);
        self.ensure(&api, quota).await
    }

    pub async fn ensure_limit_range(
        &self,
        namespace: &str,
        limits: &LimitRange,
    ) -> Result<(), GatewayError> {
        let api: Api<LimitRange> = Api::namespaced(self.client.clone(), namespace);
        self.ensure(&api, limits).await
    }

    pub async fn ensure_network_policy(
        &self,
        namespace: &str,
        policy: &NetworkPolicy,
    ) -> Result<(), GatewayError> {
        let api: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), namespace);
        self.ensure(&api, policy).await
    }

    pub async fn ensure_secret(
        &self,
        namespace: &str,
        name: &str,
        string_data: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> Result<(), GatewayError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            string_data: Some(string_data),
            ..Default::default()
        };
        self.ensure(&api, &secret).await
    }

    pub async fn ensure_stateful_set(
        &self,
        namespace: &str,
        stateful_set: &StatefulSet,
    ) -> Result<(), GatewayError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        self.ensure(&api, stateful_set).await
    }

    pub async fn ensure_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), GatewayError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.ensure(&api, deployment).await
    }

    pub async fn ensure_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<(), GatewayError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.ensure(&api, service).await
    }

    pub async fn ensure_pvc(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<(), GatewayError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        self.ensure(&api, pvc).await
    }

    pub async fn ensure_ingress(
        &self,
        namespace: &str,
        ingress: &Ingress,
    ) -> Result<(), GatewayError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        self.ensure(&api, ingress).await
    }

    pub async fn deployment_ready_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<i32, GatewayError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        retry::retry(&self.retry, GatewayError::retryable, || {
            let api = api.clone();
            async move {
                let deployment = api.get(name).await?;
                Ok(deployment
                    .status
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0))
            }
        })
        .await
    }

    pub async fn stateful_set_ready_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<i32, GatewayError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        retry::retry(&self.retry, GatewayError::retryable, || {
            let api = api.clone();
            async move {
                let stateful_set = api.get(name).await?;
                Ok(stateful_set
                    .status
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0))
            }
        })
        .await
    }

    /// Delete with foreground propagation: children go before the namespace
    /// itself disappears. An absent namespace is success.
    pub async fn delete_namespace(&self, name: &str) -> Result<(), GatewayError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        retry::retry(&self.retry, GatewayError::retryable, || {
            let api = api.clone();
            async move {
                match api.delete(name, &DeleteParams::foreground()).await {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
                    Err(e) => Err(GatewayError::from(e)),
                }
            }
        })
        .await
    }

    /// None once the namespace is fully gone.
    pub async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, GatewayError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        retry::retry(&self.retry, GatewayError::retryable, || {
            let api = api.clone();
            async move {
                match api.get(name).await {
                    Ok(ns) => Ok(Some(ns)),
                    Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
                    Err(e) => Err(GatewayError::from(e)),
                }
            }
        })
        .await
    }

    pub async fn list_pods_by_label(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>, GatewayError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        retry::retry(&self.retry, GatewayError::retryable, || {
            let api = api.clone();
            async move {
                let pods = api
                    .list(&ListParams::default().labels(selector))
                    .await?;
                Ok(pods.items.iter().map(|p| p.name_any()).collect())
            }
        })
        .await
    }

    /// Run `argv` in a pod through the exec subresource and collect stdout.
    /// The argument vector goes to the container verbatim; no shell is ever
    /// involved.
    pub async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let attach = AttachParams::default().stdout(true).stderr(true);

        let exec = async {
            let mut attached = api.exec(pod, argv.to_vec(), &attach).await?;
            let mut output = String::new();
            if let Some(mut stdout) = attached.stdout() {
                stdout
                    .read_to_string(&mut output)
                    .await
                    .map_err(|e| GatewayError::Exec(e.to_string()))?;
            }
            attached
                .join()
                .await
                .map_err(|e| GatewayError::Exec(e.to_string()))?;
            Ok(output)
        };

        tokio::time::timeout(timeout, exec)
            .await
            .map_err(|_| GatewayError::ExecTimeout(timeout))?
    }

    /// One lightweight read against the API server.
    pub async fn health_ping(&self) -> bool {
        self.client.apiserver_version().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;
    use kube::core::response::StatusSummary;

    fn api_error(code: u16) -> GatewayError {
        GatewayError::from(kube::Error::Api(Box::new(ErrorResponse {
            status: Some(StatusSummary::Failure),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
            details: None,
            metadata: None,
        })))
    }

    #[test]
    fn server_side_errors_are_retryable() {
        for code in [429, 500, 502, 503, 504] {
            assert!(api_error(code).retryable(), "code {code}");
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for code in [400, 401, 403, 404, 409, 422] {
            assert!(!api_error(code).retryable(), "code {code}");
        }
    }

    #[test]
    fn exec_failures_are_not_retryable() {
        assert!(!GatewayError::Exec("broken pipe".into()).retryable());
        assert!(!GatewayError::ExecTimeout(Duration::from_secs(30)).retryable());
    }
}
