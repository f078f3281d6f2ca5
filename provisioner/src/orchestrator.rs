use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use deadpool_postgres::Pool;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use urumi_common::retry::Deadline;

use crate::audit::{self, AuditEvent, actions};
use crate::db;
use crate::gateway::Gateway;
use crate::metrics;
use crate::models::{ProvisionPhase, Store, StoreEngine, StoreStatus, StoreUpdate, now_ms};
use crate::postinstall;
use crate::tenancy;
use crate::workloads::{application, database};

const DELETE_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub store_domain: String,
    pub ingress_class: String,
    pub db_ready_timeout: Duration,
    pub app_ready_timeout: Duration,
    pub db_storage_size: String,
    pub app_storage_size: String,
    pub max_active_stores: i64,
    pub provision_deadline: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("engine '{0}' is reserved and not yet available")]
    EngineReserved(String),

    #[error("active store limit of {0} reached")]
    CapacityReached(i64),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("store {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
enum TransitionError {
    #[error("transition {from} -> {to} is not allowed")]
    Illegal { from: StoreStatus, to: StoreStatus },

    #[error("store {0} not found")]
    Gone(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Owns every mutation of a store record. The admission surface only reads
/// records and inserts the initial reservation through `create_store`; all
/// later transitions happen on the background worker spawned here.
#[derive(Clone)]
pub struct Orchestrator {
    pool: Pool,
    gateway: Gateway,
    config: OrchestratorConfig,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        pool: Pool,
        gateway: Gateway,
        config: OrchestratorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            gateway,
            config,
            shutdown,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Admission checks, reservation, dispatch. Returns the reserved record
    /// immediately; the pipeline continues on its own worker.
    pub async fn create_store(
        &self,
        name: &str,
        engine: StoreEngine,
        source_ip: Option<String>,
    ) -> Result<Store, CreateError> {
        if engine != StoreEngine::Woocommerce {
            return Err(CreateError::EngineReserved(engine.to_string()));
        }

        // Read-then-insert: a concurrent burst can briefly overshoot by one.
        let active = db::count_active_stores(&self.pool)
            .await
            .context("count active stores")?;
        if active >= self.config.max_active_stores {
            return Err(CreateError::CapacityReached(self.config.max_active_stores));
        }

        let store = Store::reserve(name, engine);
        db::create_store(&self.pool, &store)
            .await
            .context("reserve store record")?;

        self.audit(
            AuditEvent::new(actions::CREATE_STARTED)
                .store(&store.id, &store.name, store.engine.as_str())
                .source_ip(source_ip),
        )
        .await;
        metrics::store_create_accepted();

        let worker = self.clone();
        let record = store.clone();
        tokio::spawn(async move { worker.run_pipeline(record).await });

        Ok(store)
    }

    /// One provisioning run: four phases under a shared deadline, with a
    /// durable checkpoint after each phase. Shutdown cancels cooperatively,
    /// leaving the record at its last committed checkpoint.
    async fn run_pipeline(&self, store: Store) {
        let deadline = Deadline::new(self.config.provision_deadline);

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::warn!(store_id = %store.id, "shutdown during provisioning; leaving last checkpoint");
                return;
            }
            result = self.drive_phases(&store, &deadline) => result,
        };

        if let Err(err) = result {
            self.fail_and_cleanup(&store, err).await;
        }
    }

    async fn drive_phases(&self, store: &Store, deadline: &Deadline) -> anyhow::Result<()> {
        let id = &store.id;

        // Phase 1: namespace and tenancy isolation
        let phase_started = Instant::now();
        tenancy::apply(&self.gateway, deadline, store).await?;
        metrics::phase_completed("namespace", phase_started.elapsed().as_secs_f64());
        self.checkpoint(id, StoreUpdate {
            phase: Some(Some(ProvisionPhase::Database)),
            ..Default::default()
        })
        .await?;

        // Phase 2: database workload
        let phase_started = Instant::now();
        let db_conn = database::deploy(
            &self.gateway,
            deadline,
            store,
            &self.config.db_storage_size,
            self.config.db_ready_timeout,
        )
        .await?;
        metrics::phase_completed("database", phase_started.elapsed().as_secs_f64());
        self.checkpoint(id, StoreUpdate {
            db_ready: Some(true),
            phase: Some(Some(ProvisionPhase::Application)),
            ..Default::default()
        })
        .await?;

        // Phase 3: application workload
        let phase_started = Instant::now();
        let hostname = application::hostname(id, &self.config.store_domain);
        application::deploy(
            &self.gateway,
            deadline,
            store,
            &db_conn,
            &hostname,
            &self.config.app_storage_size,
            &self.config.ingress_class,
            self.config.app_ready_timeout,
        )
        .await?;
        metrics::phase_completed("application", phase_started.elapsed().as_secs_f64());
        self.checkpoint(id, StoreUpdate {
            app_ready: Some(true),
            phase: Some(Some(ProvisionPhase::Validation)),
            ..Default::default()
        })
        .await?;

        // Phase 4: best-effort post-install, then the terminal checkpoint.
        // The store goes ready regardless of the hook's outcome.
        match deadline
            .wrap(postinstall::run(&self.gateway, &store.namespace, id, &hostname))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(store_id = %id, error = %e, "post-install hook failed")
            }
            Err(e) => tracing::warn!(store_id = %id, error = %e, "post-install hook timed out"),
        }

        let url = format!("http://{hostname}");
        let admin_url = format!("{url}/wp-admin");
        let now = now_ms();
        let duration_ms = now - store.created_at;
        self.transition(id, StoreStatus::Ready, StoreUpdate {
            phase: Some(None),
            url: Some(url.clone()),
            admin_url: Some(admin_url),
            ready_at: Some(now),
            provisioning_duration_ms: Some(duration_ms),
            ..Default::default()
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;

        self.audit(
            AuditEvent::new(actions::CREATE_SUCCEEDED)
                .store(id, &store.name, store.engine.as_str())
                .details(json!({"url": url}))
                .duration_ms(duration_ms),
        )
        .await;
        metrics::store_provisioned(duration_ms as f64 / 1000.0);
        tracing::info!(store_id = %id, url = %url, duration_ms, "store provisioned");
        Ok(())
    }

    /// Record the failure against the phase that was executing, then tear
    /// the namespace down. Cleanup errors are logged and do not resurrect
    /// the record.
    async fn fail_and_cleanup(&self, store: &Store, err: anyhow::Error) {
        let id = &store.id;
        let message = format!("{err:#}");
        tracing::error!(store_id = %id, error = %message, "provisioning failed");

        let failed_phase = match db::find_store(&self.pool, id).await {
            Ok(Some(current)) => current.phase.map(|p| p.as_str().to_string()),
            Ok(None) => None,
            Err(e) => {
                metrics::db_error("find_store");
                tracing::error!(store_id = %id, error = %e, "failed to read phase for failure record");
                None
            }
        };
        let phase_label = failed_phase.unwrap_or_else(|| "unknown".to_string());

        if let Err(e) = self
            .transition(id, StoreStatus::Failed, StoreUpdate {
                phase: Some(None),
                error_message: Some(Some(message.clone())),
                error_phase: Some(Some(phase_label.clone())),
                ..Default::default()
            })
            .await
        {
            tracing::error!(store_id = %id, error = %e, "failed to mark store failed");
        }

        self.audit(
            AuditEvent::new(actions::CREATE_FAILED)
                .store(id, &store.name, store.engine.as_str())
                .details(json!({"error": message, "phase": phase_label})),
        )
        .await;
        metrics::store_failed(&phase_label);

        if let Err(e) = self.gateway.delete_namespace(&store.namespace).await {
            tracing::error!(
                store_id = %id,
                namespace = %store.namespace,
                error = %e,
                "cascade cleanup failed; namespace left behind"
            );
        }
    }

    /// Tear down one store: foreground namespace delete, wait for gone,
    /// soft-delete the record. Idempotent for already-deleted stores.
    pub async fn delete_store(
        &self,
        id: &str,
        source_ip: Option<String>,
    ) -> Result<Store, DeleteError> {
        let store = db::find_store(&self.pool, id)
            .await
            .context("look up store")?
            .ok_or_else(|| DeleteError::NotFound(id.to_string()))?;

        if store.status == StoreStatus::Deleted {
            return Ok(store);
        }

        // Error fields travel with the failed state only
        self.transition(id, StoreStatus::Deleting, StoreUpdate {
            error_message: Some(None),
            error_phase: Some(None),
            ..Default::default()
        })
        .await
            .map_err(|e| match e {
                TransitionError::Illegal { .. } => DeleteError::Conflict(e.to_string()),
                TransitionError::Gone(id) => DeleteError::NotFound(id),
                TransitionError::Internal(e) => DeleteError::Internal(e),
            })?;

        match self.teardown(&store).await {
            Ok(deleted) => {
                self.audit(
                    AuditEvent::new(actions::DELETE_SUCCEEDED)
                        .store(id, &store.name, store.engine.as_str())
                        .source_ip(source_ip),
                )
                .await;
                metrics::store_deleted();
                Ok(deleted)
            }
            Err(err) => {
                let message = format!("Deletion failed: {err:#}");
                tracing::error!(store_id = %id, error = %message, "deletion failed");
                if let Err(e) = self
                    .transition(id, StoreStatus::Failed, StoreUpdate {
                        error_message: Some(Some(message.clone())),
                        error_phase: Some(Some("deletion".to_string())),
                        ..Default::default()
                    })
                    .await
                {
                    tracing::error!(store_id = %id, error = %e, "failed to mark deletion failure");
                }
                self.audit(
                    AuditEvent::new(actions::DELETE_FAILED)
                        .store(id, &store.name, store.engine.as_str())
                        .source_ip(source_ip)
                        .details(json!({"error": message})),
                )
                .await;
                Err(DeleteError::Internal(err))
            }
        }
    }

    async fn teardown(&self, store: &Store) -> anyhow::Result<Store> {
        self.gateway.delete_namespace(&store.namespace).await?;

        let started = Instant::now();
        loop {
            if self.gateway.get_namespace(&store.namespace).await?.is_none() {
                break;
            }
            if started.elapsed() >= DELETE_WAIT_TIMEOUT {
                anyhow::bail!(
                    "namespace {} still terminating after {}s",
                    store.namespace,
                    DELETE_WAIT_TIMEOUT.as_secs()
                );
            }
            tokio::time::sleep(DELETE_POLL_INTERVAL).await;
        }

        db::soft_delete_store(&self.pool, &store.id)
            .await?
            .ok_or_else(|| anyhow!("store {} disappeared during delete", store.id))
    }

    /// Mid-pipeline checkpoint; status stays `provisioning`.
    async fn checkpoint(&self, id: &str, update: StoreUpdate) -> anyhow::Result<Store> {
        db::update_store(&self.pool, id, &update)
            .await?
            .ok_or_else(|| anyhow!("store {id} disappeared during checkpoint"))
    }

    /// Guarded status change; anything outside the state machine table is
    /// rejected before touching the repository.
    async fn transition(
        &self,
        id: &str,
        to: StoreStatus,
        mut update: StoreUpdate,
    ) -> Result<Store, TransitionError> {
        let current = db::find_store(&self.pool, id)
            .await
            .map_err(TransitionError::Internal)?
            .ok_or_else(|| TransitionError::Gone(id.to_string()))?;

        if !current.status.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: current.status,
                to,
            });
        }

        update.status = Some(to);
        db::update_store(&self.pool, id, &update)
            .await
            .map_err(TransitionError::Internal)?
            .ok_or_else(|| TransitionError::Gone(id.to_string()))
    }

    /// Audit failures never fail the operation being audited; the entry is
    /// lost but the log line survives.
    async fn audit(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = audit::record(&self.pool, event).await {
            metrics::db_error("audit_record");
            tracing::warn!(action = %action, error = %e, "failed to persist audit entry");
        }
    }
}
