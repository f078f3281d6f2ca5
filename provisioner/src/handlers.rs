use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde_json::json;

use urumi_common::{get_source_ip, response};

use crate::audit::{self, AuditEvent, AuditQuery, actions};
use crate::db;
use crate::metrics;
use crate::models::{CreateStoreRequest, StoreEngine, validate_store_name};
use crate::orchestrator::{CreateError, DeleteError};
use crate::server::AppState;

fn source_ip_string(headers: &HeaderMap) -> Option<String> {
    get_source_ip(headers).map(|ip| ip.to_string())
}

/// Audit entries are best-effort on the request path.
async fn record_audit(state: &AppState, event: AuditEvent) {
    let action = event.action.clone();
    if let Err(e) = audit::record(state.orchestrator.pool(), event).await {
        metrics::db_error("audit_record");
        tracing::warn!(action = %action, error = %e, "failed to persist audit entry");
    }
}

/// Validate, rate-limit, admit. Returns 202 with the reserved record; the
/// pipeline keeps running in the background.
pub async fn create_store(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateStoreRequest>,
) -> Response {
    if let Err(reason) = validate_store_name(&req.name) {
        return response::validation_error(reason);
    }
    let engine: StoreEngine = match req.engine.parse() {
        Ok(engine) => engine,
        Err(reason) => return response::validation_error(reason),
    };

    let ip = source_ip_string(&headers);
    if let Some(ref ip) = ip
        && !state.create_limiter.check(ip)
    {
        metrics::rate_limited("create");
        return response::rate_limited("Too many store creations from this address");
    }

    record_audit(
        &state,
        AuditEvent::new(actions::CREATE_REQUESTED)
            .source_ip(ip.clone())
            .details(json!({"name": req.name, "engine": req.engine})),
    )
    .await;

    match state.orchestrator.create_store(&req.name, engine, ip).await {
        Ok(store) => response::accepted(json!({
            "store": store,
            "message": "Store provisioning started",
        })),
        Err(CreateError::EngineReserved(engine)) => {
            response::validation_error(format!("engine '{engine}' is not available yet"))
        }
        Err(CreateError::CapacityReached(cap)) => {
            response::conflict(format!("active store limit of {cap} reached"))
        }
        Err(CreateError::Internal(e)) => {
            tracing::error!("failed to create store: {e:?}");
            response::internal_error()
        }
    }
}

/// List non-deleted stores, most recent first.
pub async fn list_stores(State(state): State<AppState>) -> Response {
    match db::find_all_stores(state.orchestrator.pool()).await {
        Ok(stores) => response::ok(json!({"stores": stores})),
        Err(e) => {
            metrics::db_error("find_all_stores");
            tracing::error!("failed to list stores: {e:?}");
            response::internal_error()
        }
    }
}

pub async fn get_store(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match db::find_store(state.orchestrator.pool(), &id).await {
        Ok(Some(store)) => response::ok(json!({"store": store})),
        Ok(None) => response::not_found(format!("store {id} not found")),
        Err(e) => {
            metrics::db_error("find_store");
            tracing::error!("failed to get store: {e:?}");
            response::internal_error()
        }
    }
}

/// Initiate deletion; the whole teardown (namespace gone, record
/// soft-deleted) happens before the response.
pub async fn delete_store(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let ip = source_ip_string(&headers);
    if let Some(ref ip) = ip
        && !state.delete_limiter.check(ip)
    {
        metrics::rate_limited("delete");
        return response::rate_limited("Too many deletions from this address");
    }

    record_audit(
        &state,
        AuditEvent::new(actions::DELETE_REQUESTED)
            .source_ip(ip.clone())
            .details(json!({"storeId": id})),
    )
    .await;

    match state.orchestrator.delete_store(&id, ip).await {
        Ok(store) => response::ok(json!({
            "store": store,
            "message": "Store deleted",
        })),
        Err(DeleteError::NotFound(id)) => response::not_found(format!("store {id} not found")),
        Err(DeleteError::Conflict(reason)) => response::conflict(reason),
        Err(DeleteError::Internal(e)) => {
            tracing::error!("failed to delete store: {e:?}");
            response::internal_error()
        }
    }
}

/// Query the audit log, newest first.
pub async fn query_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Response {
    match audit::query(state.orchestrator.pool(), &query).await {
        Ok(entries) => response::ok(json!({"entries": entries})),
        Err(e) => {
            metrics::db_error("audit_query");
            tracing::error!("failed to query audit log: {e:?}");
            response::internal_error()
        }
    }
}

/// Liveness: the process answers, nothing else.
pub async fn health_live() -> impl IntoResponse {
    "OK"
}

/// Readiness: both collaborators must answer.
pub async fn health_ready(State(state): State<AppState>) -> Response {
    let cluster_ok = state.orchestrator.gateway().health_ping().await;
    let db_ok = db::health_ping(state.orchestrator.pool()).await.is_ok();

    if cluster_ok && db_ok {
        response::ok(json!({"cluster": true, "database": true}))
    } else {
        response::service_unavailable(format!(
            "not ready: cluster={cluster_ok} database={db_ok}"
        ))
    }
}
