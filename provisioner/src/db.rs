use anyhow::{Context, Result, anyhow};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::models::{Store, StoreUpdate, now_ms};

/// Initialize the database schema, creating tables if they don't exist.
pub async fn init_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS stores (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                namespace TEXT NOT NULL,
                engine TEXT NOT NULL,
                status TEXT NOT NULL,
                phase TEXT,
                url TEXT,
                admin_url TEXT,
                db_ready BOOLEAN NOT NULL DEFAULT FALSE,
                app_ready BOOLEAN NOT NULL DEFAULT FALSE,
                error_message TEXT,
                error_phase TEXT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                ready_at BIGINT,
                deleted_at BIGINT,
                provisioning_duration_ms BIGINT
            )
            "#,
            &[],
        )
        .await
        .context("failed to create stores table")?;

    client
        .execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_stores_status ON stores (status)
            "#,
            &[],
        )
        .await
        .context("failed to create status index")?;

    client
        .execute(
            r#"
            CREATE INDEX IF NOT EXISTS idx_stores_created_at ON stores (created_at DESC)
            "#,
            &[],
        )
        .await
        .context("failed to create created_at index")?;

    tracing::info!("store schema initialized");
    Ok(())
}

const STORE_COLUMNS: &str = "id, name, namespace, engine, status, phase, url, admin_url, \
     db_ready, app_ready, error_message, error_phase, created_at, updated_at, ready_at, \
     deleted_at, provisioning_duration_ms";

fn row_to_store(row: &Row) -> Result<Store> {
    let engine: String = row.get("engine");
    let status: String = row.get("status");
    let phase: Option<String> = row.get("phase");
    Ok(Store {
        id: row.get("id"),
        name: row.get("name"),
        namespace: row.get("namespace"),
        engine: engine.parse().map_err(|e| anyhow!("bad engine column: {e}"))?,
        status: status.parse().map_err(|e| anyhow!("bad status column: {e}"))?,
        phase: phase
            .map(|p| p.parse().map_err(|e| anyhow!("bad phase column: {e}")))
            .transpose()?,
        url: row.get("url"),
        admin_url: row.get("admin_url"),
        db_ready: row.get("db_ready"),
        app_ready: row.get("app_ready"),
        error_message: row.get("error_message"),
        error_phase: row.get("error_phase"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        ready_at: row.get("ready_at"),
        deleted_at: row.get("deleted_at"),
        provisioning_duration_ms: row.get("provisioning_duration_ms"),
    })
}

/// Insert a freshly reserved store record.
pub async fn create_store(pool: &Pool, store: &Store) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    client
        .execute(
            r#"
            INSERT INTO stores (id, name, namespace, engine, status, phase, db_ready,
                                app_ready, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
            &[
                &store.id,
                &store.name,
                &store.namespace,
                &store.engine.as_str(),
                &store.status.as_str(),
                &store.phase.map(|p| p.as_str()),
                &store.db_ready,
                &store.app_ready,
                &store.created_at,
                &store.updated_at,
            ],
        )
        .await
        .context("failed to insert store")?;

    Ok(())
}

/// Mutate only the provided fields in a single statement; `updated_at` is
/// always refreshed. Returns the updated row, or None for an unknown id.
pub async fn update_store(pool: &Pool, id: &str, update: &StoreUpdate) -> Result<Option<Store>> {
    let client = pool.get().await.context("failed to get db connection")?;

    let now = now_ms();
    let status = update.status.map(|s| s.as_str());
    let phase = update.phase.map(|p| p.map(|p| p.as_str()));

    let mut set_clauses = vec!["updated_at = $2".to_string()];
    let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&id, &now];
    let mut param_idx = 3;

    if let Some(ref s) = status {
        set_clauses.push(format!("status = ${param_idx}"));
        params.push(s);
        param_idx += 1;
    }
    if let Some(ref p) = phase {
        set_clauses.push(format!("phase = ${param_idx}"));
        params.push(p);
        param_idx += 1;
    }
    if let Some(ref url) = update.url {
        set_clauses.push(format!("url = ${param_idx}"));
        params.push(url);
        param_idx += 1;
    }
    if let Some(ref admin_url) = update.admin_url {
        set_clauses.push(format!("admin_url = ${param_idx}"));
        params.push(admin_url);
        param_idx += 1;
    }
    if let Some(ref db_ready) = update.db_ready {
        set_clauses.push(format!("db_ready = ${param_idx}"));
        params.push(db_ready);
        param_idx += 1;
    }
    if let Some(ref app_ready) = update.app_ready {
        set_clauses.push(format!("app_ready = ${param_idx}"));
        params.push(app_ready);
        param_idx += 1;
    }
    if let Some(ref error_message) = update.error_message {
        set_clauses.push(format!("error_message = ${param_idx}"));
        params.push(error_message);
        param_idx += 1;
    }
    if let Some(ref error_phase) = update.error_phase {
        set_clauses.push(format!("error_phase = ${param_idx}"));
        params.push(error_phase);
        param_idx += 1;
    }
    if let Some(ref ready_at) = update.ready_at {
        set_clauses.push(format!("ready_at = ${param_idx}"));
        params.push(ready_at);
        param_idx += 1;
    }
    if let Some(ref duration) = update.provisioning_duration_ms {
        set_clauses.push(format!("provisioning_duration_ms = ${param_idx}"));
        params.push(duration);
        param_idx += 1;
    }
    let _ = param_idx;

    let query = format!(
        "UPDATE stores SET {} WHERE id = $1 RETURNING {STORE_COLUMNS}",
        set_clauses.join(", "),
    );

    let row = client
        .query_opt(&query, &params)
        .await
        .context("failed to update store")?;

    row.as_ref().map(row_to_store).transpose()
}

/// Get a store by its ID, including soft-deleted records.
pub async fn find_store(pool: &Pool, id: &str) -> Result<Option<Store>> {
    let client = pool.get().await.context("failed to get db connection")?;

    let row = client
        .query_opt(
            &format!("SELECT {STORE_COLUMNS} FROM stores WHERE id = $1"),
            &[&id],
        )
        .await
        .context("failed to query store")?;

    row.as_ref().map(row_to_store).transpose()
}

/// List stores, most recent first. Soft-deleted records are hidden.
pub async fn find_all_stores(pool: &Pool) -> Result<Vec<Store>> {
    let client = pool.get().await.context("failed to get db connection")?;

    let rows = client
        .query(
            &format!(
                "SELECT {STORE_COLUMNS} FROM stores \
                 WHERE status <> 'deleted' ORDER BY created_at DESC"
            ),
            &[],
        )
        .await
        .context("failed to list stores")?;

    rows.iter().map(row_to_store).collect()
}

/// Number of records counting against the active-store cap.
pub async fn count_active_stores(pool: &Pool) -> Result<i64> {
    let client = pool.get().await.context("failed to get db connection")?;

    let row = client
        .query_one(
            "SELECT COUNT(*) FROM stores WHERE status NOT IN ('failed', 'deleted')",
            &[],
        )
        .await
        .context("failed to count active stores")?;

    Ok(row.get(0))
}

/// Mark a store deleted, retaining the row for audit.
pub async fn soft_delete_store(pool: &Pool, id: &str) -> Result<Option<Store>> {
    let client = pool.get().await.context("failed to get db connection")?;

    let now = now_ms();
    let row = client
        .query_opt(
            &format!(
                "UPDATE stores SET status = 'deleted', deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 RETURNING {STORE_COLUMNS}"
            ),
            &[&id, &now],
        )
        .await
        .context("failed to soft-delete store")?;

    row.as_ref().map(row_to_store).transpose()
}

/// One trivial read; used by the readiness probe.
pub async fn health_ping(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;
    client
        .query_one("SELECT 1", &[])
        .await
        .context("health query failed")?;
    Ok(())
}
