use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use crate::models::now_ms;

/// Action tags recorded by the control plane.
pub mod actions {
    pub const CREATE_REQUESTED: &str = "store.create.requested";
    pub const CREATE_STARTED: &str = "store.create.started";
    pub const CREATE_SUCCEEDED: &str = "store.create.succeeded";
    pub const CREATE_FAILED: &str = "store.create.failed";
    pub const DELETE_REQUESTED: &str = "store.delete.requested";
    pub const DELETE_SUCCEEDED: &str = "store.delete.succeeded";
    pub const DELETE_FAILED: &str = "store.delete.failed";
}

/// A persisted audit record. Entries are append-only and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub recorded_at: i64,
    pub action: String,
    pub store_id: Option<String>,
    pub store_name: Option<String>,
    pub engine: Option<String>,
    pub source_ip: Option<String>,
    pub details: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
}

/// Everything the caller knows about an event; id and timestamp are
/// assigned at record time.
#[derive(Debug, Clone, Default)]
pub struct AuditEvent {
    pub action: String,
    pub store_id: Option<String>,
    pub store_name: Option<String>,
    pub engine: Option<String>,
    pub source_ip: Option<String>,
    pub details: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
}

impl AuditEvent {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Default::default()
        }
    }

    pub fn store(mut self, id: &str, name: &str, engine: &str) -> Self {
        self.store_id = Some(id.to_string());
        self.store_name = Some(name.to_string());
        self.engine = Some(engine.to_string());
        self
    }

    pub fn source_ip(mut self, ip: Option<String>) -> Self {
        self.source_ip = ip;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn duration_ms(mut self, ms: i64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

/// Query filters; results come back most-recent first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub store_id: Option<String>,
    pub action: Option<String>,
    pub limit: Option<i64>,
}

const DEFAULT_QUERY_LIMIT: i64 = 50;
const MAX_QUERY_LIMIT: i64 = 500;

pub async fn init_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("failed to get db connection")?;

    client
        .execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_entries (
                id BIGSERIAL PRIMARY KEY,
                recorded_at BIGINT NOT NULL,
                action TEXT NOT NULL,
                store_id TEXT,
                store_name TEXT,
                engine TEXT,
                source_ip TEXT,
                details JSONB,
                duration_ms BIGINT
            )
            "#,
            &[],
        )
        .await
        .context("failed to create audit_entries table")?;

    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_store_id ON audit_entries (store_id)",
            &[],
        )
        .await
        .context("failed to create audit store_id index")?;

    client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_entries (action)",
            &[],
        )
        .await
        .context("failed to create audit action index")?;

    tracing::info!("audit schema initialized");
    Ok(())
}

fn row_to_entry(row: &Row) -> AuditEntry {
    AuditEntry {
        id: row.get("id"),
        recorded_at: row.get("recorded_at"),
        action: row.get("action"),
        store_id: row.get("store_id"),
        store_name: row.get("store_name"),
        engine: row.get("engine"),
        source_ip: row.get("source_ip"),
        details: row.get("details"),
        duration_ms: row.get("duration_ms"),
    }
}

/// Append one entry. The database assigns the monotonic id; the entry is
/// also emitted to the structured log with secrets redacted.
pub async fn record(pool: &Pool, event: AuditEvent) -> Result<AuditEntry> {
    let client = pool.get().await.context("failed to get db connection")?;

    let recorded_at = now_ms();
    let row = client
        .query_one(
            r#"
            INSERT INTO audit_entries
                (recorded_at, action, store_id, store_name, engine, source_ip, details, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, recorded_at, action, store_id, store_name, engine, source_ip,
                      details, duration_ms
            "#,
            &[
                &recorded_at,
                &event.action,
                &event.store_id,
                &event.store_name,
                &event.engine,
                &event.source_ip,
                &event.details,
                &event.duration_ms,
            ],
        )
        .await
        .context("failed to insert audit entry")?;

    let entry = row_to_entry(&row);
    let details = entry.details.as_ref().map(redact);
    tracing::info!(
        action = %entry.action,
        store_id = entry.store_id.as_deref().unwrap_or("-"),
        source_ip = entry.source_ip.as_deref().unwrap_or("-"),
        details = %details.map(|d| d.to_string()).unwrap_or_default(),
        "audit"
    );
    Ok(entry)
}

/// Query entries, newest first, optionally filtered by store and action.
pub async fn query(pool: &Pool, q: &AuditQuery) -> Result<Vec<AuditEntry>> {
    let client = pool.get().await.context("failed to get db connection")?;

    let limit = q
        .limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT);

    let mut where_clauses = Vec::new();
    let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&limit];
    let mut param_idx = 2;

    if let Some(ref store_id) = q.store_id {
        where_clauses.push(format!("store_id = ${param_idx}"));
        params.push(store_id);
        param_idx += 1;
    }
    if let Some(ref action) = q.action {
        where_clauses.push(format!("action = ${param_idx}"));
        params.push(action);
        param_idx += 1;
    }
    let _ = param_idx;

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };
    let query = format!(
        "SELECT id, recorded_at, action, store_id, store_name, engine, source_ip, \
         details, duration_ms FROM audit_entries {where_sql} ORDER BY id DESC LIMIT $1"
    );

    let rows = client
        .query(&query, &params)
        .await
        .context("failed to query audit entries")?;

    Ok(rows.iter().map(row_to_entry).collect())
}

/// Replace the value of any key containing password/secret/token, at any
/// depth, before the record reaches the log pipeline.
pub fn redact(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let lowered = key.to_lowercase();
                if lowered.contains("password")
                    || lowered.contains("secret")
                    || lowered.contains("token")
                {
                    out.insert(key.clone(), serde_json::Value::String("[REDACTED]".into()));
                } else {
                    out.insert(key.clone(), redact(val));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys_at_any_depth() {
        let details = json!({
            "name": "my-shop",
            "dbPassword": "hunter2",
            "nested": {
                "apiToken": "abc",
                "clientSecret": "def",
                "plain": 1,
            },
            "list": [{"ADMIN_PASSWORD": "x"}],
        });
        let redacted = redact(&details);
        assert_eq!(redacted["name"], "my-shop");
        assert_eq!(redacted["dbPassword"], "[REDACTED]");
        assert_eq!(redacted["nested"]["apiToken"], "[REDACTED]");
        assert_eq!(redacted["nested"]["clientSecret"], "[REDACTED]");
        assert_eq!(redacted["nested"]["plain"], 1);
        assert_eq!(redacted["list"][0]["ADMIN_PASSWORD"], "[REDACTED]");
    }

    #[test]
    fn leaves_plain_values_untouched() {
        let details = json!({"engine": "woocommerce", "count": 3});
        assert_eq!(redact(&details), details);
    }

    #[test]
    fn event_builder_fills_fields() {
        let event = AuditEvent::new(actions::CREATE_STARTED)
            .store("a1b2c3d4", "my-shop", "woocommerce")
            .source_ip(Some("203.0.113.10".into()))
            .duration_ms(42);
        assert_eq!(event.action, "store.create.started");
        assert_eq!(event.store_id.as_deref(), Some("a1b2c3d4"));
        assert_eq!(event.duration_ms, Some(42));
    }
}
