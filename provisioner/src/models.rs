use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Short opaque store identifier: 8 lowercase hex chars, URL-safe.
pub fn generate_store_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// The tenant namespace is derived from the id and never mutated afterwards.
pub fn namespace_for(id: &str) -> String {
    format!("store-{id}")
}

/// Human label: 3-50 chars, lowercase alphanumerics and hyphens.
pub fn validate_store_name(name: &str) -> Result<(), String> {
    if name.len() < 3 || name.len() > 50 {
        return Err("name must be between 3 and 50 characters".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("name may only contain lowercase letters, digits and hyphens".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreEngine {
    Woocommerce,
    /// Reserved; rejected at admission
    Medusa,
}

impl StoreEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreEngine::Woocommerce => "woocommerce",
            StoreEngine::Medusa => "medusa",
        }
    }
}

impl FromStr for StoreEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "woocommerce" => Ok(StoreEngine::Woocommerce),
            "medusa" => Ok(StoreEngine::Medusa),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

impl fmt::Display for StoreEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Pending,
    Provisioning,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl StoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStatus::Pending => "pending",
            StoreStatus::Provisioning => "provisioning",
            StoreStatus::Ready => "ready",
            StoreStatus::Failed => "failed",
            StoreStatus::Deleting => "deleting",
            StoreStatus::Deleted => "deleted",
        }
    }

    /// An active store counts against the tenancy cap.
    pub fn is_active(&self) -> bool {
        !matches!(self, StoreStatus::Failed | StoreStatus::Deleted)
    }

    /// The lifecycle state machine. Everything not listed here is rejected.
    pub fn can_transition_to(self, to: StoreStatus) -> bool {
        use StoreStatus::*;
        matches!(
            (self, to),
            (Pending, Provisioning)
                | (Pending, Failed)
                | (Pending, Deleting)
                | (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, Deleting)
                | (Failed, Provisioning)
                | (Failed, Deleting)
                | (Deleting, Failed)
                | (Deleting, Deleted)
        )
    }
}

impl FromStr for StoreStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StoreStatus::Pending),
            "provisioning" => Ok(StoreStatus::Provisioning),
            "ready" => Ok(StoreStatus::Ready),
            "failed" => Ok(StoreStatus::Failed),
            "deleting" => Ok(StoreStatus::Deleting),
            "deleted" => Ok(StoreStatus::Deleted),
            other => Err(format!("unknown store status: {other}")),
        }
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four ordered stages of the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionPhase {
    Namespace,
    Database,
    Application,
    Validation,
}

impl ProvisionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionPhase::Namespace => "namespace",
            ProvisionPhase::Database => "database",
            ProvisionPhase::Application => "application",
            ProvisionPhase::Validation => "validation",
        }
    }
}

impl FromStr for ProvisionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "namespace" => Ok(ProvisionPhase::Namespace),
            "database" => Ok(ProvisionPhase::Database),
            "application" => Ok(ProvisionPhase::Application),
            "validation" => Ok(ProvisionPhase::Validation),
            other => Err(format!("unknown provisioning phase: {other}")),
        }
    }
}

impl fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable store record. Timestamps are unix epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub engine: StoreEngine,
    pub status: StoreStatus,
    pub phase: Option<ProvisionPhase>,
    pub url: Option<String>,
    pub admin_url: Option<String>,
    pub db_ready: bool,
    pub app_ready: bool,
    pub error_message: Option<String>,
    pub error_phase: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub ready_at: Option<i64>,
    pub deleted_at: Option<i64>,
    pub provisioning_duration_ms: Option<i64>,
}

impl Store {
    /// Fresh reservation in the provisioning state, namespace phase.
    pub fn reserve(name: &str, engine: StoreEngine) -> Self {
        let id = generate_store_id();
        let namespace = namespace_for(&id);
        let now = now_ms();
        Store {
            id,
            name: name.to_string(),
            namespace,
            engine,
            status: StoreStatus::Provisioning,
            phase: Some(ProvisionPhase::Namespace),
            url: None,
            admin_url: None,
            db_ready: false,
            app_ready: false,
            error_message: None,
            error_phase: None,
            created_at: now,
            updated_at: now,
            ready_at: None,
            deleted_at: None,
            provisioning_duration_ms: None,
        }
    }
}

/// Partial update for the single-statement repository update. `None` leaves
/// a column untouched; the nested options write NULL.
#[derive(Debug, Default, Clone)]
pub struct StoreUpdate {
    pub status: Option<StoreStatus>,
    pub phase: Option<Option<ProvisionPhase>>,
    pub url: Option<String>,
    pub admin_url: Option<String>,
    pub db_ready: Option<bool>,
    pub app_ready: Option<bool>,
    pub error_message: Option<Option<String>>,
    pub error_phase: Option<Option<String>>,
    pub ready_at: Option<i64>,
    pub provisioning_duration_ms: Option<i64>,
}

/// Request body for store creation. The engine arrives as free text so the
/// admission surface can reject unknown values with a validation error.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStoreRequest {
    pub name: String,
    pub engine: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_and_url_safe() {
        for _ in 0..50 {
            let id = generate_store_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn namespace_derives_from_id() {
        let store = Store::reserve("my-shop", StoreEngine::Woocommerce);
        assert_eq!(store.namespace, format!("store-{}", store.id));
    }

    #[test]
    fn reservation_starts_in_namespace_phase() {
        let store = Store::reserve("my-shop", StoreEngine::Woocommerce);
        assert_eq!(store.status, StoreStatus::Provisioning);
        assert_eq!(store.phase, Some(ProvisionPhase::Namespace));
        assert!(!store.db_ready);
        assert!(!store.app_ready);
    }

    #[test]
    fn name_length_boundaries() {
        assert!(validate_store_name("ab").is_err());
        assert!(validate_store_name("abc").is_ok());
        assert!(validate_store_name(&"a".repeat(50)).is_ok());
        assert!(validate_store_name(&"a".repeat(51)).is_err());
    }

    #[test]
    fn name_charset_boundaries() {
        assert!(validate_store_name("abc_def").is_err());
        assert!(validate_store_name("abc-def").is_ok());
        assert!(validate_store_name("ABC").is_err());
        assert!(validate_store_name("123").is_ok());
    }

    #[test]
    fn allowed_transitions_match_the_table() {
        use StoreStatus::*;
        let allowed = [
            (Pending, Provisioning),
            (Pending, Failed),
            (Pending, Deleting),
            (Provisioning, Ready),
            (Provisioning, Failed),
            (Ready, Deleting),
            (Failed, Provisioning),
            (Failed, Deleting),
            (Deleting, Failed),
            (Deleting, Deleted),
        ];
        let all = [Pending, Provisioning, Ready, Failed, Deleting, Deleted];
        for from in all {
            for to in all {
                let expect = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expect,
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn deleted_is_terminal() {
        use StoreStatus::*;
        for to in [Pending, Provisioning, Ready, Failed, Deleting, Deleted] {
            assert!(!Deleted.can_transition_to(to));
        }
    }

    #[test]
    fn active_states_exclude_failed_and_deleted() {
        use StoreStatus::*;
        assert!(Pending.is_active());
        assert!(Provisioning.is_active());
        assert!(Ready.is_active());
        assert!(Deleting.is_active());
        assert!(!Failed.is_active());
        assert!(!Deleted.is_active());
    }

    #[test]
    fn status_round_trips_through_text() {
        use StoreStatus::*;
        for status in [Pending, Provisioning, Ready, Failed, Deleting, Deleted] {
            assert_eq!(status.as_str().parse::<StoreStatus>(), Ok(status));
        }
    }

    #[test]
    fn store_serializes_camel_case() {
        let store = Store::reserve("my-shop", StoreEngine::Woocommerce);
        let value = serde_json::to_value(&store).unwrap();
        assert_eq!(value["status"], "provisioning");
        assert_eq!(value["phase"], "namespace");
        assert_eq!(value["dbReady"], false);
        assert!(value.get("createdAt").is_some());
    }
}
