use clap::Parser;
use urumi_common::args::{PostgresArgs, RetryArgs};

#[derive(Parser, Debug, Clone)]
#[command(name = "urumi-provisioner")]
#[command(about = "Control plane that provisions isolated stores on Kubernetes")]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Environment tag; production tightens CORS
    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    pub environment: String,

    /// Allowed CORS origins in production, comma-separated
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub retry: RetryArgs,

    /// Domain under which store hostnames are created
    #[arg(long, env = "STORE_DOMAIN", default_value = "localhost")]
    pub store_domain: String,

    /// Ingress class for tenant ingresses
    #[arg(long, env = "INGRESS_CLASS", default_value = "nginx")]
    pub ingress_class: String,

    /// Seconds to wait for the tenant database to report ready
    #[arg(long, env = "DB_READY_TIMEOUT_SECS", default_value_t = 90)]
    pub db_ready_timeout_secs: u64,

    /// Seconds to wait for the storefront to report ready
    #[arg(long, env = "APP_READY_TIMEOUT_SECS", default_value_t = 180)]
    pub app_ready_timeout_secs: u64,

    /// Storage request for the tenant database volume
    #[arg(long, env = "DB_STORAGE_SIZE", default_value = "2Gi")]
    pub db_storage_size: String,

    /// Storage request for the storefront content volume
    #[arg(long, env = "APP_STORAGE_SIZE", default_value = "2Gi")]
    pub app_storage_size: String,

    /// Hard cap on stores counting against the tenancy budget
    #[arg(long, env = "MAX_ACTIVE_STORES", default_value_t = 10)]
    pub max_active_stores: i64,

    /// End-to-end budget for one provisioning run, in seconds
    #[arg(long, env = "PROVISION_DEADLINE_SECS", default_value_t = 300)]
    pub provision_deadline_secs: u64,

    /// Serve Prometheus metrics on this port when set
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,
}
