use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DATABASE", default_value = "urumi")]
    pub postgres_database: String,

    #[arg(long, env = "POSTGRES_USERNAME", default_value = "postgres")]
    pub postgres_username: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,

    /// PEM bundle for the server CA, enables TLS when set
    #[arg(long, env = "POSTGRES_CA_CERT")]
    pub postgres_ca_cert: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct RetryArgs {
    /// Additional attempts after the first failure
    #[arg(long, env = "RETRY_MAX", default_value_t = 3)]
    pub retry_max: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(long, env = "RETRY_INITIAL_DELAY_MS", default_value_t = 1000)]
    pub retry_initial_delay_ms: u64,
}

impl From<RetryArgs> for crate::retry::RetryConfig {
    fn from(args: RetryArgs) -> Self {
        Self {
            max_retries: args.retry_max,
            initial_delay: std::time::Duration::from_millis(args.retry_initial_delay_ms),
            ..Default::default()
        }
    }
}
