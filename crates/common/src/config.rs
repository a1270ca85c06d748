use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis list the digest worker consumes commands from
    pub digest_queue_key: String,

    /// How long the worker blocks on an empty queue before polling again
    pub digest_poll_interval_ms: u64,

    /// Fallback value of the merged-digest-id flag when no override is stored
    pub use_merged_digest_id: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            digest_queue_key: std::env::var("DIGEST_QUEUE_KEY")
                .unwrap_or_else(|_| "digest:commands".to_string()),
            digest_poll_interval_ms: std::env::var("DIGEST_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DIGEST_POLL_INTERVAL_MS must be a valid u64"))?,
            use_merged_digest_id: parse_flag(
                &std::env::var("USE_MERGED_DIGEST_ID").unwrap_or_else(|_| "false".to_string()),
            )
            .ok_or_else(|| anyhow::anyhow!("USE_MERGED_DIGEST_ID must be true or false"))?,
        })
    }
}

/// Parse the boolean spellings accepted in env vars and stored flag values.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
