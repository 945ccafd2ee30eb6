use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub shopify: ShopifyConfig,
    pub object_store: ObjectStoreConfig,
    pub engine: EngineConfig,
    pub error_sink: ErrorSinkConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            database: DatabaseConfig::from_env(),
            shopify: ShopifyConfig::from_env(),
            object_store: ObjectStoreConfig::from_env(),
            engine: EngineConfig::from_env(),
            error_sink: ErrorSinkConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:       {}:{}", self.server.host, self.server.port);
        tracing::info!("  database:     configured={}", self.database.is_configured());
        tracing::info!("  shopify:      webhooks={}", self.shopify.is_configured());
        tracing::info!("  object store: prefix={}", self.object_store.prefix.as_deref().unwrap_or("(none)"));
        tracing::info!(
            "  engine:       leaderboard_refresh={}s, catalog_ttl={}s",
            self.engine.leaderboard_refresh_secs,
            self.engine.catalog_ttl_secs
        );
        tracing::info!("  error sink:   configured={}", self.error_sink.url.is_some());
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_u16("PORT", 3001),
            cors_origin: env_or("CORS_ORIGIN", "*"),
        }
    }
}

// ── Database ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl DatabaseConfig {
    fn from_env() -> Self {
        Self {
            url: env_opt("DATABASE_URL"),
            max_connections: env_u32("DB_MAX_CONNECTIONS", 10),
        }
    }

    /// Missing DATABASE_URL is fatal at startup; other subsystems fail soft.
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

// ── Shopify webhooks ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopifyConfig {
    /// HMAC secret for webhook signature verification. Absent secret
    /// disables the webhook endpoint (fail-soft), never the verification.
    pub api_secret: Option<String>,
}

impl ShopifyConfig {
    fn from_env() -> Self {
        Self {
            api_secret: env_opt("SHOPIFY_API_SECRET"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_secret.is_some()
    }
}

// ── Object store ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Public prefix prepended to relative icon paths.
    pub prefix: Option<String>,
}

impl ObjectStoreConfig {
    fn from_env() -> Self {
        Self {
            prefix: env_opt("OBJECT_STORE_PREFIX"),
        }
    }
}

// ── Engine tunables ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub leaderboard_refresh_secs: u64,
    pub catalog_ttl_secs: u64,
    pub classification_ttl_secs: u64,
    /// Per-step store timeouts, milliseconds.
    pub catalog_read_timeout_ms: u64,
    pub state_read_timeout_ms: u64,
    pub state_write_timeout_ms: u64,
    pub publish_timeout_ms: u64,
}

impl EngineConfig {
    fn from_env() -> Self {
        Self {
            leaderboard_refresh_secs: env_u64("LEADERBOARD_REFRESH_SECS", 60),
            catalog_ttl_secs: env_u64("CATALOG_TTL_SECS", 300),
            classification_ttl_secs: env_u64("CLASSIFICATION_TTL_SECS", 300),
            catalog_read_timeout_ms: env_u64("CATALOG_READ_TIMEOUT_MS", 500),
            state_read_timeout_ms: env_u64("STATE_READ_TIMEOUT_MS", 500),
            state_write_timeout_ms: env_u64("STATE_WRITE_TIMEOUT_MS", 2000),
            publish_timeout_ms: env_u64("PUBLISH_TIMEOUT_MS", 1000),
        }
    }
}

// ── Error sink ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSinkConfig {
    /// Webhook URL for non-transient failure reports. Unset disables
    /// reporting (fail-soft).
    pub url: Option<String>,
}

impl ErrorSinkConfig {
    fn from_env() -> Self {
        Self {
            url: env_opt("ERROR_SINK_URL"),
        }
    }
}
