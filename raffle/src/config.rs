//! Configuration management for the raffle order service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Values without a safe default (database URL, provider token, admin
//! credentials) fail fast at startup with [`ConfigError`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Configuration could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("invalid value for {key}: '{value}'")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Which data store backs the service
    pub store: StoreBackend,
    /// `PostgreSQL` configuration (used when `store` is `postgres`)
    pub postgres: PostgresConfig,
    /// `PayPhone` card payments
    pub payphone: PayPhoneConfig,
    /// Admin authorization
    pub auth: AuthConfig,
    /// Transfer-proof object storage
    pub storage: StorageConfig,
    /// Order confirmation dispatch
    pub notifications: NotificationConfig,
    /// Reservation rules
    pub reservations: ReservationConfig,
}

/// Data store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// `PostgreSQL` via `sqlx`
    Postgres,
    /// Process-local maps; data is lost on restart
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Apply bundled migrations at startup
    pub run_migrations: bool,
}

/// `PayPhone` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayPhoneConfig {
    /// Whether card checkout is offered
    pub enabled: bool,
    /// API base URL
    pub base_url: String,
    /// Merchant bearer token
    pub token: String,
    /// Merchant store id
    pub store_id: Option<String>,
    /// Buyer redirect after payment
    pub response_url: String,
    /// Buyer redirect after cancellation
    pub cancellation_url: String,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl PayPhoneConfig {
    /// Per-call timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Admin authorization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Hosted auth endpoint resolving bearer tokens (`GET {url}/user`)
    pub auth_url: Option<String>,
    /// API key sent alongside the bearer token
    pub api_key: Option<String>,
    /// Static `token → admin id` pairs for development
    pub admin_tokens: HashMap<String, Uuid>,
    /// Auth call timeout in seconds
    pub timeout_secs: u64,
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage API base URL; unset disables signed URLs
    pub base_url: Option<String>,
    /// Service key for signing
    pub api_key: Option<String>,
    /// Bucket holding transfer proofs
    pub bucket: String,
    /// Signed URL lifetime in seconds
    pub signed_url_ttl: u64,
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook receiving order confirmations; unset logs instead
    pub webhook_url: Option<String>,
    /// Webhook timeout in seconds
    pub timeout_secs: u64,
}

/// Reservation rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// How long reserved tickets are held, in minutes
    pub ttl_minutes: i64,
    /// Upper bound of tickets in one order
    pub max_tickets_per_order: u32,
    /// Upper bound of rows in admin listings
    pub list_limit: u32,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let store = vars.parsed("STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = vars.text("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let payphone_enabled = vars.parsed("PAYPHONE_ENABLED", true)?;
        let payphone_token = vars.text("PAYPHONE_TOKEN");
        if payphone_enabled && payphone_token.is_none() {
            return Err(ConfigError::Missing("PAYPHONE_TOKEN"));
        }

        let auth_url = vars.text("AUTH_URL");
        let admin_tokens = parse_admin_tokens(vars.text("ADMIN_TOKENS").as_deref())?;
        if auth_url.is_none() && admin_tokens.is_empty() {
            return Err(ConfigError::Missing("AUTH_URL"));
        }

        let public_url = vars.or("PUBLIC_URL", "http://localhost:3000");

        Ok(Self {
            server: ServerConfig {
                host: vars.or("HOST", "0.0.0.0"),
                port: vars.parsed("PORT", 8080)?,
                log_level: vars.or("RUST_LOG", "info,raffle=debug,sqlx=warn"),
                metrics_host: vars.or("METRICS_HOST", "0.0.0.0"),
                metrics_port: vars.parsed("METRICS_PORT", 9090)?,
                shutdown_timeout: vars.parsed("SHUTDOWN_TIMEOUT", 30)?,
                cors_origins: vars
                    .text("CORS_ORIGINS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_default(),
            },
            store,
            postgres: PostgresConfig {
                url: database_url.unwrap_or_default(),
                max_connections: vars.parsed("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: vars.parsed("DATABASE_MIN_CONNECTIONS", 2)?,
                connect_timeout: vars.parsed("DATABASE_CONNECT_TIMEOUT", 30)?,
                run_migrations: vars.parsed("DATABASE_RUN_MIGRATIONS", true)?,
            },
            payphone: PayPhoneConfig {
                enabled: payphone_enabled,
                base_url: vars.or("PAYPHONE_BASE_URL", "https://pay.payphonetodoapp.com"),
                token: payphone_token.unwrap_or_default(),
                store_id: vars.text("PAYPHONE_STORE_ID"),
                response_url: vars
                    .text("PAYPHONE_RESPONSE_URL")
                    .unwrap_or_else(|| format!("{public_url}/pago/confirmacion")),
                cancellation_url: vars
                    .text("PAYPHONE_CANCELLATION_URL")
                    .unwrap_or_else(|| format!("{public_url}/pago/cancelado")),
                timeout_secs: vars.parsed("PAYPHONE_TIMEOUT", 30)?,
            },
            auth: AuthConfig {
                auth_url,
                api_key: vars.text("AUTH_API_KEY"),
                admin_tokens,
                timeout_secs: vars.parsed("AUTH_TIMEOUT", 10)?,
            },
            storage: StorageConfig {
                base_url: vars.text("STORAGE_URL"),
                api_key: vars.text("STORAGE_API_KEY"),
                bucket: vars.or("STORAGE_BUCKET", "transfer-proofs"),
                signed_url_ttl: vars.parsed("STORAGE_SIGNED_URL_TTL", 600)?,
            },
            notifications: NotificationConfig {
                webhook_url: vars.text("NOTIFY_WEBHOOK_URL"),
                timeout_secs: vars.parsed("NOTIFY_TIMEOUT", 10)?,
            },
            reservations: ReservationConfig {
                ttl_minutes: vars.parsed("RESERVATION_TTL_MINUTES", 30)?,
                max_tickets_per_order: vars.parsed("MAX_TICKETS_PER_ORDER", 100)?,
                list_limit: vars.parsed("ADMIN_LIST_LIMIT", 200)?,
            },
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.text(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.text(key) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
            None => Ok(default),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `token:uuid,token:uuid`.
fn parse_admin_tokens(raw: Option<&str>) -> Result<HashMap<String, Uuid>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(HashMap::new());
    };

    split_list(raw)
        .into_iter()
        .map(|pair| {
            let invalid = || ConfigError::Invalid {
                key: "ADMIN_TOKENS",
                value: pair.clone(),
            };
            let (token, id) = pair.split_once(':').ok_or_else(invalid)?;
            let id = Uuid::parse_str(id.trim()).map_err(|_| invalid())?;
            Ok((token.trim().to_string(), id))
        })
        .collect()
}
