use std::net::SocketAddr;

use rolesync_core::sync::{
    RoleBindings, RowProjection, DEFAULT_FLAGS_FIELD, DEFAULT_IDENTITY_FIELD, REFRESH_INTERVAL_SECS,
};

const DEFAULT_TABLE_API_URL: &str = "https://api.baserow.io";
const DEFAULT_GUILD_API_URL: &str = "https://discord.com/api/v10";
const DEFAULT_WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_TABLE_PAGE_SIZE: u32 = 200;

/// Configuration for the role sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    pub table_api_url: String,
    pub table_api_token: String,
    pub table_id: u64,
    pub table_page_size: u32,
    /// Which columns hold the identity and the flags.
    pub projection: RowProjection,

    pub guild_api_url: String,
    pub guild_bot_token: String,
    pub bindings: RoleBindings,

    /// Shared secret expected on push notifications and manual triggers.
    pub webhook_secret: String,
    pub webhook_secret_header: String,

    pub refresh_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            reader(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ConfigError::MissingVar(key.into()))
        };
        let optional = |key: &str, default: &str| -> String {
            reader(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let listen_addr = optional("LISTEN_ADDR", DEFAULT_LISTEN_ADDR)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("LISTEN_ADDR".into(), e.to_string()))?;

        let table_id = required("TABLE_ID")?
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue("TABLE_ID".into(), e.to_string()))?;

        let table_page_size = optional("TABLE_PAGE_SIZE", &DEFAULT_TABLE_PAGE_SIZE.to_string())
            .parse::<u32>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "TABLE_PAGE_SIZE".into(),
                    "expected a positive integer".into(),
                )
            })?;

        let refresh_interval_secs =
            optional("REFRESH_INTERVAL_SECS", &REFRESH_INTERVAL_SECS.to_string())
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "REFRESH_INTERVAL_SECS".into(),
                        "expected a positive number of seconds".into(),
                    )
                })?;

        let webhook_secret_header =
            optional("WEBHOOK_SECRET_HEADER", DEFAULT_WEBHOOK_SECRET_HEADER).to_ascii_lowercase();
        axum::http::HeaderName::from_bytes(webhook_secret_header.as_bytes()).map_err(|e| {
            ConfigError::InvalidValue("WEBHOOK_SECRET_HEADER".into(), e.to_string())
        })?;

        Ok(Self {
            listen_addr,
            table_api_url: optional("TABLE_API_URL", DEFAULT_TABLE_API_URL),
            table_api_token: required("TABLE_API_TOKEN")?,
            table_id,
            table_page_size,
            projection: RowProjection::new(
                optional("TABLE_IDENTITY_FIELD", DEFAULT_IDENTITY_FIELD),
                optional("TABLE_FLAGS_FIELD", DEFAULT_FLAGS_FIELD),
            ),
            guild_api_url: optional("GUILD_API_URL", DEFAULT_GUILD_API_URL),
            guild_bot_token: required("GUILD_BOT_TOKEN")?,
            bindings: RoleBindings {
                guild_id: required("GUILD_ID")?,
                member_role_id: required("MEMBER_ROLE_ID")?,
                life_member_role_id: required("LIFE_MEMBER_ROLE_ID")?,
            },
            webhook_secret: required("WEBHOOK_SECRET")?,
            webhook_secret_header,
            refresh_interval_secs,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
