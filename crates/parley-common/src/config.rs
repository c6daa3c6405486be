//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults.
//!
//! Unlike a global `OnceLock`, the loaded config is returned to the caller and
//! threaded through server state, so tests can build their own instances.

use serde::Deserialize;

/// Load configuration from the environment.
///
/// Should be called once at application startup.
pub fn load() -> Result<AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 7000)?
        .set_default("server.dev_mode", 0)?
        .set_default("database.max_connections", 20)?
        .set_default("database.min_connections", 5)?
        .set_default("auth.login_token_ttl_secs", 604_800)? // 1 week
        .set_default("auth.socket_token_ttl_secs", 3_600)? // 1 hour
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (PARLEY_SERVER__HOST, PARLEY_DATABASE__URL, etc.)
        .add_source(
            config::Environment::with_prefix("PARLEY")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    cfg.try_deserialize()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Dev-mode level. Anything above 0 relaxes the WebSocket origin check
    /// to allow `http://localhost*` and `http://192.168.*` origins.
    pub dev_mode: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret (HS256) — should be 256+ bits of entropy
    pub jwt_secret: String,
    /// Lifetime of a login token in seconds
    pub login_token_ttl_secs: u64,
    /// Lifetime of a websocket-scoped token handed out for the `?jwt=` query form
    pub socket_token_ttl_secs: u64,
}
