use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "roomcast.toml",
    "config/roomcast.toml",
    "crates/config/roomcast.toml",
    "../roomcast.toml",
    "../config/roomcast.toml",
];

/// Secret used when no `auth.jwt_secret` is configured. Only suitable for local development.
pub const DEVELOPMENT_JWT_SECRET: &str = "roomcast-development-secret-change-me";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://roomcast.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_secret")]
    pub jwt_secret: String,
    #[serde(default = "AuthConfig::default_token_ttl")]
    pub token_ttl_seconds: u64,
    #[serde(default)]
    pub leeway_seconds: u64,
}

impl AuthConfig {
    fn default_secret() -> String {
        DEVELOPMENT_JWT_SECRET.to_string()
    }

    const fn default_token_ttl() -> u64 {
        7 * 24 * 60 * 60
    }

    pub fn uses_development_secret(&self) -> bool {
        self.jwt_secret == DEVELOPMENT_JWT_SECRET
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: Self::default_secret(),
            token_ttl_seconds: Self::default_token_ttl(),
            leeway_seconds: 0,
        }
    }
}

/// Tuning knobs for the connection coordinator.
///
/// ```
/// use roomcast_config::RealtimeConfig;
///
/// let realtime = RealtimeConfig::default();
/// assert_eq!(realtime.typing_ttl_ms, 5_000);
/// assert_eq!(realtime.max_message_length, 1_000);
/// assert!(realtime.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "RealtimeConfig::default_typing_ttl")]
    pub typing_ttl_ms: u64,
    #[serde(default = "RealtimeConfig::default_sweep_interval")]
    pub typing_sweep_interval_ms: u64,
    #[serde(default = "RealtimeConfig::default_cache_ttl")]
    pub membership_cache_ttl_seconds: u64,
    #[serde(default = "RealtimeConfig::default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "RealtimeConfig::default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "RealtimeConfig::default_max_attachments")]
    pub max_attachments: usize,
}

impl RealtimeConfig {
    const fn default_typing_ttl() -> u64 {
        5_000
    }

    const fn default_sweep_interval() -> u64 {
        1_000
    }

    const fn default_cache_ttl() -> u64 {
        30
    }

    const fn default_outbound_buffer() -> usize {
        256
    }

    const fn default_max_message_length() -> usize {
        1_000
    }

    const fn default_max_attachments() -> usize {
        10
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.typing_ttl_ms == 0 {
            bail!("realtime.typing_ttl_ms must be greater than zero");
        }
        if self.typing_sweep_interval_ms == 0 {
            bail!("realtime.typing_sweep_interval_ms must be greater than zero");
        }
        if self.membership_cache_ttl_seconds == 0 {
            bail!("realtime.membership_cache_ttl_seconds must be greater than zero");
        }
        if self.outbound_buffer == 0 {
            bail!("realtime.outbound_buffer must be greater than zero");
        }
        if self.max_message_length == 0 {
            bail!("realtime.max_message_length must be greater than zero");
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            typing_ttl_ms: Self::default_typing_ttl(),
            typing_sweep_interval_ms: Self::default_sweep_interval(),
            membership_cache_ttl_seconds: Self::default_cache_ttl(),
            outbound_buffer: Self::default_outbound_buffer(),
            max_message_length: Self::default_max_message_length(),
            max_attachments: Self::default_max_attachments(),
        }
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use roomcast_config::load;
///
/// std::env::remove_var("ROOMCAST_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();
    let realtime = &defaults.realtime;

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.jwt_secret", defaults.auth.jwt_secret.clone())?
        .set_default(
            "auth.token_ttl_seconds",
            clamp_i64(defaults.auth.token_ttl_seconds),
        )?
        .set_default("auth.leeway_seconds", clamp_i64(defaults.auth.leeway_seconds))?
        .set_default("realtime.typing_ttl_ms", clamp_i64(realtime.typing_ttl_ms))?
        .set_default(
            "realtime.typing_sweep_interval_ms",
            clamp_i64(realtime.typing_sweep_interval_ms),
        )?
        .set_default(
            "realtime.membership_cache_ttl_seconds",
            clamp_i64(realtime.membership_cache_ttl_seconds),
        )?
        .set_default(
            "realtime.outbound_buffer",
            clamp_i64(realtime.outbound_buffer as u64),
        )?
        .set_default(
            "realtime.max_message_length",
            clamp_i64(realtime.max_message_length as u64),
        )?
        .set_default(
            "realtime.max_attachments",
            clamp_i64(realtime.max_attachments as u64),
        )?;

    let environment_overrides = config::Environment::with_prefix("ROOMCAST").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("ROOMCAST_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via ROOMCAST_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    config
        .realtime
        .validate()
        .context("invalid realtime configuration")?;

    if config.auth.uses_development_secret() {
        warn!("auth.jwt_secret is not configured, using the development secret");
    }

    debug!(
        http.address = %config.http.address,
        http.port = config.http.port,
        database.url = %config.database.url,
        "loaded backend configuration"
    );
    Ok(config)
}
