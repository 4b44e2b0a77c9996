//! Test plan for the `roomcast-config` crate.
//!
//! These tests exercise the configuration loader across default handling,
//! file discovery, environment overrides, and validation behaviour.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;

use roomcast_config::{load, AppConfig, AuthConfig, HttpConfig, RealtimeConfig};

const ENV_VARS_TO_RESET: &[&str] = &[
    "ROOMCAST_CONFIG",
    "ROOMCAST__AUTH__JWT_SECRET",
    "ROOMCAST__AUTH__TOKEN_TTL_SECONDS",
    "ROOMCAST__DATABASE__MAX_CONNECTIONS",
    "ROOMCAST__DATABASE__URL",
    "ROOMCAST__HTTP__ADDRESS",
    "ROOMCAST__HTTP__PORT",
    "ROOMCAST__REALTIME__TYPING_TTL_MS",
    "ROOMCAST__REALTIME__OUTBOUND_BUFFER",
    "ROOMCAST__REALTIME__MAX_MESSAGE_LENGTH",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            vars: Vec::new(),
            original_dir: None,
        }
    }

    fn reset_environment(&mut self) {
        for key in ENV_VARS_TO_RESET {
            self.remove_var(key);
        }
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(path, contents).expect("failed to write config file");
}

fn isolated() -> (TempDir, TestContext) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());
    (temp_dir, ctx)
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let (_temp_dir, _ctx) = isolated();

    let config = load().expect("configuration load should succeed without files");
    let defaults = AppConfig::default();

    assert_eq!(config.http.address, defaults.http.address);
    assert_eq!(config.http.port, defaults.http.port);
    assert_eq!(config.database.url, defaults.database.url);
    assert_eq!(
        config.database.max_connections,
        defaults.database.max_connections
    );
    assert_eq!(config.auth.token_ttl_seconds, defaults.auth.token_ttl_seconds);
    assert!(config.auth.uses_development_secret());
    assert_eq!(config.realtime.typing_ttl_ms, defaults.realtime.typing_ttl_ms);
    assert_eq!(
        config.realtime.membership_cache_ttl_seconds,
        defaults.realtime.membership_cache_ttl_seconds
    );
}

#[test]
#[serial]
fn load_picks_first_available_file_in_search_order() {
    let (temp_dir, _ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "roomcast.toml",
        r#"
        [http]
        port = 4242
        "#,
    );
    write_config_file(
        temp_dir.path(),
        "config/roomcast.toml",
        r#"
        [http]
        port = 5151
        "#,
    );

    let config = load().expect("configuration load should pick the first file");
    assert_eq!(config.http.port, 4242);
}

#[test]
#[serial]
fn load_merges_partial_file_with_defaults() {
    let (temp_dir, _ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "roomcast.toml",
        r#"
        [database]
        max_connections = 50

        [realtime]
        typing_ttl_ms = 2500
        "#,
    );

    let config = load().expect("configuration load should succeed");
    let defaults = AppConfig::default();

    assert_eq!(config.database.max_connections, 50);
    assert_eq!(config.database.url, defaults.database.url);
    assert_eq!(config.realtime.typing_ttl_ms, 2_500);
    assert_eq!(
        config.realtime.outbound_buffer,
        defaults.realtime.outbound_buffer
    );
}

#[test]
#[serial]
fn load_applies_environment_overrides() {
    let (temp_dir, mut ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "roomcast.toml",
        r#"
        [http]
        port = 3030
        "#,
    );

    ctx.set_var("ROOMCAST__HTTP__PORT", "8080");
    ctx.set_var("ROOMCAST__AUTH__JWT_SECRET", "production-secret");

    let config = load().expect("configuration load should honour env overrides");
    assert_eq!(config.http.port, 8080);
    assert_eq!(config.auth.jwt_secret, "production-secret");
    assert!(!config.auth.uses_development_secret());
}

#[test]
#[serial]
fn load_reads_explicit_config_path() {
    let (temp_dir, mut ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "elsewhere/custom.toml",
        r#"
        [database]
        url = "sqlite://custom.db"
        "#,
    );
    let path = temp_dir.path().join("elsewhere/custom.toml");
    ctx.set_var("ROOMCAST_CONFIG", path.display().to_string());

    let config = load().expect("configuration load should use ROOMCAST_CONFIG");
    assert_eq!(config.database.url, "sqlite://custom.db");
}

#[test]
#[serial]
fn load_rejects_zero_outbound_buffer() {
    let (_temp_dir, mut ctx) = isolated();

    ctx.set_var("ROOMCAST__REALTIME__OUTBOUND_BUFFER", "0");

    let error = load().expect_err("zero buffer must be rejected");
    assert!(
        error.to_string().contains("invalid realtime configuration"),
        "unexpected error message: {error}"
    );
}

#[test]
#[serial]
fn load_errors_on_invalid_toml_contents() {
    let (temp_dir, _ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "roomcast.toml",
        r#"
        [http]
        port = "not-a-number
        "#,
    );

    let error = load().expect_err("invalid TOML should cause load to fail");
    let message = error.to_string();
    assert!(
        message.contains("invalid configuration") || message.contains("unable to build configuration"),
        "unexpected error message: {message}"
    );
}

#[test]
fn auth_config_defaults_to_week_long_tokens() {
    let defaults = AuthConfig::default();
    assert_eq!(defaults.token_ttl_seconds, 604_800);
    assert_eq!(defaults.leeway_seconds, 0);
}

#[test]
fn realtime_config_validation_rejects_zero_typing_ttl() {
    let config = RealtimeConfig {
        typing_ttl_ms: 0,
        ..RealtimeConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn http_config_defaults_match_expected_host_and_port() {
    let defaults = HttpConfig::default();
    assert_eq!(defaults.address, "127.0.0.1");
    assert_eq!(defaults.port, 7070);
}
