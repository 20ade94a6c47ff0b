// coordkernel-config/src/config.rs
// ============================================================================
// Module: Coordination Kernel Configuration
// Description: Configuration loading and validation for the coordination kernel.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: coordkernel-core, coordkernel-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed: an empty or absent file is
//! not an error (every section has defaults), but a malformed or
//! out-of-range one is. Security posture: config inputs are untrusted, the
//! same as any other externally supplied file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use coordkernel_core::SessionIdMode;
use coordkernel_store_sqlite::SqliteStoreConfig;
use coordkernel_store_sqlite::SqliteStoreMode;
use coordkernel_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "coordkernel.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "COORDKERNEL_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum tracked rate-limit bucket entries before the background sweep runs.
pub(crate) const MAX_RATE_LIMIT_ENTRIES: usize = 65_536;
/// Minimum accepted control-loop interval, in seconds.
pub(crate) const MIN_CONTROL_LOOP_INTERVAL_SECS: u64 = 5;
/// Maximum batch size any control loop may process per run (store batch-commit ceiling).
pub(crate) const MAX_CONTROL_LOOP_BATCH_SIZE: u32 = 500;

// ============================================================================
// SECTION: Top-Level Configuration
// ============================================================================

/// Coordination kernel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordkernelConfig {
    /// Transport and front-door configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Per-key and per-IP rate-limiter tiers.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Dispatcher webhook configuration.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Pulse session-id enforcement.
    #[serde(default)]
    pub session: SessionConfig,
    /// Background control-loop cadences and batch sizes.
    #[serde(default)]
    pub control_loops: ControlLoopConfig,
    /// Document store configuration.
    #[serde(default = "default_store_config")]
    pub store: SqliteStoreConfig,
}

impl CoordkernelConfig {
    /// Loads configuration from disk using the default resolution rules: an
    /// explicit `path`, then `COORDKERNEL_CONFIG`, then `./coordkernel.toml`.
    /// A missing file at the default location is not an error; every field
    /// has a default.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the resolved path is unsafe, the file
    /// exceeds the size limit, is not valid UTF-8/TOML, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        if path.is_none() && env::var(CONFIG_ENV_VAR).is_err() && !resolved.exists() {
            let config = Self::default();
            return Ok(config);
        }
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_err| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.rate_limits.validate()?;
        self.dispatcher.validate()?;
        self.control_loops.validate()?;
        Ok(())
    }
}

impl Default for CoordkernelConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limits: RateLimitConfig::default(),
            dispatcher: DispatcherConfig::default(),
            session: SessionConfig::default(),
            control_loops: ControlLoopConfig::default(),
            store: default_store_config(),
        }
    }
}

/// The teacher's `SqliteStoreConfig` has no `Default` impl (it always names
/// a concrete path); this supplies the coordination kernel's own default.
fn default_store_config() -> SqliteStoreConfig {
    SqliteStoreConfig {
        path: PathBuf::from("coordkernel.sqlite3"),
        busy_timeout_ms: 5_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Normal,
    }
}

// ============================================================================
// SECTION: Server Configuration
// ============================================================================

/// Front-door transport configuration: bind address, the internal scheduler
/// secret that authenticates control-loop invocations, and the optional
/// DNS-rebinding `Host` allow-list.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the MCP/REST transport binds to (e.g. `127.0.0.1:8443`).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted request body size, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Bearer secret the external scheduler presents to invoke control loops.
    /// Read from the environment rather than the file by convention; a file
    /// value is accepted too so tests can set it without touching the process.
    #[serde(default)]
    pub internal_scheduler_secret: Option<String>,
    /// When non-empty, the `Host` header of every MCP request must match one
    /// of these values or the request is rejected (DNS-rebinding defense).
    #[serde(default)]
    pub dns_rebind_allowlist: Vec<String>,
    /// Idle timeout applied to MCP sessions, in seconds (spec: 60 minutes).
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            internal_scheduler_secret: None,
            dns_rebind_allowlist: Vec::new(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Validates the server section.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be greater than zero".to_string()));
        }
        let addr: SocketAddr =
            self.bind.parse().map_err(|_err| ConfigError::Invalid("invalid bind address".to_string()))?;
        let _ = addr;
        if self.session_idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session_idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        for host in &self.dns_rebind_allowlist {
            if host.trim().is_empty() {
                return Err(ConfigError::Invalid("dns_rebind_allowlist entries must be non-empty".to_string()));
            }
        }
        Ok(())
    }
}

const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_bind() -> String {
    "127.0.0.1:8443".to_string()
}

const fn default_session_idle_timeout_secs() -> u64 {
    60 * 60
}

// ============================================================================
// SECTION: Rate Limiter Configuration
// ============================================================================

/// One tier's sliding-window limits.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitTier {
    /// Requests per minute allowed for read-class tools.
    pub read_rpm: u32,
    /// Requests per minute allowed for write-class tools.
    pub write_rpm: u32,
    /// Burst allowance on top of the steady-state rate.
    pub burst: u32,
}

/// Per-key tiers plus the shared pre-auth per-IP window.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Free-tier limits.
    #[serde(default = "RateLimitTier::free_default")]
    pub free: RateLimitTier,
    /// Pro-tier limits.
    #[serde(default = "RateLimitTier::pro_default")]
    pub pro: RateLimitTier,
    /// Internal-tier limits (control loops, first-party tooling).
    #[serde(default = "RateLimitTier::internal_default")]
    pub internal: RateLimitTier,
    /// Requests per minute allowed per source IP before authentication succeeds.
    #[serde(default = "default_per_ip_rpm")]
    pub per_ip_rpm: u32,
    /// Idle in-memory bucket entries are evicted once the tracked count
    /// exceeds this; the sweep itself runs on a fixed interval, not on this count.
    #[serde(default = "default_rate_limit_max_entries")]
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            free: RateLimitTier::free_default(),
            pro: RateLimitTier::pro_default(),
            internal: RateLimitTier::internal_default(),
            per_ip_rpm: default_per_ip_rpm(),
            max_entries: default_rate_limit_max_entries(),
        }
    }
}

impl RateLimitTier {
    const fn free_default() -> Self {
        Self {
            read_rpm: 60,
            write_rpm: 60,
            burst: 10,
        }
    }

    const fn pro_default() -> Self {
        Self {
            read_rpm: 300,
            write_rpm: 300,
            burst: 30,
        }
    }

    const fn internal_default() -> Self {
        Self {
            read_rpm: 600,
            write_rpm: 600,
            burst: 50,
        }
    }

    fn validate(&self, tier_name: &str) -> Result<(), ConfigError> {
        if self.read_rpm == 0 || self.write_rpm == 0 {
            return Err(ConfigError::Invalid(format!("{tier_name} rpm must be greater than zero")));
        }
        Ok(())
    }
}

fn default_per_ip_rpm() -> u32 {
    60
}

const fn default_rate_limit_max_entries() -> usize {
    4_096
}

impl RateLimitConfig {
    /// Validates every tier and the shared per-IP/max-entries settings.
    fn validate(&self) -> Result<(), ConfigError> {
        self.free.validate("free")?;
        self.pro.validate("pro")?;
        self.internal.validate("internal")?;
        if self.per_ip_rpm == 0 {
            return Err(ConfigError::Invalid("per_ip_rpm must be greater than zero".to_string()));
        }
        if self.max_entries == 0 || self.max_entries > MAX_RATE_LIMIT_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "max_entries must be between 1 and {MAX_RATE_LIMIT_ENTRIES}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Dispatcher Configuration
// ============================================================================

/// Dispatcher webhook target. Both fields are usually supplied via
/// `DISPATCHER_WEBHOOK_URL`/`DISPATCHER_WEBHOOK_SECRET` rather than the file;
/// [`DispatcherConfig::resolve`] layers the file value under the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatcherConfig {
    /// Dispatcher webhook URL. `None` disables the webhook entirely.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Shared HMAC secret used to sign webhook bodies.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl DispatcherConfig {
    /// Validates the dispatcher section: a URL requires a secret and vice versa.
    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.webhook_url, &self.webhook_secret) {
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::Invalid(
                "dispatcher.webhook_url and dispatcher.webhook_secret must be set together".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Resolves the effective webhook URL and secret, preferring
    /// `DISPATCHER_WEBHOOK_URL`/`DISPATCHER_WEBHOOK_SECRET` over the file.
    #[must_use]
    pub fn resolve(&self) -> Option<(String, String)> {
        let url = env::var("DISPATCHER_WEBHOOK_URL").ok().or_else(|| self.webhook_url.clone())?;
        let secret = env::var("DISPATCHER_WEBHOOK_SECRET").ok().or_else(|| self.webhook_secret.clone())?;
        Some((url, secret))
    }
}

// ============================================================================
// SECTION: Session Configuration
// ============================================================================

/// Pulse session-id enforcement configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SessionConfig {
    /// Enforcement mode applied to newly created session ids.
    #[serde(default = "default_session_id_mode")]
    pub id_mode: SessionIdMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id_mode: default_session_id_mode(),
        }
    }
}

const fn default_session_id_mode() -> SessionIdMode {
    SessionIdMode::Lenient
}

// ============================================================================
// SECTION: Control Loop Configuration
// ============================================================================

/// Interval and batch-size settings for one background control loop.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ControlLoopConfig {
    /// Wake-daemon interval, in seconds (spec default: 60).
    #[serde(default = "default_wake_daemon_interval")]
    pub wake_daemon_interval_secs: u64,
    /// Orphan-revival interval, in seconds (spec default: 300).
    #[serde(default = "default_orphan_revival_interval")]
    pub orphan_revival_interval_secs: u64,
    /// Dream-timeout-enforcement interval, in seconds (spec default: 300).
    #[serde(default = "default_dream_timeout_interval")]
    pub dream_timeout_interval_secs: u64,
    /// Relay-expiry interval, in seconds (spec default: 900).
    #[serde(default = "default_relay_expiry_interval")]
    pub relay_expiry_interval_secs: u64,
    /// Dead-letter-processing interval, in seconds (spec default: 900).
    #[serde(default = "default_dead_letter_interval")]
    pub dead_letter_interval_secs: u64,
    /// Stale-session-detector interval, in seconds (spec default: 300).
    #[serde(default = "default_stale_session_interval")]
    pub stale_session_interval_secs: u64,
    /// Sync-queue-processor interval, in seconds (spec default: 900).
    #[serde(default = "default_sync_queue_interval")]
    pub sync_queue_interval_secs: u64,
    /// Maximum documents a single control-loop run processes.
    #[serde(default = "default_control_loop_batch_size")]
    pub batch_size: u32,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            wake_daemon_interval_secs: default_wake_daemon_interval(),
            orphan_revival_interval_secs: default_orphan_revival_interval(),
            dream_timeout_interval_secs: default_dream_timeout_interval(),
            relay_expiry_interval_secs: default_relay_expiry_interval(),
            dead_letter_interval_secs: default_dead_letter_interval(),
            stale_session_interval_secs: default_stale_session_interval(),
            sync_queue_interval_secs: default_sync_queue_interval(),
            batch_size: default_control_loop_batch_size(),
        }
    }
}

impl ControlLoopConfig {
    /// Validates every interval and the batch size.
    fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("wake_daemon_interval_secs", self.wake_daemon_interval_secs),
            ("orphan_revival_interval_secs", self.orphan_revival_interval_secs),
            ("dream_timeout_interval_secs", self.dream_timeout_interval_secs),
            ("relay_expiry_interval_secs", self.relay_expiry_interval_secs),
            ("dead_letter_interval_secs", self.dead_letter_interval_secs),
            ("stale_session_interval_secs", self.stale_session_interval_secs),
            ("sync_queue_interval_secs", self.sync_queue_interval_secs),
        ];
        for (name, value) in intervals {
            if value < MIN_CONTROL_LOOP_INTERVAL_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at least {MIN_CONTROL_LOOP_INTERVAL_SECS} seconds"
                )));
            }
        }
        if self.batch_size == 0 || self.batch_size > MAX_CONTROL_LOOP_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be between 1 and {MAX_CONTROL_LOOP_BATCH_SIZE}"
            )));
        }
        Ok(())
    }
}

const fn default_wake_daemon_interval() -> u64 {
    60
}
const fn default_orphan_revival_interval() -> u64 {
    300
}
const fn default_dream_timeout_interval() -> u64 {
    300
}
const fn default_relay_expiry_interval() -> u64 {
    900
}
const fn default_dead_letter_interval() -> u64 {
    900
}
const fn default_stale_session_interval() -> u64 {
    300
}
const fn default_sync_queue_interval() -> u64 {
    900
}
const fn default_control_loop_batch_size() -> u32 {
    400
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Path Resolution
// ============================================================================

/// Resolves the configuration path: explicit argument, then the environment
/// variable, then the default filename in the working directory.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use tempfile::NamedTempFile;

    use super::CoordkernelConfig;
    use super::RateLimitTier;

    #[test]
    fn default_config_validates() {
        CoordkernelConfig::default().validate().expect("default config is valid");
    }

    #[test]
    fn loading_a_missing_default_path_falls_back_to_defaults() {
        let config = CoordkernelConfig::load(Some(Path::new("/nonexistent/coordkernel.toml")));
        assert!(config.is_err(), "an explicitly named missing file is still an io error");
    }

    #[test]
    fn empty_file_loads_to_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let loaded = CoordkernelConfig::load(Some(file.path())).expect("load");
        assert_eq!(loaded.server.bind, "127.0.0.1:8443");
    }

    #[test]
    fn oversized_file_is_rejected() {
        let mut file = NamedTempFile::new().expect("tempfile");
        let oversized = "# ".to_string() + &"x".repeat(super::MAX_CONFIG_FILE_SIZE + 1);
        file.write_all(oversized.as_bytes()).expect("write");
        let result = CoordkernelConfig::load(Some(file.path()));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_bind_address_fails_validation() {
        let mut config = CoordkernelConfig::default();
        config.server.bind = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rpm_tier_fails_validation() {
        let mut config = CoordkernelConfig::default();
        config.rate_limits.free = RateLimitTier {
            read_rpm: 0,
            write_rpm: 10,
            burst: 1,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn webhook_url_without_secret_fails_validation() {
        let mut config = CoordkernelConfig::default();
        config.dispatcher.webhook_url = Some("https://dispatch.example.com".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn control_loop_interval_below_minimum_fails_validation() {
        let mut config = CoordkernelConfig::default();
        config.control_loops.wake_daemon_interval_secs = 1;
        assert!(config.validate().is_err());
    }
}
