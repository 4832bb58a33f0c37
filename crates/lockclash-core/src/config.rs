//! Configuration for a harness run.
//!
//! Configuration is loaded once at startup and passed down explicitly.
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. Global config: `~/.config/lockclash/config.toml`
//! 3. Project config: `./lockclash.toml`, or the file named by
//!    `LOCKCLASH_CONFIG` / `--config`
//! 4. Environment variables: `LOCKCLASH_*`
//! 5. Command-line flags (applied by the binary)
//!
//! # Example
//!
//! ```toml
//! engine = "mysql"
//! table = "producto"
//! id_a = 1
//! id_b = 2
//! hold_ms = 4000
//! await_secs = 60
//!
//! [database]
//! url = "mysql://localhost:3306/producto_barras"
//! user = "root"
//! password = ""
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    types::{IsolationLevel, TableName, TargetId},
    Error, Result,
};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "LOCKCLASH_CONFIG";

/// Project config file looked up in the current directory.
pub const PROJECT_CONFIG_FILE: &str = "lockclash.toml";

const DEFAULT_URL: &str = "mysql://localhost:3306/producto_barras";
const DEFAULT_USER: &str = "root";
const DEFAULT_TABLE: &str = "producto";
const DEFAULT_ID_A: i64 = 1;
const DEFAULT_ID_B: i64 = 2;
const DEFAULT_HOLD_MS: u64 = 4000;
const DEFAULT_AWAIT_SECS: u64 = 60;
const DEFAULT_SESSIONS: usize = 2;
const DEFAULT_CANCEL_GRACE_MS: u64 = 2000;

/// One day.
pub const MAX_AWAIT_SECS: u64 = 86_400;
/// One hour.
pub const MAX_HOLD_MS: u64 = 3_600_000;
/// InnoDB's own ceiling for `innodb_lock_wait_timeout`.
pub const MAX_LOCK_WAIT_TIMEOUT_SECS: u64 = 1_073_741_824;
/// Ten minutes.
pub const MAX_CANCEL_GRACE_MS: u64 = 600_000;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

/// Which storage engine backs the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Mysql,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Row ids that exist. Defaults to `id_a` and `id_b`.
    pub rows: Option<Vec<i64>>,
    pub deadlock_detection: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    pub engine: EngineKind,
    pub database: DatabaseConfig,
    pub table: String,
    pub id_a: i64,
    pub id_b: i64,
    pub hold_ms: u64,
    pub await_secs: u64,
    pub sessions: usize,
    pub isolation: IsolationLevel,
    /// Per-session bound on a single lock wait, applied to the engine.
    pub lock_wait_timeout_secs: Option<u64>,
    /// How long cancelled sessions get to record an outcome before being
    /// abandoned.
    pub cancel_grace_ms: u64,
    pub memory: MemoryConfig,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            user: DEFAULT_USER.to_string(),
            password: String::new(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            rows: None,
            deadlock_detection: true,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            database: DatabaseConfig::default(),
            table: DEFAULT_TABLE.to_string(),
            id_a: DEFAULT_ID_A,
            id_b: DEFAULT_ID_B,
            hold_ms: DEFAULT_HOLD_MS,
            await_secs: DEFAULT_AWAIT_SECS,
            sessions: DEFAULT_SESSIONS,
            isolation: IsolationLevel::default(),
            lock_wait_timeout_secs: None,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            memory: MemoryConfig::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ACCESSORS
// ═══════════════════════════════════════════════════════════════════════════

impl HarnessConfig {
    pub const fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub const fn await_bound(&self) -> Duration {
        Duration::from_secs(self.await_secs)
    }

    pub const fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn table_name(&self) -> Result<TableName> {
        TableName::parse(&self.table)
    }

    pub const fn targets(&self) -> (TargetId, TargetId) {
        (TargetId::new(self.id_a), TargetId::new(self.id_b))
    }

    /// Rows the memory engine should consider present.
    pub fn memory_rows(&self) -> Vec<i64> {
        self.memory
            .rows
            .clone()
            .unwrap_or_else(|| vec![self.id_a, self.id_b])
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for any value that would make the run
    /// meaningless or unsafe.
    pub fn validate(&self) -> Result<()> {
        self.table_name()?;

        if self.sessions == 0 {
            return Err(Error::InvalidConfig("sessions must be at least 1".into()));
        }
        if self.await_secs == 0 {
            return Err(Error::InvalidConfig("await_secs must be positive".into()));
        }
        check_at_most("await_secs", self.await_secs, MAX_AWAIT_SECS)?;
        check_at_most("hold_ms", self.hold_ms, MAX_HOLD_MS)?;
        check_at_most("cancel_grace_ms", self.cancel_grace_ms, MAX_CANCEL_GRACE_MS)?;
        if let Some(secs) = self.lock_wait_timeout_secs {
            if secs == 0 {
                return Err(Error::InvalidConfig(
                    "lock_wait_timeout_secs must be positive".into(),
                ));
            }
            check_at_most("lock_wait_timeout_secs", secs, MAX_LOCK_WAIT_TIMEOUT_SECS)?;
        }
        if self.engine == EngineKind::Mysql {
            if self.database.url.trim().is_empty() {
                return Err(Error::InvalidConfig("database.url is required".into()));
            }
            if self.database.user.trim().is_empty() {
                return Err(Error::InvalidConfig("database.user is required".into()));
            }
        }
        Ok(())
    }

    /// Merge a file layer. Only keys the file actually set replace ours, so
    /// a higher layer can restore a default over a lower one.
    pub fn merge_partial(&mut self, partial: PartialConfig) {
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
        if let Some(database) = partial.database {
            self.database.merge_partial(database);
        }
        if let Some(table) = partial.table {
            self.table = table;
        }
        if let Some(id_a) = partial.id_a {
            self.id_a = id_a;
        }
        if let Some(id_b) = partial.id_b {
            self.id_b = id_b;
        }
        if let Some(hold_ms) = partial.hold_ms {
            self.hold_ms = hold_ms;
        }
        if let Some(await_secs) = partial.await_secs {
            self.await_secs = await_secs;
        }
        if let Some(sessions) = partial.sessions {
            self.sessions = sessions;
        }
        if let Some(isolation) = partial.isolation {
            self.isolation = isolation;
        }
        if partial.lock_wait_timeout_secs.is_some() {
            self.lock_wait_timeout_secs = partial.lock_wait_timeout_secs;
        }
        if let Some(cancel_grace_ms) = partial.cancel_grace_ms {
            self.cancel_grace_ms = cancel_grace_ms;
        }
        if let Some(memory) = partial.memory {
            self.memory.merge_partial(memory);
        }
    }

    /// Apply `LOCKCLASH_*` environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns error if an environment variable holds an unparsable value
    pub fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("LOCKCLASH_ENGINE") {
            self.engine = parse_env("LOCKCLASH_ENGINE", &value)?;
        }
        if let Some(value) = get("LOCKCLASH_DB_URL") {
            self.database.url = value;
        }
        if let Some(value) = get("LOCKCLASH_DB_USER") {
            self.database.user = value;
        }
        if let Some(value) = get("LOCKCLASH_DB_PASSWORD") {
            self.database.password = value;
        }
        if let Some(value) = get("LOCKCLASH_TABLE") {
            self.table = value;
        }
        if let Some(value) = get("LOCKCLASH_ID_A") {
            self.id_a = parse_env("LOCKCLASH_ID_A", &value)?;
        }
        if let Some(value) = get("LOCKCLASH_ID_B") {
            self.id_b = parse_env("LOCKCLASH_ID_B", &value)?;
        }
        if let Some(value) = get("LOCKCLASH_HOLD_MS") {
            self.hold_ms = parse_env("LOCKCLASH_HOLD_MS", &value)?;
        }
        if let Some(value) = get("LOCKCLASH_AWAIT_SECS") {
            self.await_secs = parse_env("LOCKCLASH_AWAIT_SECS", &value)?;
        }
        if let Some(value) = get("LOCKCLASH_SESSIONS") {
            self.sessions = parse_env("LOCKCLASH_SESSIONS", &value)?;
        }
        if let Some(value) = get("LOCKCLASH_ISOLATION") {
            self.isolation = parse_env("LOCKCLASH_ISOLATION", &value)?;
        }
        if let Some(value) = get("LOCKCLASH_LOCK_WAIT_TIMEOUT_SECS") {
            self.lock_wait_timeout_secs =
                Some(parse_env("LOCKCLASH_LOCK_WAIT_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("LOCKCLASH_CANCEL_GRACE_MS") {
            self.cancel_grace_ms = parse_env("LOCKCLASH_CANCEL_GRACE_MS", &value)?;
        }
        if let Some(value) = get("LOCKCLASH_DEADLOCK_DETECTION") {
            self.memory.deadlock_detection = parse_env("LOCKCLASH_DEADLOCK_DETECTION", &value)?;
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARTIAL CONFIG STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

/// One config file as written. Keys missing from the TOML stay `None` and
/// leave lower layers alone.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PartialConfig {
    #[serde(default)]
    pub engine: Option<EngineKind>,
    #[serde(default)]
    pub database: Option<PartialDatabaseConfig>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub id_a: Option<i64>,
    #[serde(default)]
    pub id_b: Option<i64>,
    #[serde(default)]
    pub hold_ms: Option<u64>,
    #[serde(default)]
    pub await_secs: Option<u64>,
    #[serde(default)]
    pub sessions: Option<usize>,
    #[serde(default)]
    pub isolation: Option<IsolationLevel>,
    #[serde(default)]
    pub lock_wait_timeout_secs: Option<u64>,
    #[serde(default)]
    pub cancel_grace_ms: Option<u64>,
    #[serde(default)]
    pub memory: Option<PartialMemoryConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PartialDatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PartialMemoryConfig {
    #[serde(default)]
    pub rows: Option<Vec<i64>>,
    #[serde(default)]
    pub deadlock_detection: Option<bool>,
}

impl DatabaseConfig {
    fn merge_partial(&mut self, partial: PartialDatabaseConfig) {
        if let Some(url) = partial.url {
            self.url = url;
        }
        if let Some(user) = partial.user {
            self.user = user;
        }
        if let Some(password) = partial.password {
            self.password = password;
        }
    }
}

impl MemoryConfig {
    fn merge_partial(&mut self, partial: PartialMemoryConfig) {
        if partial.rows.is_some() {
            self.rows = partial.rows;
        }
        if let Some(detection) = partial.deadlock_detection {
            self.deadlock_detection = detection;
        }
    }
}

fn check_at_most(key: &str, value: u64, max: u64) -> Result<()> {
    if value > max {
        return Err(Error::InvalidConfig(format!(
            "{key} must be at most {max} (got {value})"
        )));
    }
    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("Invalid {key} value '{value}': {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy.
///
/// `explicit` (from `--config`) wins over `LOCKCLASH_CONFIG`, which wins
/// over `./lockclash.toml`. A file named explicitly must exist.
///
/// # Errors
///
/// Returns error if:
/// - An explicitly named config file is missing
/// - Config file is malformed TOML
/// - An environment override cannot be parsed
/// - Config values fail validation
pub async fn load_config(explicit: Option<&Path>) -> Result<HarnessConfig> {
    // 1. Start with built-in defaults
    let mut config = HarnessConfig::default();

    // 2. Load global config if exists
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_partial_toml_file(&global_path).await?;
            config.merge_partial(global);
        }
    }

    // 3. Load project config: explicit path must exist, default may not
    let env_path = std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);
    match explicit.map(Path::to_path_buf).or(env_path) {
        Some(path) => {
            if !path.exists() {
                return Err(Error::InvalidConfig(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            config.merge_partial(load_partial_toml_file(&path).await?);
        }
        None => {
            let project_path = PathBuf::from(PROJECT_CONFIG_FILE);
            if project_path.exists() {
                config.merge_partial(load_partial_toml_file(&project_path).await?);
            }
        }
    }

    // 4. Apply environment variable overrides
    config.apply_env_vars()?;

    // 5. Validate
    config.validate()?;

    Ok(config)
}

/// Get path to global config file
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "lockclash")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

/// Load a TOML file into a `PartialConfig`
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read
/// - TOML is malformed
async fn load_partial_toml_file(path: &Path) -> Result<PartialConfig> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::IoError(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::ParseError(format!("Failed to parse config: {}: {e}", path.display())))
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
