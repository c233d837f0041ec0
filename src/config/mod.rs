//! Configuration management for `workitems`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`WI_*`)
//! 3. Project config (.workitems/config.yaml)
//! 4. User config (~/.config/workitems/config.yaml)
//! 5. Defaults

use crate::access::GuestVisibility;
use crate::error::{IssueError, Result, ResultExt};
use crate::query::{DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE};
use crate::service::ServiceSettings;
use crate::storage::SqliteStorage;
use crate::util::time::UserTimezone;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Name of the workspace directory.
pub const WORKSPACE_DIR: &str = ".workitems";
/// Database filename inside the workspace directory.
pub const DEFAULT_DB_FILENAME: &str = "items.db";
/// Busy timeout used when none is configured.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Keys understood by [`settings_from_layer`] and friends.
pub const KNOWN_KEYS: &[&str] = &[
    "db",
    "actor",
    "project",
    "timezone",
    "page-size",
    "max-page-size",
    "sync-page-size",
    "lock-timeout",
    "guest-visibility",
];

/// Find the workspace directory by walking up from `start` (or the CWD).
///
/// `WI_DIR` short-circuits the search when it names a directory.
///
/// # Errors
///
/// Returns `NotInitialized` if no workspace is found, or an I/O error if
/// the CWD cannot be read.
pub fn discover_workspace_dir(start: Option<&Path>) -> Result<PathBuf> {
    if let Ok(value) = env::var("WI_DIR") {
        if !value.trim().is_empty() {
            let path = PathBuf::from(value);
            if path.is_dir() {
                return Ok(path);
            }
        }
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(WORKSPACE_DIR);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !current.pop() {
            break;
        }
    }

    Err(IssueError::NotInitialized)
}

/// Open the store named by `layer`, or the workspace default.
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn open_storage(workspace: &Path, layer: &ConfigLayer) -> Result<(SqliteStorage, PathBuf)> {
    let db_path = db_path_from_layer(workspace, layer);
    let lock_timeout = lock_timeout_from_layer(layer)?;
    debug!(path = %db_path.display(), lock_timeout, "Opening store");
    let storage = SqliteStorage::open_with_timeout(&db_path, Some(lock_timeout))?;
    Ok((storage, db_path))
}

/// One source of configuration values, keyed by normalized name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Merge multiple layers in precedence order (lowest to highest).
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(layer_from_yaml_value(&value))
    }

    /// Build a layer from `WI_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut layer = Self::default();
        for (key, value) in vars {
            if key == "WI_DIR" {
                continue;
            }
            if let Some(stripped) = key.strip_prefix("WI_") {
                layer.insert(stripped, value);
            }
        }
        layer
    }

    /// Set `key` (normalized) to `value`.
    pub fn insert(&mut self, key: &str, value: String) {
        self.values.insert(normalize_key(key), value);
    }

    /// The value of `key`, if set and not blank.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&normalize_key(key))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Write this layer as a flat YAML mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_yaml(&self, path: &Path) -> Result<()> {
        let sorted: std::collections::BTreeMap<&String, &String> = self.values.iter().collect();
        let contents = serde_yaml::to_string(&sorted)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

/// CLI overrides for config loading (optional).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db: Option<PathBuf>,
    pub actor: Option<String>,
    pub project: Option<String>,
    pub timezone: Option<String>,
    pub lock_timeout: Option<u64>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();

        if let Some(path) = &self.db {
            layer.insert("db", path.to_string_lossy().to_string());
        }
        if let Some(actor) = &self.actor {
            layer.insert("actor", actor.clone());
        }
        if let Some(project) = &self.project {
            layer.insert("project", project.clone());
        }
        if let Some(timezone) = &self.timezone {
            layer.insert("timezone", timezone.clone());
        }
        if let Some(lock_timeout) = self.lock_timeout {
            layer.insert("lock-timeout", lock_timeout.to_string());
        }

        layer
    }
}

/// Load project config (.workitems/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(workspace: &Path) -> Result<ConfigLayer> {
    ConfigLayer::from_yaml(&workspace.join("config.yaml"))
}

/// Load user config (~/.config/workitems/config.yaml).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    let Ok(home) = env::var("HOME") else {
        return Ok(ConfigLayer::default());
    };
    let path = Path::new(&home)
        .join(".config")
        .join("workitems")
        .join("config.yaml");
    ConfigLayer::from_yaml(&path)
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    layer.insert("timezone", "UTC".to_string());
    layer.insert("page-size", DEFAULT_PAGE_SIZE.to_string());
    layer.insert("max-page-size", DEFAULT_MAX_PAGE_SIZE.to_string());
    layer.insert("sync-page-size", DEFAULT_PAGE_SIZE.to_string());
    layer.insert("lock-timeout", DEFAULT_LOCK_TIMEOUT_MS.to_string());
    layer
}

/// Load configuration with the full precedence order.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_config(workspace: &Path, cli: &CliOverrides) -> Result<ConfigLayer> {
    Ok(ConfigLayer::merge_layers(&[
        default_config_layer(),
        load_user_config()?,
        load_project_config(workspace)?,
        ConfigLayer::from_env(),
        cli.as_layer(),
    ]))
}

/// Service tunables from a merged layer.
///
/// # Errors
///
/// Returns `Config` for a non-numeric or zero page size, or an unknown
/// guest visibility policy.
pub fn settings_from_layer(layer: &ConfigLayer) -> Result<ServiceSettings> {
    let page_size = parse_positive(layer, "page-size")?.unwrap_or(DEFAULT_PAGE_SIZE);
    let max_page_size = parse_positive(layer, "max-page-size")?.unwrap_or(DEFAULT_MAX_PAGE_SIZE);
    let sync_page_size = parse_positive(layer, "sync-page-size")?.unwrap_or(page_size);
    let timezone = layer
        .get("timezone")
        .map_or(UserTimezone::Utc, UserTimezone::parse);
    let guest_visibility = match layer.get("guest-visibility") {
        None | Some("own") => GuestVisibility::OwnIssuesOnly,
        Some("all") => GuestVisibility::All,
        Some(other) => {
            return Err(IssueError::Config(format!(
                "guest-visibility must be 'own' or 'all', got '{other}'"
            )));
        }
    };
    Ok(ServiceSettings {
        timezone,
        page_size: page_size.min(max_page_size),
        max_page_size,
        sync_page_size: sync_page_size.min(max_page_size),
        guest_visibility,
    })
}

/// The acting user.
///
/// # Errors
///
/// Returns `Config` when no actor is configured or it is not a UUID.
pub fn actor_from_layer(layer: &ConfigLayer) -> Result<Uuid> {
    let raw = layer.get("actor").ok_or_else(|| {
        IssueError::Config("no actor configured; pass --actor or set WI_ACTOR".to_string())
    })?;
    Uuid::parse_str(raw)
        .map_err(|_| IssueError::Config(format!("actor must be a UUID, got '{raw}'")))
}

/// The project key (id or identifier).
///
/// # Errors
///
/// Returns `Config` when no project is configured.
pub fn project_from_layer(layer: &ConfigLayer) -> Result<&str> {
    layer.get("project").ok_or_else(|| {
        IssueError::Config("no project configured; pass --project or set WI_PROJECT".to_string())
    })
}

/// Database path: the `db` key, or the workspace default.
#[must_use]
pub fn db_path_from_layer(workspace: &Path, layer: &ConfigLayer) -> PathBuf {
    layer
        .get("db")
        .map_or_else(|| workspace.join(DEFAULT_DB_FILENAME), PathBuf::from)
}

/// Busy timeout in milliseconds.
///
/// # Errors
///
/// Returns `Config` for a non-numeric value.
pub fn lock_timeout_from_layer(layer: &ConfigLayer) -> Result<u64> {
    layer.get("lock-timeout").map_or(Ok(DEFAULT_LOCK_TIMEOUT_MS), |raw| {
        raw.parse::<u64>()
            .map_err(|_| IssueError::Config(format!("lock-timeout must be a number, got '{raw}'")))
    })
}

fn parse_positive(layer: &ConfigLayer, key: &str) -> Result<Option<usize>> {
    let Some(raw) = layer.get(key) else {
        return Ok(None);
    };
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(IssueError::Config(format!(
            "{key} must be a positive number, got '{raw}'"
        ))),
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

fn layer_from_yaml_value(value: &serde_yaml::Value) -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    let mut flat = HashMap::new();
    flatten_yaml(value, "", &mut flat);

    for (key, value) in flat {
        layer.insert(&key, value);
    }

    layer
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}
