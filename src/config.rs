//! Engine configuration.
//!
//! Loaded from a JSON file, from the environment, or both:
//!
//! - `GRAPH_USERNAME`: account handle
//! - `GRAPH_SLEEP_MS`: pause between remote calls (default: 0)
//! - `GRAPH_DEBUG`: dry-run mutations (default: false)
//! - `GRAPH_INCOGNITO`: never write snapshots (default: false)
//! - `GRAPH_LIMIT_FOLLOW` / `GRAPH_LIMIT_UNFOLLOW`: per-invocation caps (default: 0)
//! - `GRAPH_USELESS_THRESHOLD`: classifier followings threshold (default: 500)
//! - `DATABASE_URL`, `GRAPH_DATABASE`, `GRAPH_COLLECTION`: document store

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::budget::Limits;
use crate::types::{is_valid_username, normalize_username, DEFAULT_USELESS_THRESHOLD};

/// Default document-store collection.
pub const DEFAULT_COLLECTION: &str = "users_batches";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading config {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON for [`EngineConfig`].
    #[error("parsing config {path}: {source}")]
    Parse {
        /// Path that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// A value is out of range or malformed.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which snapshot backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Process-scoped, last batch per type only.
    #[default]
    #[serde(rename = "local")]
    Local,
    /// PostgreSQL document store with full history.
    #[serde(rename = "document-store")]
    DocumentStore,
}

/// Document-store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentStoreSettings {
    /// Connection URL.
    pub url: String,
    /// Database name; empty keeps the one in the URL.
    pub database: String,
    /// Collection (table) name.
    pub collection: String,
}

impl Default for DocumentStoreSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            database: String::new(),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

/// Storage section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind.
    pub kind: StorageKind,
    /// Settings used when `kind` is `document-store`.
    pub document_store: DocumentStoreSettings,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Account handle.
    pub username: String,
    /// Handles that are never mutated.
    pub whitelist: Vec<String>,
    /// Per-invocation action caps.
    pub limits: Limits,
    /// Pause between remote calls, in milliseconds.
    pub sleep_ms: u64,
    /// Log intended mutations without performing them.
    pub debug: bool,
    /// Never write snapshots.
    pub incognito: bool,
    /// Followings count at or above which an account is considered useless.
    pub useless_threshold: u64,
    /// Snapshot storage.
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            whitelist: Vec::new(),
            limits: Limits::default(),
            sleep_ms: 0,
            debug: false,
            incognito: false,
            useless_threshold: DEFAULT_USELESS_THRESHOLD,
            storage: StorageConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl EngineConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay environment variables onto the current values. Unset or
    /// unparseable variables leave the field untouched.
    pub fn apply_env(&mut self) {
        if let Ok(username) = std::env::var("GRAPH_USERNAME") {
            self.username = username;
        }
        self.sleep_ms = env_or("GRAPH_SLEEP_MS", self.sleep_ms);
        self.debug = env_flag("GRAPH_DEBUG", self.debug);
        self.incognito = env_flag("GRAPH_INCOGNITO", self.incognito);
        self.limits.follow = env_or("GRAPH_LIMIT_FOLLOW", self.limits.follow);
        self.limits.unfollow = env_or("GRAPH_LIMIT_UNFOLLOW", self.limits.unfollow);
        self.useless_threshold = env_or("GRAPH_USELESS_THRESHOLD", self.useless_threshold);

        let store = &mut self.storage.document_store;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            store.url = url;
            self.storage.kind = StorageKind::DocumentStore;
        }
        if let Ok(database) = std::env::var("GRAPH_DATABASE") {
            store.database = database;
        }
        if let Ok(collection) = std::env::var("GRAPH_COLLECTION") {
            store.collection = collection;
        }
    }

    /// Check the values a run depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid("username is empty".to_string()));
        }
        if let Some(bad) = self.whitelist.iter().find(|name| !is_valid_username(name)) {
            return Err(ConfigError::Invalid(format!("whitelist entry {bad:?} is not a valid username")));
        }
        if self.storage.kind == StorageKind::DocumentStore {
            let store = &self.storage.document_store;
            if store.url.trim().is_empty() {
                return Err(ConfigError::Invalid("document store requires a url".to_string()));
            }
            if !is_valid_collection_name(&store.collection) {
                return Err(ConfigError::Invalid(format!(
                    "collection name {:?} is not a valid identifier",
                    store.collection
                )));
            }
        }
        Ok(())
    }

    /// Pause between remote calls.
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    /// Normalized whitelist.
    pub fn whitelist(&self) -> Whitelist {
        Whitelist::new(&self.whitelist)
    }

    /// Connection settings for the document store.
    #[cfg(feature = "postgres")]
    pub fn document_store_config(&self) -> crate::store::DocumentStoreConfig {
        let store = &self.storage.document_store;
        crate::store::DocumentStoreConfig::new(&store.url, &store.database, &store.collection)
    }
}

/// True if `name` can be used as a table name unquoted.
pub fn is_valid_collection_name(name: &str) -> bool {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Handles that must never be mutated, compared case-insensitively and
/// without a leading `@`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    names: HashSet<String>,
}

impl Whitelist {
    /// Build from raw handles.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            names: names
                .iter()
                .map(|n| normalize_username(n.as_ref()))
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Whether `username` is protected.
    pub fn contains(&self, username: &str) -> bool {
        self.names.contains(&normalize_username(username))
    }

    /// Number of protected handles.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if nothing is protected.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> EngineConfig {
        EngineConfig {
            username: "me".to_string(),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_parse_full_document() {
        let json = r#"{
            "username": "me",
            "whitelist": ["@Friend", "other.one"],
            "limits": {"follow": 10, "unfollow": 150},
            "sleep_ms": 250,
            "debug": true,
            "incognito": false,
            "storage": {
                "kind": "document-store",
                "document_store": {"url": "postgresql://db/graph", "database": "graph", "collection": "me_batches"}
            }
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.limits, Limits::new(10, 150));
        assert_eq!(config.storage.kind, StorageKind::DocumentStore);
        assert_eq!(config.storage.document_store.collection, "me_batches");
        assert_eq!(config.useless_threshold, DEFAULT_USELESS_THRESHOLD);
        assert_eq!(config.pacing(), Duration::from_millis(250));
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_document_takes_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.storage.kind, StorageKind::Local);
        assert_eq!(config.storage.document_store.collection, DEFAULT_COLLECTION);
    }

    #[test]
    fn test_validate_rejects_empty_username() {
        assert!(matches!(EngineConfig::default().validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_whitelist_entry() {
        let config = EngineConfig {
            whitelist: vec!["has space".to_string()],
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_document_store_requirements() {
        let mut config = valid();
        config.storage.kind = StorageKind::DocumentStore;
        assert!(config.validate().is_err());

        config.storage.document_store.url = "postgresql://db/graph".to_string();
        config.validate().unwrap();

        config.storage.document_store.collection = "drop table".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collection_names() {
        assert!(is_valid_collection_name("users_batches"));
        assert!(is_valid_collection_name("_x1"));
        assert!(!is_valid_collection_name("1abc"));
        assert!(!is_valid_collection_name(""));
        assert!(!is_valid_collection_name("a-b"));
        assert!(!is_valid_collection_name(&"a".repeat(64)));
    }

    #[test]
    fn test_whitelist_normalizes() {
        let whitelist = Whitelist::new(&["@Friend", " other.one ", ""]);
        assert_eq!(whitelist.len(), 2);
        assert!(whitelist.contains("friend"));
        assert!(whitelist.contains("@FRIEND"));
        assert!(whitelist.contains("Other.One"));
        assert!(!whitelist.contains("stranger"));
    }
}
