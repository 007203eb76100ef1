//! Configuration loading.
//!
//! Applications load [`Settings`] from `config/config.toml` or environment
//! variables using `Settings::load()`. Environment variables use the
//! `RELQUERY` prefix and `__` as the section separator, e.g.
//! `RELQUERY__DATABASE__PATH=app.db` or `RELQUERY__QUERY__SLOW_QUERY_MS=250`.
//!
//! ```toml
//! [database]
//! path = "shop.db"
//! busy_timeout_ms = 5000
//!
//! [query]
//! key_by_id = true
//! slow_query_ms = 500
//!
//! [[entities]]
//! name = "order"
//! fields = ["id", { name = "customer_id", kind = "integer" }, { name = "total", kind = "real" }]
//! ```

use crate::schema::{Entity, Schema};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
const ENV_PREFIX: &str = "RELQUERY";

/// The `database` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String {
    ":memory:".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// The `query` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuerySettings {
    /// Default keying for `fetch_all_default`
    #[serde(default = "default_key_by_id")]
    pub key_by_id: bool,
    /// Statements slower than this are logged at warn level
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,
    /// Deadline applied to every fetch when set
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,
}

fn default_key_by_id() -> bool {
    true
}

fn default_slow_query_ms() -> u64 {
    500
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            key_by_id: default_key_by_id(),
            slow_query_ms: default_slow_query_ms(),
            fetch_timeout_ms: None,
        }
    }
}

/// Complete crate configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub query: QuerySettings,
    /// Entity descriptors making up the schema
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Settings {
    /// Load the configuration from `config/config.toml`, falling back to env vars.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if neither source yields a valid configuration.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load the configuration from the given file (optional) and env vars.
    ///
    /// When the file exists but cannot be read or parsed, a warning is logged
    /// and the environment alone is used.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if neither source yields a valid configuration.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if path.exists() {
                    log::warn!(
                        "relquery: failed to load config file {}, falling back to env: {}",
                        path.display(),
                        err
                    );
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        settings.try_deserialize::<Settings>().map_err(|e| {
            ConfigError::Message(format!(
                "Configuration could not be loaded from file or environment: {e}"
            ))
        })
    }

    /// Parse a TOML document, e.g. one embedded with `include_str!`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the document is not valid TOML or does not
    /// match the expected sections.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Build the schema registry from the configured entities
    pub fn schema(&self) -> Schema {
        self.entities.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.database.path, ":memory:");
        assert!(settings.query.key_by_id);
        assert_eq!(settings.query.slow_query_ms, 500);
        assert_eq!(settings.query.fetch_timeout_ms, None);
        assert!(settings.schema().is_empty());
    }

    #[test]
    fn test_from_toml_str() {
        let settings = Settings::from_toml_str(
            r#"
            [database]
            path = "shop.db"

            [query]
            key_by_id = false
            fetch_timeout_ms = 250

            [[entities]]
            name = "customer"
            fields = ["id", "name"]

            [[entities]]
            name = "order"
            fields = [{ name = "id", kind = "integer" }, { name = "customer_id", kind = "integer" }, "total"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.database.path, "shop.db");
        assert_eq!(settings.database.busy_timeout_ms, 5_000);
        assert!(!settings.query.key_by_id);
        assert_eq!(settings.query.slow_query_ms, 500);
        assert_eq!(settings.query.fetch_timeout_ms, Some(250));

        let schema = settings.schema();
        let order = schema.entity("order").unwrap();
        assert_eq!(order.field_kind("customer_id"), Some(FieldKind::Integer));
        assert_eq!(order.field_kind("total"), Some(FieldKind::Any));
        assert_eq!(order.primary_key(), "id");

        let customer = schema.entity("customer").unwrap();
        assert_eq!(
            schema.relation(order, customer),
            crate::schema::RelationType::HasOne
        );
    }

    #[test]
    fn test_from_toml_str_rejects_bad_types() {
        let err = Settings::from_toml_str("[query]\nslow_query_ms = \"soon\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert!(settings.query.key_by_id);
    }
}
