//! Per-driver configuration parsing (component F/G support).
//!
//! Configuration arrives as a string-keyed map — the shape a `toml` file or
//! a `serde_json::Value` object naturally deserializes into — and is
//! normalized into a dialect-tagged [`ConnectionConfig`]. Unknown
//! driver-specific keys are ignored; known keys are the only interface, per
//! the teacher's own preference for an explicit, checked surface over a
//! passthrough bag of options.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{OrmError, OrmResult};
use crate::ident::Dialect;

/// One configuration value. Most keys are plain strings; a few (`search_path`,
/// `dont_drop`) accept either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    String(String),
    List(Vec<String>),
    Bool(bool),
    Int(i64),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Normalizes a string-or-list value into a `Vec<String>`.
    pub fn as_string_list(&self) -> OrmResult<Vec<String>> {
        match self {
            ConfigValue::String(s) => Ok(vec![s.clone()]),
            ConfigValue::List(items) => Ok(items.clone()),
            _ => Err(OrmError::Config(
                "expected a string or a list of strings".into(),
            )),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

/// Raw configuration as read from a file or environment: a flat string-keyed
/// map handed to a driver-specific parser.
pub type RawConfig = HashMap<String, ConfigValue>;

#[derive(Debug, Clone, Default)]
pub struct CommonConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub prefix: String,
    pub prefix_indexes: bool,
    pub timezone: Option<String>,
    pub qt_timezone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MySqlOptions {
    pub strict: bool,
    pub isolation_level: Option<String>,
    pub engine: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PgsqlOptions {
    pub application_name: Option<String>,
    pub search_path: Vec<String>,
    pub synchronous_commit: Option<String>,
    pub dont_drop: Vec<String>,
    pub sslmode: Option<String>,
    pub sslcert: Option<String>,
    pub sslkey: Option<String>,
    pub sslrootcert: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SqliteOptions {
    pub foreign_key_constraints: bool,
    pub check_database_exists: bool,
    pub return_qdatetime: bool,
}

/// A fully parsed, driver-specific configuration. `Connection` is generic
/// over [`crate::connection::DbClient`], not over this enum; this is only
/// what the factory that builds a concrete `DbClient` consumes.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    MySql(CommonConfig, MySqlOptions),
    Pgsql(CommonConfig, PgsqlOptions),
    Sqlite(CommonConfig, SqliteOptions),
}

impl ConnectionConfig {
    pub fn dialect(&self) -> Dialect {
        match self {
            ConnectionConfig::MySql(..) => Dialect::MySql,
            ConnectionConfig::Pgsql(..) => Dialect::Pgsql,
            ConnectionConfig::Sqlite(..) => Dialect::Sqlite,
        }
    }

    pub fn common(&self) -> &CommonConfig {
        match self {
            ConnectionConfig::MySql(c, _) => c,
            ConnectionConfig::Pgsql(c, _) => c,
            ConnectionConfig::Sqlite(c, _) => c,
        }
    }

    /// Parses a raw, string-keyed map into a dialect-tagged config. The
    /// `driver` key selects the parser; everything else is validated
    /// per-driver.
    pub fn parse(raw: &RawConfig) -> OrmResult<Self> {
        let driver = raw
            .get("driver")
            .and_then(ConfigValue::as_str)
            .ok_or_else(|| OrmError::Config("missing required key `driver`".into()))?;
        match driver {
            "mysql" => parse_mysql(raw),
            "pgsql" | "postgres" | "postgresql" => parse_pgsql(raw),
            "sqlite" => parse_sqlite(raw),
            other => Err(OrmError::Config(format!("unknown driver `{other}`"))),
        }
    }
}

fn common(raw: &RawConfig) -> OrmResult<CommonConfig> {
    let database = raw
        .get("database")
        .and_then(ConfigValue::as_str)
        .ok_or_else(|| OrmError::Config("missing required key `database`".into()))?
        .to_string();
    Ok(CommonConfig {
        host: raw.get("host").and_then(ConfigValue::as_str).map(str::to_string),
        port: raw
            .get("port")
            .and_then(ConfigValue::as_int)
            .map(|p| p as u16),
        database,
        username: raw.get("username").and_then(ConfigValue::as_str).map(str::to_string),
        password: raw.get("password").and_then(ConfigValue::as_str).map(str::to_string),
        charset: raw.get("charset").and_then(ConfigValue::as_str).map(str::to_string),
        collation: raw.get("collation").and_then(ConfigValue::as_str).map(str::to_string),
        prefix: raw
            .get("prefix")
            .and_then(ConfigValue::as_str)
            .unwrap_or("")
            .to_string(),
        prefix_indexes: raw
            .get("prefix_indexes")
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false),
        timezone: raw.get("timezone").and_then(ConfigValue::as_str).map(str::to_string),
        qt_timezone: raw.get("qt_timezone").and_then(ConfigValue::as_str).map(str::to_string),
    })
}

fn parse_mysql(raw: &RawConfig) -> OrmResult<ConnectionConfig> {
    let c = common(raw)?;
    let opts = MySqlOptions {
        strict: raw.get("strict").and_then(ConfigValue::as_bool).unwrap_or(true),
        isolation_level: raw
            .get("isolation_level")
            .and_then(ConfigValue::as_str)
            .map(str::to_string),
        engine: raw.get("engine").and_then(ConfigValue::as_str).map(str::to_string),
    };
    Ok(ConnectionConfig::MySql(c, opts))
}

fn parse_pgsql(raw: &RawConfig) -> OrmResult<ConnectionConfig> {
    if raw.contains_key("schema") {
        return Err(OrmError::Config(
            "key `schema` is not supported; use `search_path` instead".into(),
        ));
    }
    let c = common(raw)?;
    let search_path = match raw.get("search_path") {
        Some(v) => v.as_string_list()?,
        None => Vec::new(),
    };
    let dont_drop = match raw.get("dont_drop") {
        Some(v) => v.as_string_list()?,
        None => vec!["spatial_ref_sys".to_string()],
    };
    let opts = PgsqlOptions {
        application_name: raw
            .get("application_name")
            .and_then(ConfigValue::as_str)
            .map(str::to_string),
        search_path,
        synchronous_commit: raw
            .get("synchronous_commit")
            .and_then(ConfigValue::as_str)
            .map(str::to_string),
        dont_drop,
        sslmode: raw.get("sslmode").and_then(ConfigValue::as_str).map(str::to_string),
        sslcert: raw.get("sslcert").and_then(ConfigValue::as_str).map(str::to_string),
        sslkey: raw.get("sslkey").and_then(ConfigValue::as_str).map(str::to_string),
        sslrootcert: raw
            .get("sslrootcert")
            .and_then(ConfigValue::as_str)
            .map(str::to_string),
    };
    Ok(ConnectionConfig::Pgsql(c, opts))
}

/// The `[connections.*]` shape a multi-connection TOML config file takes,
/// e.g. `[connections.default]` / `[connections.replica]` each holding the
/// same keys [`ConnectionConfig::parse`] expects.
#[derive(Debug, serde::Deserialize)]
struct ConfigFile {
    connections: HashMap<String, HashMap<String, toml::Value>>,
}

/// Reads a TOML config file and returns one [`RawConfig`] per
/// `[connections.<name>]` table, ready for [`ConnectionConfig::parse`].
pub fn load_toml_connections(path: &Path) -> OrmResult<HashMap<String, RawConfig>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| OrmError::Config(format!("reading `{}`: {e}", path.display())))?;
    parse_toml_connections(&text)
}

fn parse_toml_connections(text: &str) -> OrmResult<HashMap<String, RawConfig>> {
    let file: ConfigFile =
        toml::from_str(text).map_err(|e| OrmError::Config(format!("invalid connections config: {e}")))?;
    file.connections
        .into_iter()
        .map(|(name, raw)| {
            let converted: RawConfig =
                raw.into_iter().map(|(k, v)| Ok((k, toml_to_config_value(v)?))).collect::<OrmResult<_>>()?;
            Ok((name, converted))
        })
        .collect()
}

fn toml_to_config_value(v: toml::Value) -> OrmResult<ConfigValue> {
    match v {
        toml::Value::String(s) => Ok(ConfigValue::String(s)),
        toml::Value::Boolean(b) => Ok(ConfigValue::Bool(b)),
        toml::Value::Integer(i) => Ok(ConfigValue::Int(i)),
        toml::Value::Array(items) => {
            let strings = items
                .into_iter()
                .map(|item| match item {
                    toml::Value::String(s) => Ok(s),
                    other => Err(OrmError::Config(format!("expected a string in a list, found {other:?}"))),
                })
                .collect::<OrmResult<Vec<_>>>()?;
            Ok(ConfigValue::List(strings))
        }
        other => Err(OrmError::Config(format!("unsupported config value: {other:?}"))),
    }
}

fn parse_sqlite(raw: &RawConfig) -> OrmResult<ConnectionConfig> {
    let c = common(raw)?;
    let opts = SqliteOptions {
        foreign_key_constraints: raw
            .get("foreign_key_constraints")
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false),
        check_database_exists: raw
            .get("check_database_exists")
            .and_then(ConfigValue::as_bool)
            .unwrap_or(true),
        return_qdatetime: raw
            .get("return_qdatetime")
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false),
    };
    Ok(ConnectionConfig::Sqlite(c, opts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, ConfigValue)]) -> RawConfig {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn pgsql_rejects_legacy_schema_key() {
        let raw = map(&[
            ("driver", "pgsql".into()),
            ("database", "app".into()),
            ("schema", "public".into()),
        ]);
        let err = ConnectionConfig::parse(&raw).unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }

    #[test]
    fn pgsql_search_path_accepts_string_or_list() {
        let raw = map(&[
            ("driver", "pgsql".into()),
            ("database", "app".into()),
            ("search_path", ConfigValue::List(vec!["a".into(), "b".into()])),
        ]);
        let cfg = ConnectionConfig::parse(&raw).unwrap();
        match cfg {
            ConnectionConfig::Pgsql(_, opts) => assert_eq!(opts.search_path, vec!["a", "b"]),
            _ => panic!("expected pgsql"),
        }
    }

    #[test]
    fn pgsql_dont_drop_defaults_to_spatial_ref_sys() {
        let raw = map(&[("driver", "pgsql".into()), ("database", "app".into())]);
        let cfg = ConnectionConfig::parse(&raw).unwrap();
        match cfg {
            ConnectionConfig::Pgsql(_, opts) => assert_eq!(opts.dont_drop, vec!["spatial_ref_sys"]),
            _ => panic!("expected pgsql"),
        }
    }

    #[test]
    fn missing_database_is_a_config_error() {
        let raw = map(&[("driver", "sqlite".into())]);
        let err = ConnectionConfig::parse(&raw).unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let raw = map(&[("driver", "oracle".into()), ("database", "app".into())]);
        let err = ConnectionConfig::parse(&raw).unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }

    #[test]
    fn toml_connections_parse_into_named_raw_configs() {
        let text = r#"
            [connections.default]
            driver = "pgsql"
            database = "app"
            search_path = ["a", "b"]

            [connections.replica]
            driver = "sqlite"
            database = "app_replica.db"
        "#;
        let mut connections = parse_toml_connections(text).unwrap();
        let default_cfg = ConnectionConfig::parse(&connections.remove("default").unwrap()).unwrap();
        match default_cfg {
            ConnectionConfig::Pgsql(c, opts) => {
                assert_eq!(c.database, "app");
                assert_eq!(opts.search_path, vec!["a", "b"]);
            }
            _ => panic!("expected pgsql"),
        }
        let replica_cfg = ConnectionConfig::parse(&connections.remove("replica").unwrap()).unwrap();
        assert_eq!(replica_cfg.dialect(), Dialect::Sqlite);
    }

    #[test]
    fn toml_connections_rejects_malformed_document() {
        let err = parse_toml_connections("not valid toml [[[").unwrap_err();
        assert!(matches!(err, OrmError::Config(_)));
    }
}
