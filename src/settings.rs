//! Settings for the bootstrap binary and for applications that want their
//! collections declared in a file rather than in code.
//!
//! Values come from an optional TOML file layered under environment
//! variables prefixed with `UBOSTORE`, using `__` to descend into sections,
//! e.g. `UBOSTORE__DATABASE__PATH=/var/lib/app.db`.

// config lets you read a separate config file
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::Result;
use crate::persist::{ColumnMapping, SharedConnection, SqlDao};
use crate::schema::{ColumnDef, Flavor};

pub const DEFAULT_SETTINGS_FILE: &str = "ubostore";
pub const ENV_PREFIX: &str = "UBOSTORE";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub collections: Vec<CollectionSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file; in-memory when absent
    pub path: Option<String>,
    #[serde(default)]
    pub flavor: Flavor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { filter: default_filter() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSettings {
    pub table: String,
    #[serde(default)]
    pub extra_columns: Vec<ExtraColumnSettings>,
    #[serde(default)]
    pub indexes: Vec<IndexSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtraColumnSettings {
    pub column: String,
    pub field: String,
    #[serde(default = "default_sql_type")]
    pub sql_type: String,
}

fn default_sql_type() -> String {
    "VARCHAR(255)".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexSettings {
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl Settings {
    /// Reads `file` (default `ubostore.toml`, optional) and then the environment.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let source = match file {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(source)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    pub fn collection(&self, table: &str) -> Option<&CollectionSettings> {
        self.collections.iter().find(|c| c.table.eq_ignore_ascii_case(table))
    }
}

impl CollectionSettings {
    pub fn mapping(&self) -> Result<ColumnMapping> {
        ColumnMapping::from_pairs(
            self.extra_columns
                .iter()
                .map(|c| (c.column.clone(), c.field.clone())),
        )
    }
    pub fn column_defs(&self) -> Vec<ColumnDef> {
        self.extra_columns
            .iter()
            .map(|c| ColumnDef::new(&c.column, &c.sql_type))
            .collect()
    }
    pub fn open_dao(&self, conn: SharedConnection, flavor: Flavor) -> Result<SqlDao> {
        SqlDao::new(conn, flavor, &self.table, self.mapping()?)
    }
}
