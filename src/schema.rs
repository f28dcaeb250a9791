// used for executing the generated statements
use rusqlite::Connection;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, UboError};

// ------------- Columns -------------
pub const COL_ID: &str = "zid";
pub const COL_DATA: &str = "zdata";
pub const COL_CHECKSUM: &str = "zchecksum";
pub const COL_TIME_CREATED: &str = "ztcreated";
pub const COL_TIME_UPDATED: &str = "ztupdated";
pub const COL_APP_VERSION: &str = "zaversion";

/// The fixed columns every universal table carries, in select order.
pub const FIXED_COLUMNS: [&str; 6] = [
    COL_ID,
    COL_DATA,
    COL_APP_VERSION,
    COL_CHECKSUM,
    COL_TIME_CREATED,
    COL_TIME_UPDATED,
];

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
}

/// Lower-cases a table or column name and checks that it is a plain identifier.
pub fn normalize_identifier(name: &str) -> Result<String> {
    let normalized = name.trim().to_lowercase();
    if IDENTIFIER.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(UboError::MappingInconsistency(format!(
            "'{name}' is not a valid table or column name"
        )))
    }
}

// ------------- Flavor -------------
/// SQL dialect; only affects quoting and default column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[default]
    Sqlite,
    PgSql,
    MySql,
}

impl Flavor {
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Flavor::MySql => format!("`{identifier}`"),
            Flavor::Sqlite | Flavor::PgSql => format!("\"{identifier}\""),
        }
    }
    fn supports_index_if_not_exists(&self) -> bool {
        !matches!(self, Flavor::MySql)
    }
    /// Column types of the fixed columns, in [`FIXED_COLUMNS`] order.
    pub fn fixed_column_types(&self) -> [&'static str; 6] {
        match self {
            Flavor::Sqlite => ["VARCHAR(64)", "TEXT", "BIGINT", "VARCHAR(64)", "TIMESTAMP", "TIMESTAMP"],
            Flavor::PgSql => [
                "VARCHAR(64)",
                "JSONB",
                "BIGINT",
                "VARCHAR(64)",
                "TIMESTAMP WITH TIME ZONE",
                "TIMESTAMP WITH TIME ZONE",
            ],
            Flavor::MySql => ["VARCHAR(64)", "JSON", "BIGINT UNSIGNED", "VARCHAR(64)", "DATETIME(6)", "DATETIME(6)"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
}

impl ColumnDef {
    pub fn new(name: &str, sql_type: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
        }
    }
}

// ------------- Statements -------------
pub fn create_table_sql(
    flavor: Flavor,
    table: &str,
    if_not_exists: bool,
    columns: &[ColumnDef],
    primary_key: &[&str],
) -> Result<String> {
    let table = normalize_identifier(table)?;
    let mut definitions = Vec::new();
    for column in columns {
        let name = normalize_identifier(&column.name)?;
        definitions.push(format!("{} {}", flavor.quote(&name), column.sql_type));
    }
    if !primary_key.is_empty() {
        let mut keys = Vec::new();
        for key in primary_key {
            keys.push(flavor.quote(&normalize_identifier(key)?));
        }
        definitions.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    Ok(format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        flavor.quote(&table),
        definitions.join(", ")
    ))
}

/// Index names follow `idx_<table>_<columns>`, or `udx_` for unique ones.
pub fn create_index_sql(
    flavor: Flavor,
    table: &str,
    unique: bool,
    if_not_exists: bool,
    columns: &[&str],
) -> Result<String> {
    if columns.is_empty() {
        return Err(UboError::MappingInconsistency(format!(
            "index on '{table}' needs at least one column"
        )));
    }
    let table = normalize_identifier(table)?;
    let mut names = Vec::new();
    for column in columns {
        names.push(normalize_identifier(column)?);
    }
    let index_name = format!(
        "{}_{}_{}",
        if unique { "udx" } else { "idx" },
        table,
        names.join("_")
    );
    let quoted: Vec<String> = names.iter().map(|n| flavor.quote(n)).collect();
    Ok(format!(
        "CREATE {}INDEX {}{} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        if if_not_exists && flavor.supports_index_if_not_exists() { "IF NOT EXISTS " } else { "" },
        flavor.quote(&index_name),
        flavor.quote(&table),
        quoted.join(", ")
    ))
}

/// The statement that creates a universal table: the fixed columns with the
/// flavor's types, then the caller's extra columns, keyed on the id column.
pub fn init_table_sql(flavor: Flavor, table: &str, extra_columns: &[ColumnDef]) -> Result<String> {
    let mut columns: Vec<ColumnDef> = FIXED_COLUMNS
        .iter()
        .zip(flavor.fixed_column_types())
        .map(|(name, sql_type)| ColumnDef::new(name, sql_type))
        .collect();
    for extra in extra_columns {
        let name = normalize_identifier(&extra.name)?;
        if FIXED_COLUMNS.contains(&name.as_str()) || columns.iter().any(|c| c.name == name) {
            return Err(UboError::MappingInconsistency(format!(
                "extra column '{name}' is declared twice or shadows a fixed column"
            )));
        }
        columns.push(ColumnDef::new(&name, &extra.sql_type));
    }
    create_table_sql(flavor, table, true, &columns, &[COL_ID])
}

pub fn create_table(
    conn: &Connection,
    flavor: Flavor,
    table: &str,
    if_not_exists: bool,
    columns: &[ColumnDef],
    primary_key: &[&str],
) -> Result<()> {
    let sql = create_table_sql(flavor, table, if_not_exists, columns, primary_key)?;
    conn.execute_batch(&sql)?;
    info!(table, "table created");
    Ok(())
}

pub fn create_index(
    conn: &Connection,
    flavor: Flavor,
    table: &str,
    unique: bool,
    if_not_exists: bool,
    columns: &[&str],
) -> Result<()> {
    let sql = create_index_sql(flavor, table, unique, if_not_exists, columns)?;
    conn.execute_batch(&sql)?;
    info!(table, unique, columns = %columns.join(","), "index created");
    Ok(())
}

pub fn init_table(conn: &Connection, flavor: Flavor, table: &str, extra_columns: &[ColumnDef]) -> Result<()> {
    let sql = init_table_sql(flavor, table, extra_columns)?;
    conn.execute_batch(&sql)?;
    info!(table, extra_columns = extra_columns.len(), "universal table initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_table_lists_fixed_then_extra_columns() {
        let sql = init_table_sql(Flavor::Sqlite, "Gva_User", &[ColumnDef::new("ZMID", "VARCHAR(32)")]).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"gva_user\" (\"zid\" VARCHAR(64), \"zdata\" TEXT, \
             \"zaversion\" BIGINT, \"zchecksum\" VARCHAR(64), \"ztcreated\" TIMESTAMP, \
             \"ztupdated\" TIMESTAMP, \"zmid\" VARCHAR(32), PRIMARY KEY (\"zid\"))"
        );
    }

    #[test]
    fn index_statements_per_flavor() {
        assert_eq!(
            create_index_sql(Flavor::PgSql, "gva_user", true, true, &["zmid"]).unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"udx_gva_user_zmid\" ON \"gva_user\" (\"zmid\")"
        );
        assert_eq!(
            create_index_sql(Flavor::MySql, "blog", false, true, &["zowner", "ztcreated"]).unwrap(),
            "CREATE INDEX `idx_blog_zowner_ztcreated` ON `blog` (`zowner`, `ztcreated`)"
        );
    }

    #[test]
    fn rejects_unsafe_names_and_shadowing() {
        assert!(normalize_identifier("users; drop table x").is_err());
        assert!(init_table_sql(Flavor::Sqlite, "t", &[ColumnDef::new("zid", "TEXT")]).is_err());
        assert!(create_index_sql(Flavor::Sqlite, "t", false, false, &[]).is_err());
    }
}
