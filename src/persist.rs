// used for persistence
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

// used to keep the one-to-one mapping between promoted columns and extra attributes
use bimap::BiMap;

use serde_json::{Number, Value};
use tracing::debug;

use crate::checksum::canonical_json;
use crate::dao::{FilterOpt, SortOrder, SortingOpt, UniversalDao};
use crate::error::{Result, UboError};
use crate::record::{
    format_time, normalize_id, parse_time, RecordExport, UniversalRecord, FIELD_APP_VERSION,
    FIELD_CHECKSUM, FIELD_ID, FIELD_TIME_CREATED, FIELD_TIME_UPDATED, TOP_LEVEL_FIELDS,
};
use crate::schema::{
    normalize_identifier, Flavor, COL_APP_VERSION, COL_CHECKSUM, COL_ID, COL_TIME_CREATED,
    COL_TIME_UPDATED, FIXED_COLUMNS,
};

/// A connection shared by every DAO of an application; DAOs never close it.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub fn share(connection: Connection) -> SharedConnection {
    Arc::new(Mutex::new(connection))
}

// the document itself is not filterable
fn fixed_column_for(field: &str) -> Option<&'static str> {
    match field {
        FIELD_ID => Some(COL_ID),
        FIELD_APP_VERSION => Some(COL_APP_VERSION),
        FIELD_CHECKSUM => Some(COL_CHECKSUM),
        FIELD_TIME_CREATED => Some(COL_TIME_CREATED),
        FIELD_TIME_UPDATED => Some(COL_TIME_UPDATED),
        _ => None,
    }
}

// ------------- ColumnMapping -------------
/// Bijection between promoted columns and extra-attribute keys.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    // left: column, right: field
    kept: BiMap<String, String>,
    columns: Vec<String>,
}

impl ColumnMapping {
    pub fn empty() -> Self {
        Self::default()
    }
    /// Both directions must be given and must mirror each other exactly.
    pub fn new(
        column_to_field: &HashMap<String, String>,
        field_to_column: &HashMap<String, String>,
    ) -> Result<Self> {
        // compare column names the way they will be stored
        let mut columns = HashMap::with_capacity(column_to_field.len());
        for (column, field) in column_to_field {
            if columns.insert(normalize_identifier(column)?, field.clone()).is_some() {
                return Err(UboError::MappingInconsistency(format!(
                    "column '{column}' is mapped more than once"
                )));
            }
        }
        let mut fields = HashMap::with_capacity(field_to_column.len());
        for (field, column) in field_to_column {
            fields.insert(field.clone(), normalize_identifier(column)?);
        }
        for (field, column) in &fields {
            if columns.get(column) != Some(field) {
                return Err(UboError::MappingInconsistency(format!(
                    "field '{field}' maps to column '{column}' but that column does not map back to it"
                )));
            }
        }
        for (column, field) in &columns {
            if fields.get(field) != Some(column) {
                return Err(UboError::MappingInconsistency(format!(
                    "column '{column}' maps to field '{field}' but that field does not map back to it"
                )));
            }
        }
        Self::from_pairs(columns)
    }
    /// Builds the mapping from `(column, field)` pairs; a column or field
    /// appearing twice is rejected.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut mapping = Self::default();
        for (column, field) in pairs {
            let column = normalize_identifier(&column)?;
            if FIXED_COLUMNS.contains(&column.as_str()) {
                return Err(UboError::MappingInconsistency(format!(
                    "column '{column}' is reserved"
                )));
            }
            if field.is_empty() || TOP_LEVEL_FIELDS.contains(&field.as_str()) {
                return Err(UboError::MappingInconsistency(format!(
                    "field '{field}' cannot be promoted"
                )));
            }
            if mapping.kept.insert_no_overwrite(column.clone(), field.clone()).is_err() {
                return Err(UboError::MappingInconsistency(format!(
                    "column '{column}' or field '{field}' is mapped more than once"
                )));
            }
            mapping.columns.push(column);
        }
        mapping.columns.sort();
        Ok(mapping)
    }
    pub fn field_for(&self, column: &str) -> Option<&str> {
        self.kept.get_by_left(column).map(String::as_str)
    }
    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.kept.get_by_right(field).map(String::as_str)
    }
    /// Promoted columns, sorted by name.
    pub fn extra_columns(&self) -> &[String] {
        &self.columns
    }
    /// Fixed columns followed by the promoted ones.
    pub fn columns(&self) -> Vec<String> {
        FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.columns.iter().cloned())
            .collect()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

// ------------- Value conversion -------------
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_value(value: ValueRef) -> Option<Value> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Value::from(i)),
        ValueRef::Real(f) => Some(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(Value::String(String::from_utf8_lossy(t).into_owned())),
    }
}

fn conversion_failure(index: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        Box::new(UboError::Conversion {
            what: format!("column {index}"),
            reason,
        }),
    )
}

fn app_version_to_sql(app_version: u64) -> Result<i64> {
    i64::try_from(app_version).map_err(|e| UboError::Conversion {
        what: FIELD_APP_VERSION.to_string(),
        reason: e.to_string(),
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}

// ------------- SqlDao -------------
/// Universal DAO over one relational table.
pub struct SqlDao {
    conn: SharedConnection,
    flavor: Flavor,
    table: String,
    mapping: ColumnMapping,
    // quoted column list in select order
    select_list: String,
}

impl SqlDao {
    pub fn new(conn: SharedConnection, flavor: Flavor, table: &str, mapping: ColumnMapping) -> Result<Self> {
        let table = normalize_identifier(table)?;
        let select_list = mapping
            .columns()
            .iter()
            .map(|c| flavor.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Self {
            conn,
            flavor,
            table,
            mapping,
            select_list,
        })
    }
    pub fn table(&self) -> &str {
        &self.table
    }
    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| UboError::Lock(e.to_string()))
    }
    fn quoted_table(&self) -> String {
        self.flavor.quote(&self.table)
    }
    fn column(&self, field: &str) -> Result<&str> {
        fixed_column_for(field)
            .or_else(|| self.mapping.column_for(field))
            .ok_or_else(|| UboError::UnknownField(field.to_string()))
    }

    // values in the order of `mapping.columns()`
    fn row_values(&self, export: &RecordExport) -> Result<Vec<SqlValue>> {
        let mut values = vec![
            SqlValue::Text(export.id.clone()),
            SqlValue::Text(export.data.clone()),
            SqlValue::Integer(app_version_to_sql(export.app_version)?),
            SqlValue::Text(export.checksum.clone()),
            SqlValue::Text(format_time(&export.time_created)),
            SqlValue::Text(format_time(&export.time_updated)),
        ];
        for column in self.mapping.extra_columns() {
            let value = self
                .mapping
                .field_for(column)
                .and_then(|field| export.extras.get(field))
                .map(to_sql_value)
                .unwrap_or(SqlValue::Null);
            values.push(value);
        }
        Ok(values)
    }

    fn from_row(&self, row: &Row) -> rusqlite::Result<RecordExport> {
        let time_at = |index: usize| -> rusqlite::Result<_> {
            let text: String = row.get(index)?;
            parse_time(&text).ok_or_else(|| conversion_failure(index, format!("'{text}' is not a timestamp")))
        };
        let app_version: i64 = row.get(2)?;
        let mut extras = std::collections::BTreeMap::new();
        for (offset, column) in self.mapping.extra_columns().iter().enumerate() {
            if let (Some(field), Some(value)) = (
                self.mapping.field_for(column),
                from_sql_value(row.get_ref(FIXED_COLUMNS.len() + offset)?),
            ) {
                extras.insert(field.to_string(), value);
            }
        }
        Ok(RecordExport {
            id: row.get(0)?,
            data: row.get(1)?,
            app_version: u64::try_from(app_version).map_err(|e| conversion_failure(2, e.to_string()))?,
            checksum: row.get(3)?,
            time_created: time_at(4)?,
            time_updated: time_at(5)?,
            extras,
        })
    }

    fn fetch_one(&self, conn: &Connection, id: &str) -> Result<Option<RecordExport>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            self.select_list,
            self.quoted_table(),
            self.flavor.quote(COL_ID)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        Ok(stmt.query_row([id], |row| self.from_row(row)).optional()?)
    }

    fn insert(&self, conn: &Connection, export: &RecordExport) -> Result<usize> {
        let columns = self.mapping.columns();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted_table(),
            self.select_list,
            vec!["?"; columns.len()].join(", ")
        );
        let values = self.row_values(export)?;
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(values.iter())).map_err(|e| {
            if is_unique_violation(&e) {
                UboError::DuplicateKey { id: export.id.clone() }
            } else {
                e.into()
            }
        })
    }

    fn update_row(&self, conn: &Connection, export: &RecordExport) -> Result<usize> {
        let columns = self.mapping.columns();
        let assignments = columns
            .iter()
            .skip(1)
            .map(|c| format!("{} = ?", self.flavor.quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.quoted_table(),
            assignments,
            self.flavor.quote(COL_ID)
        );
        let mut values = self.row_values(export)?;
        // the id moves from the front to the where clause
        let id = values.remove(0);
        values.push(id);
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(values.iter())).map_err(|e| {
            if is_unique_violation(&e) {
                UboError::DuplicateKey { id: export.id.clone() }
            } else {
                e.into()
            }
        })
    }

    // every extra needs a column, or it would be lost on the way to the table
    fn check_extras(&self, export: &RecordExport) -> Result<()> {
        match export.extras.keys().find(|field| self.mapping.column_for(field).is_none()) {
            Some(field) => Err(UboError::UnknownField(field.clone())),
            None => Ok(()),
        }
    }

    // the stored row must give back the extras the checksum was computed over
    fn check_read_back(&self, conn: &Connection, export: &RecordExport) -> Result<()> {
        let stored = self
            .fetch_one(conn, &export.id)?
            .map(|row| row.extras)
            .unwrap_or_default();
        for (field, value) in &export.extras {
            let read = stored.get(field);
            if read.map(canonical_json) != Some(canonical_json(value)) {
                let column = self.mapping.column_for(field).unwrap_or_default();
                let read = read.map_or_else(|| "NULL".to_string(), Value::to_string);
                return Err(UboError::Conversion {
                    what: format!("extra '{field}'"),
                    reason: format!("{value} reads back from column '{column}' as {read}"),
                });
            }
        }
        Ok(())
    }

    fn filter_sql(&self, filter: &FilterOpt, params: &mut Vec<SqlValue>) -> Result<String> {
        Ok(match filter {
            FilterOpt::Field { field, op, value } => {
                let column = self.column(field)?;
                params.push(to_sql_value(value));
                format!("{} {} ?", self.flavor.quote(column), op.sql())
            }
            FilterOpt::IsNull(field) => format!("{} IS NULL", self.flavor.quote(self.column(field)?)),
            FilterOpt::IsNotNull(field) => format!("{} IS NOT NULL", self.flavor.quote(self.column(field)?)),
            FilterOpt::And(parts) | FilterOpt::Or(parts) if parts.is_empty() => {
                // an empty conjunction is true, an empty disjunction false
                let constant = if matches!(filter, FilterOpt::And(_)) { "1 = 1" } else { "1 = 0" };
                constant.to_string()
            }
            FilterOpt::And(parts) => self.join_filters(parts, " AND ", params)?,
            FilterOpt::Or(parts) => self.join_filters(parts, " OR ", params)?,
        })
    }
    fn join_filters(&self, parts: &[FilterOpt], separator: &str, params: &mut Vec<SqlValue>) -> Result<String> {
        let mut clauses = Vec::new();
        for part in parts {
            clauses.push(self.filter_sql(part, params)?);
        }
        Ok(format!("({})", clauses.join(separator)))
    }
    fn order_sql(&self, sorting: Option<&SortingOpt>) -> Result<String> {
        match sorting {
            Some(sorting) if !sorting.is_empty() => {
                let mut keys = Vec::new();
                for (field, order) in sorting.fields() {
                    let direction = match order {
                        SortOrder::Asc => "ASC",
                        SortOrder::Desc => "DESC",
                    };
                    keys.push(format!("{} {}", self.flavor.quote(self.column(field)?), direction));
                }
                Ok(keys.join(", "))
            }
            _ => Ok(format!("{} ASC", self.flavor.quote(COL_ID))),
        }
    }

    /// Number of rows matching `filter`.
    pub fn count(&self, filter: Option<&FilterOpt>) -> Result<u64> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.quoted_table());
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter_sql(filter, &mut params)?);
        }
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

impl UniversalDao for SqlDao {
    fn create(&self, record: &UniversalRecord) -> Result<bool> {
        let export = record.to_export();
        self.check_extras(&export)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if self.fetch_one(&tx, &export.id)?.is_some() {
            return Err(UboError::DuplicateKey { id: export.id });
        }
        let inserted = self.insert(&tx, &export)?;
        self.check_read_back(&tx, &export)?;
        tx.commit()?;
        debug!(table = %self.table, id = %export.id, "record created");
        Ok(inserted > 0)
    }

    fn get(&self, id: &str) -> Result<Option<UniversalRecord>> {
        let conn = self.lock()?;
        let found = self.fetch_one(&conn, &normalize_id(id))?;
        Ok(found.map(UniversalRecord::from_export))
    }

    fn get_n(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<&FilterOpt>,
        sorting: Option<&SortingOpt>,
    ) -> Result<Vec<UniversalRecord>> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", self.select_list, self.quoted_table());
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter_sql(filter, &mut params)?);
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_sql(sorting)?);
        if limit > 0 || offset > 0 {
            // a negative limit means no limit
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(if limit > 0 { limit as i64 } else { -1 }));
            params.push(SqlValue::Integer(offset as i64));
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| self.from_row(row))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(UniversalRecord::from_export(row?));
        }
        debug!(table = %self.table, offset, limit, found = result.len(), "records fetched");
        Ok(result)
    }

    fn update(&self, record: &UniversalRecord) -> Result<bool> {
        let export = record.to_export();
        self.check_extras(&export)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let updated = self.update_row(&tx, &export)?;
        if updated > 0 {
            self.check_read_back(&tx, &export)?;
        }
        tx.commit()?;
        debug!(table = %self.table, id = %export.id, updated, "record updated");
        Ok(updated > 0)
    }

    fn delete(&self, record: &UniversalRecord) -> Result<bool> {
        let id = record.synchronize().id();
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.quoted_table(),
            self.flavor.quote(COL_ID)
        );
        let conn = self.lock()?;
        let deleted = conn.prepare_cached(&sql)?.execute([&id])?;
        debug!(table = %self.table, id = %id, deleted, "record deleted");
        Ok(deleted > 0)
    }

    fn save(&self, record: &UniversalRecord) -> Result<(bool, Option<UniversalRecord>)> {
        let export = record.to_export();
        self.check_extras(&export)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let prior = self.fetch_one(&tx, &export.id)?;
        let written = match prior {
            Some(_) => self.update_row(&tx, &export)?,
            None => self.insert(&tx, &export)?,
        };
        self.check_read_back(&tx, &export)?;
        tx.commit()?;
        debug!(table = %self.table, id = %export.id, existed = prior.is_some(), "record saved");
        Ok((written > 0, prior.map(UniversalRecord::from_export)))
    }
}
