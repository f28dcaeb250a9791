//! The universal business object.
//!
//! A [`UniversalRecord`] is one persisted entity: an identifier, an opaque
//! JSON document, a handful of promoted "extra" attributes a backend can
//! index on, a checksum, and creation/update timestamps. The document is
//! parsed lazily the first time a path is read or written, and only turned
//! back into text when the record is synchronized. Synchronization is the one
//! place where checksum and document are made consistent with the tree.
//!
//! All state lives behind a single `RwLock`, so one record instance can be
//! shared between threads; this protects field consistency only.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::checksum::checksum_of;
use crate::error::{Result, UboError};
use crate::path::{self, Path};

// ------------- Fields -------------
pub const FIELD_ID: &str = "id";
pub const FIELD_DATA: &str = "data";
pub const FIELD_APP_VERSION: &str = "appVersion";
pub const FIELD_CHECKSUM: &str = "checksum";
pub const FIELD_TIME_CREATED: &str = "timeCreated";
pub const FIELD_TIME_UPDATED: &str = "timeUpdated";
pub const FIELD_EXTRAS: &str = "extras";

pub const TOP_LEVEL_FIELDS: [&str; 6] = [
    FIELD_ID,
    FIELD_DATA,
    FIELD_APP_VERSION,
    FIELD_CHECKSUM,
    FIELD_TIME_CREATED,
    FIELD_TIME_UPDATED,
];

// ------------- Time -------------
/// Textual layout of every timestamp the store writes, always in UTC.
pub const TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

pub fn format_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    time.with_timezone(&Utc).format(TIME_LAYOUT).to_string()
}

/// Parses a timestamp in [`TIME_LAYOUT`], falling back to RFC 3339.
pub fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(text, TIME_LAYOUT)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .ok()
        .map(|t| t.with_timezone(&Utc).trunc_subsecs(6))
}

/// Truncates to the precision that survives [`TIME_LAYOUT`].
pub fn normalize_time<Tz: TimeZone>(time: &DateTime<Tz>) -> DateTime<Utc> {
    time.with_timezone(&Utc).trunc_subsecs(6)
}

fn now() -> DateTime<Utc> {
    normalize_time(&Utc::now())
}

pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

mod layout {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_time(time))
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_time(&text).ok_or_else(|| D::Error::custom(format!("bad timestamp '{text}'")))
    }
}

// ------------- Export -------------
/// Flat, transport-friendly form of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordExport {
    pub id: String,
    /// the document as JSON text
    pub data: String,
    pub app_version: u64,
    pub checksum: String,
    #[serde(with = "layout")]
    pub time_created: DateTime<Utc>,
    #[serde(with = "layout")]
    pub time_updated: DateTime<Utc>,
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

// ------------- Record -------------
#[derive(Debug)]
struct RecordState {
    id: String,
    document: String,
    app_version: u64,
    checksum: String,
    time_created: DateTime<Utc>,
    time_updated: DateTime<Utc>,
    // lazily materialized from the document
    data: Option<Value>,
    // set once a path write went into `data`; until then the document is the content
    tree_written: bool,
    extras: BTreeMap<String, Value>,
    dirty: bool,
    reinitialized: bool,
}

impl RecordState {
    fn parse_document(&mut self, path: &Path) -> Value {
        let text = self.document.trim();
        if !text.is_empty() {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Null) => (),
                Ok(tree) => return tree,
                Err(e) => {
                    warn!(id = %self.id, error = %e, "document is not valid JSON");
                }
            }
            self.reinitialized = true;
        }
        if path.starts_with_index() {
            debug!(id = %self.id, "document initialized as an empty sequence");
            Value::Array(Vec::new())
        } else {
            debug!(id = %self.id, "document initialized as an empty map");
            Value::Object(Map::new())
        }
    }
    fn materialize(&mut self, path: &Path) -> &mut Value {
        let tree = match self.data.take() {
            Some(tree) => tree,
            None => self.parse_document(path),
        };
        self.data.insert(tree)
    }
    // reads may have cached a fallback container that was never written to
    fn current_data(&self) -> Cow<'_, Value> {
        match &self.data {
            Some(tree) if self.tree_written => Cow::Borrowed(tree),
            _ => Cow::Owned(serde_json::from_str(self.document.trim()).unwrap_or(Value::Null)),
        }
    }
    fn compute_checksum(&self) -> String {
        checksum_of(
            &self.id,
            self.app_version,
            &self.time_created,
            &self.current_data(),
            &self.extras,
        )
    }
    fn sync(&mut self) {
        if !self.dirty {
            return;
        }
        self.time_updated = now();
        self.checksum = self.compute_checksum();
        if let Some(tree) = self.data.as_ref().filter(|_| self.tree_written) {
            self.document = tree.to_string();
        }
        self.dirty = false;
    }
}

/// The universal business object.
#[derive(Debug)]
pub struct UniversalRecord {
    state: RwLock<RecordState>,
}

fn convert<T: DeserializeOwned>(what: &str, value: Value) -> Result<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value::<T>(value.clone()) {
        Ok(converted) => Ok(Some(converted)),
        Err(e) => {
            // 30.0 read back into an integer type
            if let Some(f) = value.as_f64().filter(|f| f.fract() == 0.0) {
                if let Ok(converted) = serde_json::from_value::<T>(Value::from(f as i64)) {
                    return Ok(Some(converted));
                }
            }
            Err(UboError::Conversion {
                what: what.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

fn convert_time(what: &str, value: Option<Value>) -> Result<Option<DateTime<Utc>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => parse_time(&text).map(Some).ok_or_else(|| UboError::Conversion {
            what: what.to_string(),
            reason: format!("'{text}' is not a timestamp"),
        }),
        Some(other) => Err(UboError::Conversion {
            what: what.to_string(),
            reason: format!("{other} is not a timestamp"),
        }),
    }
}

impl UniversalRecord {
    /// Creates a dirty record with an empty document; `id` is trimmed and lower-cased.
    pub fn new(id: &str, app_version: u64) -> Self {
        let now = now();
        Self {
            state: RwLock::new(RecordState {
                id: normalize_id(id),
                document: String::new(),
                app_version,
                checksum: String::new(),
                time_created: now,
                time_updated: now,
                data: None,
                tree_written: false,
                extras: BTreeMap::new(),
                dirty: true,
                reinitialized: false,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RecordState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
    fn write(&self) -> RwLockWriteGuard<'_, RecordState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> String {
        self.read().id.clone()
    }
    pub fn set_id(&self, id: &str) -> &Self {
        let mut state = self.write();
        state.id = normalize_id(id);
        state.dirty = true;
        self
    }
    /// The document as of the last synchronization.
    pub fn document(&self) -> String {
        self.read().document.clone()
    }
    /// Replaces the raw document text; the parsed tree is discarded.
    pub fn set_document(&self, json: &str) -> &Self {
        let mut state = self.write();
        state.document = json.trim().to_string();
        state.data = None;
        state.tree_written = false;
        state.reinitialized = false;
        state.dirty = true;
        self
    }
    pub fn app_version(&self) -> u64 {
        self.read().app_version
    }
    pub fn set_app_version(&self, app_version: u64) -> &Self {
        let mut state = self.write();
        state.app_version = app_version;
        state.dirty = true;
        self
    }
    pub fn checksum(&self) -> String {
        self.read().checksum.clone()
    }
    pub fn time_created(&self) -> DateTime<Utc> {
        self.read().time_created
    }
    pub fn time_updated(&self) -> DateTime<Utc> {
        self.read().time_updated
    }
    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }
    /// True when a non-empty document could not be parsed into a tree and an
    /// empty container was put in its place.
    pub fn document_reinitialized(&self) -> bool {
        self.read().reinitialized
    }

    // ------------- Document attributes -------------
    pub fn data_attr(&self, path: &str) -> Result<Option<Value>> {
        let path = Path::parse(path)?;
        {
            let state = self.read();
            if let Some(tree) = &state.data {
                return Ok(path::get(tree, &path)?.cloned());
            }
        }
        let mut state = self.write();
        let tree = state.materialize(&path);
        Ok(path::get(tree, &path)?.cloned())
    }
    pub fn data_attr_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.data_attr(path)? {
            Some(value) => convert(path, value),
            None => Ok(None),
        }
    }
    pub fn data_attr_as_time(&self, path: &str) -> Result<Option<DateTime<Utc>>> {
        convert_time(path, self.data_attr(path)?)
    }
    pub fn set_data_attr(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        let path = Path::parse(path)?;
        let mut state = self.write();
        let tree = state.materialize(&path);
        path::set(tree, &path, value.into())?;
        state.tree_written = true;
        state.dirty = true;
        Ok(())
    }
    /// Stores a timestamp as text in [`TIME_LAYOUT`].
    pub fn set_data_attr_time<Tz: TimeZone>(&self, path: &str, time: &DateTime<Tz>) -> Result<()>
    where
        Tz::Offset: Display,
    {
        self.set_data_attr(path, format_time(time))
    }

    // ------------- Extra attributes -------------
    pub fn extra_attr(&self, key: &str) -> Option<Value> {
        self.read().extras.get(key).cloned()
    }
    pub fn extra_attr_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.extra_attr(key) {
            Some(value) => convert(key, value),
            None => Ok(None),
        }
    }
    pub fn extra_attr_as_time(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        convert_time(key, self.extra_attr(key))
    }
    pub fn extra_attrs(&self) -> BTreeMap<String, Value> {
        self.read().extras.clone()
    }
    pub fn set_extra_attr(&self, key: &str, value: impl Into<Value>) -> &Self {
        let mut state = self.write();
        state.extras.insert(key.to_string(), value.into());
        state.dirty = true;
        self
    }
    /// Stores a timestamp as text in [`TIME_LAYOUT`].
    pub fn set_extra_attr_time<Tz: TimeZone>(&self, key: &str, time: &DateTime<Tz>) -> &Self
    where
        Tz::Offset: Display,
    {
        self.set_extra_attr(key, format_time(time))
    }
    pub fn remove_extra_attr(&self, key: &str) -> Option<Value> {
        let mut state = self.write();
        let removed = state.extras.remove(key);
        if removed.is_some() {
            state.dirty = true;
        }
        removed
    }

    // ------------- Synchronization -------------
    /// Brings checksum and document up to date with any pending mutation.
    pub fn synchronize(&self) -> &Self {
        self.write().sync();
        self
    }
    /// Recomputes the checksum and compares it with the stored one.
    pub fn verify_checksum(&self) -> bool {
        let state = self.read();
        let matches = state.compute_checksum() == state.checksum;
        if !matches {
            warn!(id = %state.id, "checksum does not match record content");
        }
        matches
    }

    // ------------- Export -------------
    pub fn to_export(&self) -> RecordExport {
        let mut state = self.write();
        state.sync();
        RecordExport {
            id: state.id.clone(),
            data: state.document.clone(),
            app_version: state.app_version,
            checksum: state.checksum.clone(),
            time_created: state.time_created,
            time_updated: state.time_updated,
            extras: state.extras.clone(),
        }
    }
    /// Rebuilds a clean record; the stored checksum is kept as is.
    pub fn from_export(export: RecordExport) -> Self {
        Self {
            state: RwLock::new(RecordState {
                id: normalize_id(&export.id),
                document: export.data.trim().to_string(),
                app_version: export.app_version,
                checksum: export.checksum,
                time_created: normalize_time(&export.time_created),
                time_updated: normalize_time(&export.time_updated),
                data: None,
                tree_written: false,
                extras: export.extras,
                dirty: false,
                reinitialized: false,
            }),
        }
    }
}

// The clone shares nothing and re-parses its document on first access.
impl Clone for UniversalRecord {
    fn clone(&self) -> Self {
        Self::from_export(self.to_export())
    }
}

impl Serialize for UniversalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_export().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UniversalRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        RecordExport::deserialize(deserializer).map(Self::from_export)
    }
}
