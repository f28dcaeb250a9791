//! An in-process key-value adapter.
//!
//! Records are kept in their exported form keyed by id. A key-value store has
//! no secondary unique constraints of its own, so each unique index declared
//! in [`KvSpec`] is simulated with a companion lookup from the canonical
//! encoding of the promoted-field tuple to the id that owns it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasherDefault;
use std::sync::{Mutex, MutexGuard};

// used for the unique-index lookups
use seahash::SeaHasher;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::checksum::canonical_json;
use crate::dao::{Comparison, FilterOpt, SortOrder, SortingOpt, UniversalDao};
use crate::error::{Result, UboError};
use crate::record::{
    format_time, normalize_id, RecordExport, UniversalRecord, FIELD_APP_VERSION, FIELD_CHECKSUM,
    FIELD_DATA, FIELD_EXTRAS, FIELD_ID, FIELD_TIME_CREATED, FIELD_TIME_UPDATED,
};

type Lookup = HashMap<String, String, BuildHasherDefault<SeaHasher>>;

/// Unique constraints to simulate, each a tuple of promoted extra keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KvSpec {
    #[serde(default)]
    pub unique_indexes: Vec<Vec<String>>,
}

impl KvSpec {
    pub fn unique(mut self, fields: &[&str]) -> Self {
        self.unique_indexes.push(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

#[derive(Debug, Default)]
struct KvState {
    rows: BTreeMap<String, RecordExport>,
    // one per unique index, in KvSpec order
    lookups: Vec<Lookup>,
}

// None when any field of the tuple is missing; such records are not indexed
fn tuple_key(fields: &[String], export: &RecordExport) -> Option<String> {
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        match export.extras.get(field) {
            None | Some(Value::Null) => return None,
            Some(value) => values.push(value.clone()),
        }
    }
    Some(canonical_json(&Value::Array(values)))
}

impl KvState {
    fn check_unique(&self, spec: &KvSpec, export: &RecordExport) -> Result<()> {
        for (fields, lookup) in spec.unique_indexes.iter().zip(&self.lookups) {
            if let Some(owner) = tuple_key(fields, export).and_then(|key| lookup.get(&key)) {
                if owner != &export.id {
                    return Err(UboError::DuplicateKey { id: export.id.clone() });
                }
            }
        }
        Ok(())
    }
    fn index(&mut self, spec: &KvSpec, export: &RecordExport) {
        for (fields, lookup) in spec.unique_indexes.iter().zip(self.lookups.iter_mut()) {
            if let Some(key) = tuple_key(fields, export) {
                lookup.insert(key, export.id.clone());
            }
        }
    }
    fn unindex(&mut self, spec: &KvSpec, export: &RecordExport) {
        for (fields, lookup) in spec.unique_indexes.iter().zip(self.lookups.iter_mut()) {
            if let Some(key) = tuple_key(fields, export) {
                if lookup.get(&key) == Some(&export.id) {
                    lookup.remove(&key);
                }
            }
        }
    }
    fn insert(&mut self, spec: &KvSpec, export: RecordExport) -> Result<()> {
        if self.rows.contains_key(&export.id) {
            return Err(UboError::DuplicateKey { id: export.id });
        }
        self.check_unique(spec, &export)?;
        self.index(spec, &export);
        self.rows.insert(export.id.clone(), export);
        Ok(())
    }
    // the prior row, or None when nothing was replaced
    fn replace(&mut self, spec: &KvSpec, export: RecordExport) -> Result<Option<RecordExport>> {
        if !self.rows.contains_key(&export.id) {
            return Ok(None);
        }
        self.check_unique(spec, &export)?;
        let prior = self.rows.insert(export.id.clone(), export.clone());
        if let Some(prior) = &prior {
            self.unindex(spec, prior);
        }
        self.index(spec, &export);
        Ok(prior)
    }
}

// ------------- Filtering -------------
fn field_value(export: &RecordExport, field: &str) -> Result<Value> {
    Ok(match field {
        FIELD_ID => Value::String(export.id.clone()),
        FIELD_APP_VERSION => Value::from(export.app_version),
        FIELD_CHECKSUM => Value::String(export.checksum.clone()),
        FIELD_TIME_CREATED => Value::String(format_time(&export.time_created)),
        FIELD_TIME_UPDATED => Value::String(format_time(&export.time_updated)),
        FIELD_DATA | FIELD_EXTRAS | "" => return Err(UboError::UnknownField(field.to_string())),
        extra => export.extras.get(extra).cloned().unwrap_or(Value::Null),
    })
}

// None when the values are not comparable, which includes null on either side
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn matches(export: &RecordExport, filter: &FilterOpt) -> Result<bool> {
    Ok(match filter {
        FilterOpt::Field { field, op, value } => {
            let actual = field_value(export, field)?;
            if actual.is_null() || value.is_null() {
                false
            } else {
                match (op, compare(&actual, value)) {
                    (Comparison::NotEqual, None) => true,
                    (_, None) => false,
                    (Comparison::Equal, Some(o)) => o == Ordering::Equal,
                    (Comparison::NotEqual, Some(o)) => o != Ordering::Equal,
                    (Comparison::Greater, Some(o)) => o == Ordering::Greater,
                    (Comparison::GreaterOrEqual, Some(o)) => o != Ordering::Less,
                    (Comparison::Less, Some(o)) => o == Ordering::Less,
                    (Comparison::LessOrEqual, Some(o)) => o != Ordering::Greater,
                }
            }
        }
        FilterOpt::IsNull(field) => field_value(export, field)?.is_null(),
        FilterOpt::IsNotNull(field) => !field_value(export, field)?.is_null(),
        FilterOpt::And(parts) => {
            for part in parts {
                if !matches(export, part)? {
                    return Ok(false);
                }
            }
            true
        }
        FilterOpt::Or(parts) => {
            for part in parts {
                if matches(export, part)? {
                    return Ok(true);
                }
            }
            false
        }
    })
}

// nulls first, then booleans, numbers, strings and containers
fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

fn sort_cmp(left: &Value, right: &Value) -> Ordering {
    rank(left)
        .cmp(&rank(right))
        .then_with(|| compare(left, right).unwrap_or(Ordering::Equal))
}

// ------------- MemoryDao -------------
/// Universal DAO over an in-process ordered map.
#[derive(Debug, Default)]
pub struct MemoryDao {
    spec: KvSpec,
    state: Mutex<KvState>,
}

impl MemoryDao {
    pub fn new(spec: KvSpec) -> Self {
        let lookups = spec.unique_indexes.iter().map(|_| Lookup::default()).collect();
        Self {
            spec,
            state: Mutex::new(KvState {
                rows: BTreeMap::new(),
                lookups,
            }),
        }
    }
    pub fn spec(&self) -> &KvSpec {
        &self.spec
    }
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.rows.len())
    }
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    fn lock(&self) -> Result<MutexGuard<'_, KvState>> {
        self.state.lock().map_err(|e| UboError::Lock(e.to_string()))
    }
}

impl UniversalDao for MemoryDao {
    fn create(&self, record: &UniversalRecord) -> Result<bool> {
        let export = record.to_export();
        let id = export.id.clone();
        self.lock()?.insert(&self.spec, export)?;
        debug!(id = %id, "record created");
        Ok(true)
    }

    fn get(&self, id: &str) -> Result<Option<UniversalRecord>> {
        let state = self.lock()?;
        Ok(state
            .rows
            .get(&normalize_id(id))
            .cloned()
            .map(UniversalRecord::from_export))
    }

    fn get_n(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<&FilterOpt>,
        sorting: Option<&SortingOpt>,
    ) -> Result<Vec<UniversalRecord>> {
        let state = self.lock()?;
        let mut selected = Vec::new();
        for export in state.rows.values() {
            match filter {
                Some(filter) if !matches(export, filter)? => (),
                _ => selected.push(export),
            }
        }
        if let Some(sorting) = sorting.filter(|s| !s.is_empty()) {
            // resolve every key up front so unknown fields fail before sorting
            let mut keyed = Vec::with_capacity(selected.len());
            for export in selected {
                let mut keys = Vec::with_capacity(sorting.fields().len());
                for (field, _) in sorting.fields() {
                    keys.push(field_value(export, field)?);
                }
                keyed.push((keys, export));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                sorting
                    .fields()
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|((_, order), (x, y))| match order {
                        SortOrder::Asc => sort_cmp(x, y),
                        SortOrder::Desc => sort_cmp(y, x),
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
            selected = keyed.into_iter().map(|(_, export)| export).collect();
        }
        let take = if limit == 0 { usize::MAX } else { limit };
        let result: Vec<UniversalRecord> = selected
            .into_iter()
            .skip(offset)
            .take(take)
            .cloned()
            .map(UniversalRecord::from_export)
            .collect();
        debug!(offset, limit, found = result.len(), "records fetched");
        Ok(result)
    }

    fn update(&self, record: &UniversalRecord) -> Result<bool> {
        let export = record.to_export();
        let id = export.id.clone();
        let updated = self.lock()?.replace(&self.spec, export)?.is_some();
        debug!(id = %id, updated, "record updated");
        Ok(updated)
    }

    fn delete(&self, record: &UniversalRecord) -> Result<bool> {
        let id = record.synchronize().id();
        let mut state = self.lock()?;
        let removed = state.rows.remove(&id);
        if let Some(prior) = &removed {
            state.unindex(&self.spec, prior);
        }
        debug!(id = %id, deleted = removed.is_some(), "record deleted");
        Ok(removed.is_some())
    }

    fn save(&self, record: &UniversalRecord) -> Result<(bool, Option<UniversalRecord>)> {
        let export = record.to_export();
        let id = export.id.clone();
        let mut state = self.lock()?;
        let prior = if state.rows.contains_key(&id) {
            state.replace(&self.spec, export)?
        } else {
            state.insert(&self.spec, export)?;
            None
        };
        debug!(id = %id, existed = prior.is_some(), "record saved");
        Ok((true, prior.map(UniversalRecord::from_export)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn comparisons_follow_value_kinds() {
        assert_eq!(compare(&json!(2), &json!(10.5)), Some(Ordering::Less));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!(1), &json!("1")), None);
        assert_eq!(sort_cmp(&Value::Null, &json!(false)), Ordering::Less);
        assert_eq!(sort_cmp(&json!(3), &json!("a")), Ordering::Less);
    }

    #[test]
    fn incomplete_tuples_are_not_indexed() {
        let fields = vec!["a".to_string(), "b".to_string()];
        let record = UniversalRecord::new("x", 1);
        record.set_extra_attr("a", 1);
        assert_eq!(tuple_key(&fields, &record.to_export()), None);
        record.set_extra_attr("b", "two");
        assert_eq!(tuple_key(&fields, &record.to_export()).as_deref(), Some(r#"[1,"two"]"#));
    }
}
