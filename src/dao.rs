//! The storage-agnostic data access contract.
//!
//! Every backend adapter implements [`UniversalDao`]. Filters and sort orders
//! are expressed against record field names (`id`, `appVersion`, `checksum`,
//! `timeCreated`, `timeUpdated`) or promoted extra-attribute keys; each adapter
//! translates them to its native form.

use serde_json::Value;

use crate::error::Result;
use crate::record::UniversalRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl Comparison {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Equal => "=",
            Comparison::NotEqual => "<>",
            Comparison::Greater => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::Less => "<",
            Comparison::LessOrEqual => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOpt {
    Field {
        field: String,
        op: Comparison,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    And(Vec<FilterOpt>),
    Or(Vec<FilterOpt>),
}

impl FilterOpt {
    pub fn field(field: &str, op: Comparison, value: impl Into<Value>) -> Self {
        FilterOpt::Field {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::field(field, Comparison::Equal, value)
    }
    pub fn is_null(field: &str) -> Self {
        FilterOpt::IsNull(field.to_string())
    }
    pub fn is_not_null(field: &str) -> Self {
        FilterOpt::IsNotNull(field.to_string())
    }
    pub fn and(self, other: FilterOpt) -> Self {
        match self {
            FilterOpt::And(mut parts) => {
                parts.push(other);
                FilterOpt::And(parts)
            }
            first => FilterOpt::And(vec![first, other]),
        }
    }
    pub fn or(self, other: FilterOpt) -> Self {
        match self {
            FilterOpt::Or(mut parts) => {
                parts.push(other);
                FilterOpt::Or(parts)
            }
            first => FilterOpt::Or(vec![first, other]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Ordered list of sort keys; an empty list means ascending by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortingOpt {
    fields: Vec<(String, SortOrder)>,
}

impl SortingOpt {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(mut self, field: &str, order: SortOrder) -> Self {
        self.fields.push((field.to_string(), order));
        self
    }
    pub fn asc(self, field: &str) -> Self {
        self.add(field, SortOrder::Asc)
    }
    pub fn desc(self, field: &str) -> Self {
        self.add(field, SortOrder::Desc)
    }
    pub fn fields(&self) -> &[(String, SortOrder)] {
        &self.fields
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Uniform CRUD over universal records.
///
/// "Not found" is never an error: `get` yields `None`, `update` and `delete`
/// yield `false`. Every mutating call synchronizes the record before it is
/// encoded for the backend.
pub trait UniversalDao: Send + Sync {
    /// Inserts a new record; fails with `DuplicateKey` when the id (or a
    /// uniquely constrained promoted field) is already taken.
    fn create(&self, record: &UniversalRecord) -> Result<bool>;

    fn get(&self, id: &str) -> Result<Option<UniversalRecord>>;

    /// Skips `offset` matching records and returns at most `limit` of them
    /// (`limit == 0` is unbounded), ascending by id unless `sorting` says otherwise.
    fn get_n(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<&FilterOpt>,
        sorting: Option<&SortingOpt>,
    ) -> Result<Vec<UniversalRecord>>;

    fn get_all(
        &self,
        filter: Option<&FilterOpt>,
        sorting: Option<&SortingOpt>,
    ) -> Result<Vec<UniversalRecord>> {
        self.get_n(0, 0, filter, sorting)
    }

    /// Replaces an existing record; never creates one.
    fn update(&self, record: &UniversalRecord) -> Result<bool>;

    fn delete(&self, record: &UniversalRecord) -> Result<bool>;

    /// Creates or updates; returns whether anything was written and, if the
    /// id existed, the record as it was before.
    fn save(&self, record: &UniversalRecord) -> Result<(bool, Option<UniversalRecord>)>;
}
