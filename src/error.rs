use thiserror::Error;

#[derive(Error, Debug)]
pub enum UboError {
    #[error("Path not addressable [{path}]: {reason}")]
    PathNotAddressable { path: String, reason: String },
    #[error("Duplicate key: {id}")]
    DuplicateKey { id: String },
    #[error("Mapping inconsistency: {0}")]
    MappingInconsistency(String),
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Cannot convert {what}: {reason}")]
    Conversion { what: String, reason: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, UboError>;

impl UboError {
    pub fn path(path: &str, reason: impl Into<String>) -> Self {
        Self::PathNotAddressable {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for UboError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<serde_json::Error> for UboError {
    fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}
impl From<config::ConfigError> for UboError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
