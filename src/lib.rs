//! Ubostore – a storage-agnostic persistence layer for universal business objects.
//!
//! Applications describe every persisted entity with one shape, the
//! *universal business object*:
//! * An identifier, trimmed and lower-cased so lookups are case-insensitive.
//! * A JSON document holding the entity's free-form data, addressed by dotted
//!   and indexed paths such as `profile.addresses[1].city`.
//! * A few promoted *extra attributes* that a backend can index on.
//! * A checksum over the content, plus creation and update timestamps.
//!
//! Records know when they have been mutated. Synchronizing a dirty record
//! stamps the update time, recomputes the checksum and re-encodes the
//! document; every DAO write synchronizes before it encodes the record, so a
//! stored checksum always reflects the stored content.
//!
//! ## Modules
//! * [`record`] – The [`record::UniversalRecord`] and its exported form.
//! * [`path`] – Parsing and evaluation of document paths (grammar in `path.pest`).
//! * [`checksum`] – Canonical encoding and the content checksum.
//! * [`dao`] – The [`dao::UniversalDao`] contract with filter and sort options.
//! * [`persist`] – The relational adapter on SQLite and its column mapping.
//! * [`schema`] – Table and index statements for the supported SQL flavors.
//! * [`memory`] – An in-process key-value adapter with simulated unique indexes.
//! * [`settings`] – File and environment settings for declared collections.
//!
//! ## Quick Start
//! ```
//! use rusqlite::Connection;
//! use ubostore::{persist::{share, ColumnMapping, SqlDao}, schema::{init_table, ColumnDef, Flavor}};
//! use ubostore::{UniversalDao, UniversalRecord};
//!
//! let conn = Connection::open_in_memory().unwrap();
//! init_table(&conn, Flavor::Sqlite, "users", &[ColumnDef::new("zrole", "VARCHAR(32)")]).unwrap();
//! let mapping = ColumnMapping::from_pairs([("zrole".to_string(), "role".to_string())]).unwrap();
//! let dao = SqlDao::new(share(conn), Flavor::Sqlite, "users", mapping).unwrap();
//!
//! let user = UniversalRecord::new(" U1 ", 7);
//! user.set_data_attr("profile.age", 30).unwrap();
//! user.set_extra_attr("role", "admin");
//! assert!(dao.create(&user).unwrap());
//!
//! let loaded = dao.get("u1").unwrap().unwrap();
//! assert_eq!(loaded.data_attr_as::<i64>("profile.age").unwrap(), Some(30));
//! assert_eq!(loaded.checksum(), user.checksum());
//! ```

pub mod checksum;
pub mod dao;
pub mod error;
pub mod memory;
pub mod path;
pub mod persist;
pub mod record;
pub mod schema;
pub mod settings;

pub use dao::{Comparison, FilterOpt, SortOrder, SortingOpt, UniversalDao};
pub use error::{Result, UboError};
pub use record::{RecordExport, UniversalRecord};
