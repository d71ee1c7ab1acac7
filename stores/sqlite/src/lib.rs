//! Embedded SQLite rendition of the relational product store, for local runs
//! and tests without a database server.

pub mod sqlite_store;

pub use sqlite_store::SqliteStore;
