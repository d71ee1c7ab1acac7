//! MySQL rendition of the relational product store. This is the backend the
//! production binary runs against.

pub mod mysql_store;

pub use mysql_store::{ MySqlStore, SqlParam };
