//! Shared pieces of the product catalog service: models, validation, store
//! abstractions and the HTTP surface. Backend crates plug a relational store
//! and a document driver into [`server::run_server`].

pub mod admin;
pub mod api;
pub mod config;
pub mod document;
pub mod error;
pub mod models;
pub mod pool;
pub mod server;
pub mod store;
pub mod telemetry;

pub use config::{ AppConfig, Mode };
pub use document::{ DocumentCollection, DocumentDriver, DocumentStore };
pub use error::{ ApiError, StoreError, ValidationError };
pub use store::RelationalStore;
