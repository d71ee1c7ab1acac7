use anyhow::Result;

use catalog_common::{ config::AppConfig, server::run_server, telemetry::init_tracing };
use catalog_mongodb::MongoDriver;
use catalog_sqlite::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
	init_tracing()?;

	let config = AppConfig::from_env()?;
	tracing::info!(path = %config.sqlite_path.display(), "Starting catalog server on SQLite");

	let store = SqliteStore::open(&config.sqlite_path, config.relational.pool).await?;
	let driver = MongoDriver::new(&config.document);

	run_server(store, driver, config).await?;

	Ok(())
}
