use anyhow::Result;

use catalog_common::{ config::AppConfig, server::run_server, telemetry::init_tracing };
use catalog_mongodb::MongoDriver;
use catalog_mysql::MySqlStore;

#[tokio::main]
async fn main() -> Result<()> {
	init_tracing()?;

	let config = AppConfig::from_env()?;
	tracing::info!(
		host = %config.relational.host,
		database = %config.relational.database,
		"Starting catalog server on MySQL"
	);

	// The pool connects lazily, so startup never waits on the database.
	let store = MySqlStore::connect_lazy(&config.relational);
	let driver = MongoDriver::new(&config.document);

	run_server(store, driver, config).await?;

	Ok(())
}
