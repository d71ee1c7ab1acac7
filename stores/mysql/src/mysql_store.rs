use std::time::Duration;

use anyhow::{ anyhow, Result };
use async_trait::async_trait;
use catalog_common::{
	config::RelationalConfig,
	models::{ ColumnInfo, Product, ProductInput, TableDiagnosis },
	pool::QueryGate,
	store::{ sample_insert_statement, RelationalStore, PRODUCTS_TABLE, SAMPLE_CATALOG },
};
use chrono::{ DateTime, Utc };
use rust_decimal::Decimal;
use sqlx::{
	mysql::{ MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlQueryResult, MySqlRow },
	query::Query,
	MySql,
	MySqlPool,
	Row,
};
use tracing::{ debug, error, info };

const CREATE_TABLE: &str =
	"CREATE TABLE products (
        id INT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(100) NOT NULL,
        price DECIMAL(10,2) NOT NULL,
        stock INT NOT NULL DEFAULT 0,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NULL
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

const DROP_TABLE: &str = "DROP TABLE IF EXISTS products";

const SELECT_ALL: &str =
	"SELECT id, name, price, stock, created_at, updated_at FROM products
     ORDER BY created_at DESC, id DESC";

const SELECT_ONE: &str =
	"SELECT id, name, price, stock, created_at, updated_at FROM products WHERE id = ?";

const INSERT_PRODUCT: &str =
	"INSERT INTO products (name, price, stock, created_at) VALUES (?, ?, ?, NOW())";

const UPDATE_PRODUCT: &str =
	"UPDATE products SET name = ?, price = ?, stock = ?, updated_at = NOW() WHERE id = ?";

const DELETE_PRODUCT: &str = "DELETE FROM products WHERE id = ?";

const COUNT_PRODUCTS: &str = "SELECT COUNT(*) FROM products";

const CURRENT_SCHEMA: &str = "SELECT CAST(DATABASE() AS CHAR)";

const TABLE_EXISTS: &str =
	"SELECT COUNT(*) FROM information_schema.TABLES
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";

const DESCRIBE_TABLE: &str =
	"SELECT CAST(COLUMN_NAME AS CHAR) AS field,
            CAST(COLUMN_TYPE AS CHAR) AS column_type,
            CAST(IS_NULLABLE AS CHAR) AS nullable,
            CAST(COLUMN_KEY AS CHAR) AS column_key,
            CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
            CAST(EXTRA AS CHAR) AS extra
     FROM information_schema.COLUMNS
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
     ORDER BY ORDINAL_POSITION";

/// Positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
	Int(i64),
	Decimal(Decimal),
	Text(String),
	Timestamp(DateTime<Utc>),
}

fn bind_params<'q>(
	mut query: Query<'q, MySql, MySqlArguments>,
	params: &'q [SqlParam]
) -> Query<'q, MySql, MySqlArguments> {
	for param in params {
		query = match param {
			SqlParam::Int(value) => query.bind(*value),
			SqlParam::Decimal(value) => query.bind(*value),
			SqlParam::Text(value) => query.bind(value.as_str()),
			SqlParam::Timestamp(value) => query.bind(*value),
		};
	}
	query
}

pub struct MySqlStore {
	pool: MySqlPool,
	gate: QueryGate,
	database: String,
}

impl MySqlStore {
	/// Build the pool without opening a connection. The first query connects.
	pub fn connect_lazy(config: &RelationalConfig) -> Self {
		let pool = MySqlPoolOptions::new()
			.max_connections(config.pool.capacity.max(1))
			.acquire_timeout(Duration::from_secs(10))
			.connect_lazy_with(connect_options(config));

		info!(
			host = %config.host,
			port = config.port,
			capacity = config.pool.capacity,
			queue_limit = config.pool.queue_limit,
			"MySQL pool configured"
		);

		Self {
			pool,
			gate: QueryGate::new(config.pool),
			database: config.database.clone(),
		}
	}

	/// Run a statement that returns no rows. The pooled connection goes back
	/// to the pool when this returns, on success or failure.
	pub async fn execute_query(&self, statement: &str, params: &[SqlParam]) -> Result<MySqlQueryResult> {
		let _permit = self.gate.enter()?;
		debug!(statement, params = ?params, "executing query");

		let mut conn = self.pool.acquire().await.map_err(|e| query_failed(statement, params, e))?;
		let result = bind_params(sqlx::query(statement), params)
			.execute(&mut *conn).await
			.map_err(|e| query_failed(statement, params, e))?;

		debug!(rows_affected = result.rows_affected(), "query executed");
		Ok(result)
	}

	/// Run a statement and collect every row.
	pub async fn fetch_query(&self, statement: &str, params: &[SqlParam]) -> Result<Vec<MySqlRow>> {
		let _permit = self.gate.enter()?;
		debug!(statement, params = ?params, "fetching rows");

		let mut conn = self.pool.acquire().await.map_err(|e| query_failed(statement, params, e))?;
		let rows = bind_params(sqlx::query(statement), params)
			.fetch_all(&mut *conn).await
			.map_err(|e| query_failed(statement, params, e))?;

		debug!(rows = rows.len(), "rows fetched");
		Ok(rows)
	}

	async fn fetch_count(&self, statement: &str, params: &[SqlParam]) -> Result<i64> {
		let rows = self.fetch_query(statement, params).await?;
		let row = rows.first().ok_or_else(|| anyhow!("count query returned no rows"))?;
		Ok(row.try_get(0)?)
	}

	async fn drop_table(&self) {
		match self.execute_query(DROP_TABLE, &[]).await {
			Ok(_) => info!("products table dropped (if it existed)"),
			Err(e) => info!(error = %e, "could not drop products table, continuing"),
		}
	}
}

fn connect_options(config: &RelationalConfig) -> MySqlConnectOptions {
	let options = MySqlConnectOptions::new()
		.host(&config.host)
		.port(config.port)
		.username(&config.user)
		.database(&config.database)
		.charset("utf8mb4");

	match &config.password {
		Some(password) => options.password(password),
		None => options,
	}
}

fn query_failed(statement: &str, params: &[SqlParam], err: sqlx::Error) -> anyhow::Error {
	let code = err
		.as_database_error()
		.and_then(|db_error| db_error.code().map(|code| code.into_owned()));

	error!(statement, params = ?params, code = ?code, error = %err, "query failed");
	anyhow::Error::new(err)
}

fn product_from_row(row: &MySqlRow) -> Result<Product, sqlx::Error> {
	let id: i32 = row.try_get("id")?;

	Ok(Product {
		id: i64::from(id),
		name: row.try_get("name")?,
		price: row.try_get("price")?,
		stock: row.try_get("stock")?,
		created_at: row.try_get("created_at")?,
		updated_at: row.try_get("updated_at")?,
	})
}

fn column_from_row(row: &MySqlRow) -> Result<ColumnInfo, sqlx::Error> {
	Ok(ColumnInfo {
		field: row.try_get("field")?,
		column_type: row.try_get("column_type")?,
		nullable: row.try_get("nullable")?,
		key: row.try_get("column_key")?,
		default: row.try_get("column_default")?,
		extra: row.try_get("extra")?,
	})
}

fn product_params(input: &ProductInput) -> Vec<SqlParam> {
	vec![
		SqlParam::Text(input.name.clone()),
		SqlParam::Decimal(input.price),
		SqlParam::Int(i64::from(input.stock))
	]
}

fn sample_params(created_at: DateTime<Utc>) -> Vec<SqlParam> {
	SAMPLE_CATALOG.iter()
		.flat_map(|sample| {
			[
				SqlParam::Text(sample.name.to_string()),
				SqlParam::Decimal(sample.price()),
				SqlParam::Int(i64::from(sample.stock)),
				SqlParam::Timestamp(created_at),
			]
		})
		.collect()
}

#[async_trait]
impl RelationalStore for MySqlStore {
	fn database_name(&self) -> String {
		"MySQL".to_string()
	}

	async fn ping(&self) -> Result<String> {
		let rows = self.fetch_query(CURRENT_SCHEMA, &[]).await?;
		let schema: Option<String> = match rows.first() {
			Some(row) => row.try_get(0)?,
			None => None,
		};

		Ok(schema.unwrap_or_else(|| self.database.clone()))
	}

	async fn init(&self) -> Result<()> {
		self.drop_table().await;
		self.execute_query(CREATE_TABLE, &[]).await?;
		info!("products table created with AUTO_INCREMENT");
		Ok(())
	}

	async fn reseed(&self) -> Result<i64> {
		self.drop_table().await;
		self.execute_query(CREATE_TABLE, &[]).await?;

		let params = sample_params(Utc::now());
		self.execute_query(&sample_insert_statement(), &params).await?;

		let count = self.fetch_count(COUNT_PRODUCTS, &[]).await?;
		info!(count, "sample catalog inserted");
		Ok(count)
	}

	async fn diagnose(&self) -> Result<TableDiagnosis> {
		let table = [SqlParam::Text(PRODUCTS_TABLE.to_string())];

		if self.fetch_count(TABLE_EXISTS, &table).await? == 0 {
			return Ok(TableDiagnosis::Missing);
		}

		let columns = self
			.fetch_query(DESCRIBE_TABLE, &table).await?
			.iter()
			.map(column_from_row)
			.collect::<Result<Vec<_>, _>>()?;

		Ok(TableDiagnosis::Present { columns })
	}

	async fn list_products(&self) -> Result<Vec<Product>> {
		let rows = self.fetch_query(SELECT_ALL, &[]).await?;
		Ok(rows.iter().map(product_from_row).collect::<Result<Vec<_>, _>>()?)
	}

	async fn create_product(&self, input: &ProductInput) -> Result<i64> {
		let result = self.execute_query(INSERT_PRODUCT, &product_params(input)).await?;
		Ok(i64::try_from(result.last_insert_id())?)
	}

	async fn get_product(&self, id: i64) -> Result<Option<Product>> {
		let rows = self.fetch_query(SELECT_ONE, &[SqlParam::Int(id)]).await?;
		Ok(rows.first().map(product_from_row).transpose()?)
	}

	async fn update_product(&self, id: i64, input: &ProductInput) -> Result<u64> {
		let mut params = product_params(input);
		params.push(SqlParam::Int(id));

		let result = self.execute_query(UPDATE_PRODUCT, &params).await?;
		Ok(result.rows_affected())
	}

	async fn delete_product(&self, id: i64) -> Result<u64> {
		let result = self.execute_query(DELETE_PRODUCT, &[SqlParam::Int(id)]).await?;
		Ok(result.rows_affected())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use catalog_common::pool::PoolLimits;

	fn config() -> RelationalConfig {
		RelationalConfig {
			host: std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
			port: 3306,
			user: std::env::var("DB_USER").unwrap_or_else(|_| "root".to_string()),
			password: std::env::var("DB_PASSWORD").ok(),
			database: std::env::var("DB_NAME").unwrap_or_else(|_| "catalog_test".to_string()),
			pool: PoolLimits::default(),
		}
	}

	#[test]
	fn sample_params_line_up_with_the_insert_statement() {
		let created_at = Utc::now();
		let params = sample_params(created_at);

		assert_eq!(params.len(), sample_insert_statement().matches('?').count());
		assert_eq!(params[0], SqlParam::Text("Laptop Dell XPS 13".to_string()));
		assert_eq!(params[1], SqlParam::Decimal(Decimal::new(129999, 2)));
		assert_eq!(params[2], SqlParam::Int(15));
		assert_eq!(params[3], SqlParam::Timestamp(created_at));
	}

	#[test]
	fn product_params_follow_column_order() {
		let input = ProductInput {
			name: "Chair".to_string(),
			price: Decimal::new(4999, 2),
			stock: 3,
		};

		assert_eq!(product_params(&input), vec![
			SqlParam::Text("Chair".to_string()),
			SqlParam::Decimal(Decimal::new(4999, 2)),
			SqlParam::Int(3)
		]);
		assert_eq!(INSERT_PRODUCT.matches('?').count(), 3);
		assert_eq!(UPDATE_PRODUCT.matches('?').count(), 4);
	}

	#[tokio::test]
	async fn lazy_pool_does_not_connect_up_front() {
		let mut config = config();
		config.host = "127.0.0.1".to_string();
		config.port = 1;

		let store = MySqlStore::connect_lazy(&config);

		assert_eq!(store.database_name(), "MySQL");
		assert!(store.ping().await.is_err());
	}

	#[tokio::test]
	#[ignore = "requires database"]
	async fn crud_against_a_live_server() {
		let store = MySqlStore::connect_lazy(&config());
		store.init().await.unwrap();

		let input = ProductInput {
			name: "Desk Lamp".to_string(),
			price: Decimal::new(2450, 2),
			stock: 0,
		};
		let id = store.create_product(&input).await.unwrap();
		let product = store.get_product(id).await.unwrap().unwrap();
		assert_eq!(product.price, Decimal::new(2450, 2));

		assert_eq!(store.delete_product(id).await.unwrap(), 1);
		assert!(store.get_product(id).await.unwrap().is_none());
	}

	#[tokio::test]
	#[ignore = "requires database"]
	async fn reseed_and_diagnose_against_a_live_server() {
		let store = MySqlStore::connect_lazy(&config());

		assert_eq!(store.reseed().await.unwrap(), 10);
		assert_eq!(store.list_products().await.unwrap()[0].id, 10);

		let TableDiagnosis::Present { columns } = store.diagnose().await.unwrap() else {
			panic!("products table should exist");
		};
		assert!(columns.iter().any(|c| c.field == "id" && c.is_auto_increment()));
	}
}
