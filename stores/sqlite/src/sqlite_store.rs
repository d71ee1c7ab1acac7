use std::fmt::Debug;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use anyhow::{ Context, Result };
use async_trait::async_trait;
use catalog_common::{
	models::{ ColumnInfo, Product, ProductInput, TableDiagnosis },
	pool::{ PoolLimits, QueryGate },
	store::{ sample_insert_statement, RelationalStore, SampleProduct, PRODUCTS_TABLE, SAMPLE_CATALOG },
};
use chrono::{ DateTime, Utc };
use rusqlite::{ params, types::ToSql, OptionalExtension };
use rust_decimal::{ prelude::ToPrimitive, Decimal };
use tokio_rusqlite::Connection as AsyncConnection;
use tracing::{ debug, error, info };

const CREATE_TABLE: &str =
	"CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name VARCHAR(100) NOT NULL,
        price DECIMAL(10,2) NOT NULL,
        stock INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT
    )";

const DROP_TABLE: &str = "DROP TABLE IF EXISTS products";

const SELECT_ALL: &str =
	"SELECT id, name, price, stock, created_at, updated_at FROM products
     ORDER BY created_at DESC, id DESC";

const SELECT_ONE: &str =
	"SELECT id, name, price, stock, created_at, updated_at FROM products WHERE id = ?1";

const INSERT_PRODUCT: &str =
	"INSERT INTO products (name, price, stock, created_at) VALUES (?1, ?2, ?3, ?4)";

const UPDATE_PRODUCT: &str =
	"UPDATE products SET name = ?1, price = ?2, stock = ?3, updated_at = ?4 WHERE id = ?5";

const DELETE_PRODUCT: &str = "DELETE FROM products WHERE id = ?1";

const COUNT_PRODUCTS: &str = "SELECT COUNT(*) FROM products";

pub struct SqliteStore {
	conn: AsyncConnection,
	gate: QueryGate,
	location: String,
}

impl SqliteStore {
	/// Open (or create) a database file and make sure the products table
	/// exists.
	pub async fn open(path: &Path, limits: PoolLimits) -> Result<Self> {
		// Create data directory if it doesn't exist
		if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
			if !dir.exists() {
				std::fs::create_dir_all(dir).with_context(||
					format!("failed to create {}", dir.display())
				)?;
			}
		}

		let conn = AsyncConnection::open(PathBuf::from(path)).await.with_context(||
			format!("failed to open {}", path.display())
		)?;

		conn.call(|conn| {
			conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
			conn.pragma_update(None, "synchronous", "NORMAL")?;
			conn.busy_timeout(Duration::from_secs(5))?;
			Ok(())
		}).await?;

		Self::with_connection(conn, limits, path.display().to_string()).await
	}

	/// Private in-memory database, gone when the store is dropped.
	pub async fn open_in_memory(limits: PoolLimits) -> Result<Self> {
		let conn = AsyncConnection::open_in_memory().await?;
		Self::with_connection(conn, limits, ":memory:".to_string()).await
	}

	async fn with_connection(conn: AsyncConnection, limits: PoolLimits, location: String) -> Result<Self> {
		let store = Self {
			conn,
			gate: QueryGate::new(limits),
			location,
		};

		store.run(CREATE_TABLE, (), |conn| {
			conn.execute(CREATE_TABLE, [])?;
			Ok(())
		}).await?;

		info!(location = %store.location, "SQLite store ready");
		Ok(store)
	}

	// Execute one unit of work on the connection thread. Failures are logged
	// with the statement and parameters, then returned unchanged.
	async fn run<F, R, P>(&self, statement: &'static str, params: P, work: F) -> Result<R>
		where
			F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
			R: Send + 'static,
			P: Debug
	{
		let _permit = self.gate.enter()?;
		debug!(statement, params = ?params, "executing query");

		match self.conn.call(work).await {
			Ok(result) => Ok(result),
			Err(e) => {
				error!(
					statement,
					params = ?params,
					code = ?error_code(&e),
					error = %e,
					"query failed"
				);
				Err(anyhow::Error::from(e))
			}
		}
	}

	async fn drop_table(&self) {
		let dropped = self.run(DROP_TABLE, (), |conn| {
			conn.execute(DROP_TABLE, [])?;
			Ok(())
		}).await;

		match dropped {
			Ok(()) => info!("products table dropped (if it existed)"),
			Err(e) => info!(error = %e, "could not drop products table, continuing"),
		}
	}

	async fn create_table(&self) -> Result<()> {
		self.run(CREATE_TABLE, (), |conn| {
			conn.execute(CREATE_TABLE, [])?;
			Ok(())
		}).await
	}
}

fn error_code(err: &tokio_rusqlite::Error) -> Option<String> {
	match err {
		tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, _)) => {
			Some(format!("{:?} ({})", failure.code, failure.extended_code))
		}
		_ => None,
	}
}

fn price_from_real(price: f64) -> Decimal {
	Decimal::try_from(price).unwrap_or_default().round_dp(2)
}

fn price_to_real(price: &Decimal) -> f64 {
	price.to_f64().unwrap_or_default()
}

fn product_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
	Ok(Product {
		id: row.get(0)?,
		name: row.get(1)?,
		price: price_from_real(row.get(2)?),
		stock: row.get(3)?,
		created_at: row.get(4)?,
		updated_at: row.get(5)?,
	})
}

#[async_trait]
impl RelationalStore for SqliteStore {
	fn database_name(&self) -> String {
		"SQLite".to_string()
	}

	async fn ping(&self) -> Result<String> {
		let version: String = self.run("SELECT sqlite_version()", (), |conn| {
			Ok(conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?)
		}).await?;

		Ok(format!("{} (SQLite {})", self.location, version))
	}

	async fn init(&self) -> Result<()> {
		self.drop_table().await;
		self.create_table().await?;
		info!("products table created");
		Ok(())
	}

	async fn reseed(&self) -> Result<i64> {
		self.drop_table().await;
		self.create_table().await?;

		let created_at = Utc::now();
		self.run("INSERT sample catalog", SAMPLE_CATALOG.len(), move |conn| {
			let catalog: &'static [SampleProduct] = &SAMPLE_CATALOG;
			let prices: Vec<f64> = catalog
				.iter()
				.map(|sample| price_to_real(&sample.price()))
				.collect();

			let mut values: Vec<&dyn ToSql> = Vec::with_capacity(catalog.len() * 4);
			for (sample, price) in catalog.iter().zip(&prices) {
				values.push(&sample.name);
				values.push(price);
				values.push(&sample.stock);
				values.push(&created_at);
			}

			conn.execute(&sample_insert_statement(), values.as_slice())?;
			Ok(())
		}).await?;

		let count: i64 = self.run(COUNT_PRODUCTS, (), |conn| {
			Ok(conn.query_row(COUNT_PRODUCTS, [], |row| row.get(0))?)
		}).await?;

		info!(count, "sample catalog inserted");
		Ok(count)
	}

	async fn diagnose(&self) -> Result<TableDiagnosis> {
		self.run("PRAGMA table_info(products)", PRODUCTS_TABLE, |conn| {
			let definition: Option<String> = conn
				.query_row(
					"SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
					[PRODUCTS_TABLE],
					|row| row.get(0)
				)
				.optional()?;

			let Some(definition) = definition else {
				return Ok(TableDiagnosis::Missing);
			};
			let autoincrement = definition.to_ascii_uppercase().contains("AUTOINCREMENT");

			let mut stmt = conn.prepare("PRAGMA table_info(products)")?;
			let columns = stmt
				.query_map([], |row| {
					let not_null: i64 = row.get(3)?;
					let primary_key = row.get::<_, i64>(5)? > 0;

					Ok(ColumnInfo {
						field: row.get(1)?,
						column_type: row.get(2)?,
						nullable: (if not_null == 0 && !primary_key { "YES" } else { "NO" }).to_string(),
						key: (if primary_key { "PRI" } else { "" }).to_string(),
						default: row.get(4)?,
						extra: (if primary_key && autoincrement { "auto_increment" } else { "" }).to_string(),
					})
				})?
				.collect::<Result<Vec<_>, _>>()?;

			Ok(TableDiagnosis::Present { columns })
		}).await
	}

	async fn list_products(&self) -> Result<Vec<Product>> {
		self.run(SELECT_ALL, (), |conn| {
			let mut stmt = conn.prepare(SELECT_ALL)?;
			let products = stmt.query_map([], product_from_row)?.collect::<Result<Vec<_>, _>>()?;
			Ok(products)
		}).await
	}

	async fn create_product(&self, input: &ProductInput) -> Result<i64> {
		let name = input.name.clone();
		let price = price_to_real(&input.price);
		let stock = input.stock;
		let created_at: DateTime<Utc> = Utc::now();

		self.run(INSERT_PRODUCT, (name.clone(), price, stock), move |conn| {
			conn.execute(INSERT_PRODUCT, params![name, price, stock, created_at])?;
			Ok(conn.last_insert_rowid())
		}).await
	}

	async fn get_product(&self, id: i64) -> Result<Option<Product>> {
		self.run(SELECT_ONE, id, move |conn| {
			Ok(conn.query_row(SELECT_ONE, [id], product_from_row).optional()?)
		}).await
	}

	async fn update_product(&self, id: i64, input: &ProductInput) -> Result<u64> {
		let name = input.name.clone();
		let price = price_to_real(&input.price);
		let stock = input.stock;
		let updated_at = Utc::now();

		let changed = self.run(UPDATE_PRODUCT, (name.clone(), price, stock, id), move |conn| {
			Ok(conn.execute(UPDATE_PRODUCT, params![name, price, stock, updated_at, id])?)
		}).await?;

		Ok(changed as u64)
	}

	async fn delete_product(&self, id: i64) -> Result<u64> {
		let removed = self.run(DELETE_PRODUCT, id, move |conn| {
			Ok(conn.execute(DELETE_PRODUCT, [id])?)
		}).await?;

		Ok(removed as u64)
	}
}
