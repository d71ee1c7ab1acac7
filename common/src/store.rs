use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{ Product, ProductInput, TableDiagnosis };

/// Name of the relational structure holding products.
pub const PRODUCTS_TABLE: &str = "products";

#[async_trait]
pub trait RelationalStore: Send + Sync + 'static {
	/// Database name, for logs and status output
	fn database_name(&self) -> String;

	/// Check that a connection can be acquired; returns the connected schema name
	async fn ping(&self) -> Result<String>;

	/// Drop the products structure if present and create it empty
	async fn init(&self) -> Result<()>;

	/// Drop, recreate and fill with the sample catalog; returns the row count.
	/// The steps run without a surrounding transaction.
	async fn reseed(&self) -> Result<i64>;

	/// Inspect the products structure
	async fn diagnose(&self) -> Result<TableDiagnosis>;

	/// All products, newest first
	async fn list_products(&self) -> Result<Vec<Product>>;

	/// Insert a product and return its assigned id
	async fn create_product(&self, input: &ProductInput) -> Result<i64>;

	/// Fetch one product
	async fn get_product(&self, id: i64) -> Result<Option<Product>>;

	/// Rewrite name, price and stock and stamp the update time; returns the
	/// number of rows changed
	async fn update_product(&self, id: i64, input: &ProductInput) -> Result<u64>;

	/// Remove a product; returns the number of rows removed
	async fn delete_product(&self, id: i64) -> Result<u64>;
}

/// Entry of the fixed sample catalog used by re-seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleProduct {
	pub name: &'static str,
	pub price_cents: i64,
	pub stock: i32,
}

impl SampleProduct {
	pub fn price(&self) -> Decimal {
		Decimal::new(self.price_cents, 2)
	}
}

pub const SAMPLE_CATALOG: [SampleProduct; 10] = [
	SampleProduct { name: "Laptop Dell XPS 13", price_cents: 129999, stock: 15 },
	SampleProduct { name: "iPhone 15 Pro", price_cents: 99999, stock: 25 },
	SampleProduct { name: "Samsung Galaxy S24", price_cents: 89999, stock: 20 },
	SampleProduct { name: "PlayStation 5", price_cents: 49999, stock: 10 },
	SampleProduct { name: "Sony WH-1000XM5 Headphones", price_cents: 39999, stock: 30 },
	SampleProduct { name: "LG OLED 55\" Smart TV", price_cents: 129999, stock: 8 },
	SampleProduct { name: "iPad Pro Tablet", price_cents: 109999, stock: 12 },
	SampleProduct { name: "Canon EOS R5 Camera", price_cents: 389999, stock: 5 },
	SampleProduct { name: "Apple Watch Series 9", price_cents: 39999, stock: 18 },
	SampleProduct { name: "Nintendo Switch OLED", price_cents: 34999, stock: 22 },
];

/// Single multi-row insert for the whole sample catalog, with four `?`
/// placeholders per row: name, price, stock, created_at.
pub fn sample_insert_statement() -> String {
	let rows = vec!["(?, ?, ?, ?)"; SAMPLE_CATALOG.len()].join(", ");
	format!("INSERT INTO {} (name, price, stock, created_at) VALUES {}", PRODUCTS_TABLE, rows)
}

/// Parse a product id taken from a URL. Anything that is not an integer
/// cannot match a row.
pub fn parse_product_id(raw: &str) -> Option<i64> {
	raw.trim().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sample_catalog_prices_have_two_decimals() {
		for sample in SAMPLE_CATALOG {
			assert_eq!(sample.price().scale(), 2);
			assert!(sample.stock >= 0);
		}
		assert_eq!(SAMPLE_CATALOG[7].price(), Decimal::new(389999, 2));
	}

	#[test]
	fn sample_insert_has_a_placeholder_per_value() {
		let statement = sample_insert_statement();
		assert!(statement.starts_with("INSERT INTO products (name, price, stock, created_at) VALUES"));
		assert_eq!(statement.matches('?').count(), SAMPLE_CATALOG.len() * 4);
	}

	#[test]
	fn product_ids_must_be_integers() {
		assert_eq!(parse_product_id("17"), Some(17));
		assert_eq!(parse_product_id(" 3 "), Some(3));
		assert_eq!(parse_product_id("abc"), None);
		assert_eq!(parse_product_id("1.5"), None);
	}
}
