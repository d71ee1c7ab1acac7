use chrono::{ DateTime, Utc };
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{ Deserialize, Serialize };
use serde_json::Value;

use crate::error::ValidationError;

/// Longest product name the relational schema accepts.
pub const MAX_NAME_LEN: usize = 100;

/// Largest price a `DECIMAL(10,2)` column holds, in cents.
pub const MAX_PRICE_CENTS: i64 = 9_999_999_999;

/// Label used for document products stored without a name.
pub const UNNAMED_PRODUCT: &str = "Unnamed";

/// Product row as held by the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
	pub id: i64,
	pub name: String,
	#[serde(with = "rust_decimal::serde::float")]
	pub price: Decimal,
	pub stock: i32,
	pub created_at: DateTime<Utc>,
	pub updated_at: Option<DateTime<Utc>>,
}

/// Product as returned from the document store, with defaults filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentProduct {
	pub id: String,
	pub name: String,
	pub price: f64,
	pub stock: i64,
	pub created_at: DateTime<Utc>,
}

/// Raw document fields as read from the store. Every field may be absent
/// because the collection is schema-less.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredDocument {
	pub id: Option<String>,
	/// Creation time embedded in the store-assigned id, when it has one.
	pub id_timestamp: Option<DateTime<Utc>>,
	pub name: Option<String>,
	pub price: Option<f64>,
	pub stock: Option<i64>,
	pub created_at: Option<DateTime<Utc>>,
}

impl StoredDocument {
	/// Fill missing fields with defaults. `now` is only used when neither the
	/// document nor its id carry a creation time.
	pub fn into_product(self, now: DateTime<Utc>) -> DocumentProduct {
		DocumentProduct {
			id: self.id.unwrap_or_else(|| "N/A".to_string()),
			name: self.name
				.filter(|name| !name.is_empty())
				.unwrap_or_else(|| UNNAMED_PRODUCT.to_string()),
			price: self.price.filter(|price| price.is_finite()).unwrap_or(0.0),
			stock: self.stock.unwrap_or(0),
			created_at: self.created_at.or(self.id_timestamp).unwrap_or(now),
		}
	}
}

/// Document about to be inserted. The creation time is stamped here, not by
/// the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDocumentProduct {
	pub name: String,
	pub price: f64,
	pub stock: i64,
	pub created_at: DateTime<Utc>,
}

impl NewDocumentProduct {
	pub fn stamped(input: &ProductInput, created_at: DateTime<Utc>) -> Self {
		Self {
			name: input.name.clone(),
			price: input.price_f64(),
			stock: i64::from(input.stock),
			created_at,
		}
	}
}

/// Request body for product writes, before validation. Fields stay loosely
/// typed so that numeric strings are accepted and bad values can be reported
/// per field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductPayload {
	#[serde(default)]
	pub name: Option<Value>,
	#[serde(default)]
	pub price: Option<Value>,
	#[serde(default)]
	pub stock: Option<Value>,
}

/// Validated product fields, shared by both stores.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductInput {
	pub name: String,
	pub price: Decimal,
	pub stock: i32,
}

impl ProductInput {
	pub fn from_payload(payload: &ProductPayload) -> Result<Self, ValidationError> {
		let name = parse_name(payload.name.as_ref())?;
		let price = parse_price(payload.price.as_ref())?;
		let stock = parse_stock(payload.stock.as_ref())?;

		Ok(Self { name, price, stock })
	}

	pub fn price_f64(&self) -> f64 {
		self.price.to_f64().unwrap_or(0.0)
	}
}

fn parse_name(value: Option<&Value>) -> Result<String, ValidationError> {
	let name = match value {
		Some(Value::String(name)) => name.trim(),
		_ => {
			return Err(ValidationError::MissingName);
		}
	};

	if name.is_empty() {
		return Err(ValidationError::MissingName);
	}
	if name.chars().count() > MAX_NAME_LEN {
		return Err(ValidationError::NameTooLong { max: MAX_NAME_LEN });
	}

	Ok(name.to_string())
}

fn parse_price(value: Option<&Value>) -> Result<Decimal, ValidationError> {
	let price = value.and_then(number_from_value).ok_or(ValidationError::InvalidPrice)?;

	if price < 0.0 {
		return Err(ValidationError::NegativePrice);
	}

	let max = Decimal::new(MAX_PRICE_CENTS, 2);
	let price = Decimal::try_from(price)
		.map(|price| price.round_dp(2))
		.map_err(|_| ValidationError::PriceTooLarge { max })?;

	if price > max {
		return Err(ValidationError::PriceTooLarge { max });
	}

	Ok(price)
}

// Absent or non-numeric stock falls back to zero; fractions truncate.
fn parse_stock(value: Option<&Value>) -> Result<i32, ValidationError> {
	let stock = match value.and_then(number_from_value) {
		Some(stock) => stock.trunc(),
		None => {
			return Ok(0);
		}
	};

	if stock < 0.0 {
		return Err(ValidationError::NegativeStock);
	}

	if stock > f64::from(i32::MAX) {
		return Err(ValidationError::StockOutOfRange { max: i32::MAX });
	}

	Ok(stock as i32)
}

fn number_from_value(value: &Value) -> Option<f64> {
	let number = match value {
		Value::Number(number) => number.as_f64(),
		Value::String(text) => text.trim().parse::<f64>().ok(),
		_ => None,
	}?;

	number.is_finite().then_some(number)
}

/// Column as reported by the relational diagnostics, shaped like a
/// `DESCRIBE` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
	#[serde(rename = "Field")]
	pub field: String,
	#[serde(rename = "Type")]
	pub column_type: String,
	#[serde(rename = "Null")]
	pub nullable: String,
	#[serde(rename = "Key")]
	pub key: String,
	#[serde(rename = "Default")]
	pub default: Option<String>,
	#[serde(rename = "Extra")]
	pub extra: String,
}

impl ColumnInfo {
	pub fn is_auto_increment(&self) -> bool {
		self.extra.to_ascii_lowercase().contains("auto_increment")
	}
}

/// Outcome of inspecting the relational `products` structure.
#[derive(Debug, Clone, PartialEq)]
pub enum TableDiagnosis {
	Missing,
	Present {
		columns: Vec<ColumnInfo>,
	},
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn payload(value: Value) -> ProductPayload {
		serde_json::from_value(value).unwrap()
	}

	#[test]
	fn stock_defaults_to_zero_when_absent_or_garbage() {
		let input = ProductInput::from_payload(
			&payload(json!({ "name": "Lamp", "price": 12.5 }))
		).unwrap();
		assert_eq!(input.stock, 0);

		let input = ProductInput::from_payload(
			&payload(json!({ "name": "Lamp", "price": 12.5, "stock": "lots" }))
		).unwrap();
		assert_eq!(input.stock, 0);
	}

	#[test]
	fn numeric_strings_are_accepted() {
		let input = ProductInput::from_payload(
			&payload(json!({ "name": "  Desk  ", "price": "199.999", "stock": "7.9" }))
		).unwrap();

		assert_eq!(input.name, "Desk");
		assert_eq!(input.price, Decimal::new(20000, 2));
		assert_eq!(input.stock, 7);
	}

	#[test]
	fn blank_name_is_rejected() {
		let err = ProductInput::from_payload(
			&payload(json!({ "name": "   ", "price": 1 }))
		).unwrap_err();
		assert_eq!(err, ValidationError::MissingName);
		assert_eq!(err.field(), "name");
	}

	#[test]
	fn overlong_name_is_rejected() {
		let name = "x".repeat(MAX_NAME_LEN + 1);
		let err = ProductInput::from_payload(
			&payload(json!({ "name": name, "price": 1 }))
		).unwrap_err();
		assert_eq!(err.field(), "name");
	}

	#[test]
	fn price_must_be_a_non_negative_number() {
		for bad in [json!(null), json!("abc"), json!([1]), json!(true)] {
			let err = ProductInput::from_payload(
				&payload(json!({ "name": "Chair", "price": bad }))
			).unwrap_err();
			assert_eq!(err, ValidationError::InvalidPrice);
		}

		let err = ProductInput::from_payload(
			&payload(json!({ "name": "Chair" }))
		).unwrap_err();
		assert_eq!(err.field(), "price");

		let err = ProductInput::from_payload(
			&payload(json!({ "name": "Chair", "price": -3 }))
		).unwrap_err();
		assert_eq!(err, ValidationError::NegativePrice);
	}

	#[test]
	fn price_must_fit_the_column() {
		let input = ProductInput::from_payload(
			&payload(json!({ "name": "Yacht", "price": 99_999_999.99 }))
		).unwrap();
		assert_eq!(input.price, Decimal::new(MAX_PRICE_CENTS, 2));

		for too_large in [json!(1e9), json!("100000000"), json!(1e300)] {
			let err = ProductInput::from_payload(
				&payload(json!({ "name": "Yacht", "price": too_large }))
			).unwrap_err();
			assert!(matches!(err, ValidationError::PriceTooLarge { .. }));
			assert_eq!(err.field(), "price");
		}
	}

	#[test]
	fn stock_beyond_integer_range_is_rejected() {
		let err = ProductInput::from_payload(
			&payload(json!({ "name": "Bolt", "price": 0.1, "stock": 3e9 }))
		).unwrap_err();
		assert_eq!(err, ValidationError::StockOutOfRange { max: i32::MAX });
		assert_eq!(err.field(), "stock");

		let input = ProductInput::from_payload(
			&payload(json!({ "name": "Bolt", "price": 0.1, "stock": i32::MAX }))
		).unwrap();
		assert_eq!(input.stock, i32::MAX);
	}

	#[test]
	fn stored_document_defaults() {
		let now = Utc::now();
		let id_time = now - chrono::Duration::hours(1);

		let product = (StoredDocument {
			id: Some("65f0c0ffee".to_string()),
			id_timestamp: Some(id_time),
			name: Some(String::new()),
			..Default::default()
		}).into_product(now);

		assert_eq!(product.id, "65f0c0ffee");
		assert_eq!(product.name, UNNAMED_PRODUCT);
		assert_eq!(product.price, 0.0);
		assert_eq!(product.stock, 0);
		assert_eq!(product.created_at, id_time);
	}

	#[test]
	fn product_price_serializes_as_number() {
		let product = Product {
			id: 1,
			name: "Phone".to_string(),
			price: Decimal::new(99999, 2),
			stock: 3,
			created_at: Utc::now(),
			updated_at: None,
		};

		let value = serde_json::to_value(&product).unwrap();
		assert_eq!(value["price"], json!(999.99));
		assert_eq!(value["updated_at"], Value::Null);
	}
}
