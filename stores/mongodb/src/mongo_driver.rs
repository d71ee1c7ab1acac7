use std::time::Duration;

use async_trait::async_trait;
use catalog_common::{
	config::DocumentConfig,
	models::{ NewDocumentProduct, StoredDocument },
	DocumentCollection,
	DocumentDriver,
	StoreError,
};
use chrono::{ DateTime, Utc };
use futures::TryStreamExt;
use mongodb::{
	bson::{ doc, Bson, DateTime as BsonDateTime, Document },
	error::{ Error as MongoError, ErrorKind },
	options::ClientOptions,
	Client,
	Collection,
};
use tracing::{ debug, info, warn };

const STORE: &str = "MongoDB";

// Fail fast when no server is listening instead of the driver's 30s default,
// unless the connection string sets its own timeout.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MongoDriver {
	url: String,
	database: String,
}

impl MongoDriver {
	pub fn new(config: &DocumentConfig) -> Self {
		Self {
			url: config.url.clone(),
			database: config.database.clone(),
		}
	}
}

// Failures that mean no server could be reached, as opposed to a reachable
// server rejecting the request.
fn is_unreachable(err: &MongoError) -> bool {
	matches!(
		err.kind.as_ref(),
		ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::DnsResolve { .. }
	)
}

fn classify(err: MongoError) -> StoreError {
	if is_unreachable(&err) {
		return StoreError::Unavailable {
			store: STORE,
			message: err.to_string(),
		};
	}

	match err.kind.as_ref() {
		ErrorKind::Command(command) =>
			StoreError::Operation {
				store: STORE,
				code: Some(format!("{} ({})", command.code, command.code_name)),
				message: command.message.clone(),
			},
		_ =>
			StoreError::Operation {
				store: STORE,
				code: None,
				message: err.to_string(),
			},
	}
}

// Connection-string problems are configuration errors, except SRV lookups
// that fail because DNS cannot be reached.
fn classify_setup(err: MongoError) -> StoreError {
	if is_unreachable(&err) {
		return classify(err);
	}

	StoreError::Config {
		store: STORE,
		message: err.to_string(),
	}
}

#[async_trait]
impl DocumentDriver for MongoDriver {
	type Client = Client;
	type Collection = MongoProducts;

	fn store_name(&self) -> &'static str {
		STORE
	}

	async fn connect(&self) -> Result<Client, StoreError> {
		let mut options = ClientOptions::parse(self.url.as_str()).await.map_err(classify_setup)?;
		options.server_selection_timeout.get_or_insert(SERVER_SELECTION_TIMEOUT);
		options.app_name = Some("catalog".to_string());

		let client = Client::with_options(options).map_err(classify_setup)?;

		self.ping(&client).await?;
		info!(database = %self.database, "connected to MongoDB");

		Ok(client)
	}

	async fn ping(&self, client: &Client) -> Result<(), StoreError> {
		client
			.database(&self.database)
			.run_command(doc! { "ping": 1 }).await
			.map(|_| ())
			.map_err(classify)
	}

	fn collection(&self, client: &Client, name: &str) -> MongoProducts {
		MongoProducts {
			inner: client.database(&self.database).collection::<Document>(name),
		}
	}

	async fn close(&self, client: Client) {
		client.shutdown().await;
		info!("MongoDB connection closed");
	}
}

/// Handle to the products collection.
#[derive(Clone)]
pub struct MongoProducts {
	inner: Collection<Document>,
}

#[async_trait]
impl DocumentCollection for MongoProducts {
	async fn find_all(&self) -> Result<Vec<StoredDocument>, StoreError> {
		let cursor = self.inner.find(doc! {}).await.map_err(classify)?;
		let documents: Vec<Document> = cursor.try_collect().await.map_err(classify)?;
		debug!(count = documents.len(), collection = %self.inner.name(), "documents fetched");

		Ok(documents.iter().map(stored_from_document).collect())
	}

	async fn insert_one(&self, product: &NewDocumentProduct) -> Result<String, StoreError> {
		let document = doc! {
			"name": product.name.clone(),
			"price": product.price,
			"stock": product.stock,
			"created_at": BsonDateTime::from_millis(product.created_at.timestamp_millis()),
		};

		let result = self.inner.insert_one(document).await.map_err(classify)?;

		Ok(match result.inserted_id {
			Bson::ObjectId(oid) => oid.to_hex(),
			other => {
				warn!(id = %other, "inserted id is not an ObjectId");
				other.to_string()
			}
		})
	}
}

fn from_bson_datetime(value: BsonDateTime) -> Option<DateTime<Utc>> {
	DateTime::from_timestamp_millis(value.timestamp_millis())
}

/// Read a raw document leniently. Numbers may arrive as any BSON numeric
/// type and timestamps as dates or RFC 3339 strings.
pub fn stored_from_document(document: &Document) -> StoredDocument {
	let (id, id_timestamp) = match document.get("_id") {
		Some(Bson::ObjectId(oid)) => (Some(oid.to_hex()), from_bson_datetime(oid.timestamp())),
		Some(Bson::String(id)) => (Some(id.clone()), None),
		Some(other) => (Some(other.to_string()), None),
		None => (None, None),
	};

	let name = match document.get("name") {
		Some(Bson::String(name)) => Some(name.clone()),
		_ => None,
	};

	let price = match document.get("price") {
		Some(Bson::Double(price)) => Some(*price),
		Some(Bson::Int32(price)) => Some(f64::from(*price)),
		Some(Bson::Int64(price)) => Some(*price as f64),
		Some(Bson::String(price)) => price.trim().parse().ok(),
		_ => None,
	};

	let stock = match document.get("stock") {
		Some(Bson::Int32(stock)) => Some(i64::from(*stock)),
		Some(Bson::Int64(stock)) => Some(*stock),
		Some(Bson::Double(stock)) if stock.is_finite() => Some(stock.trunc() as i64),
		_ => None,
	};

	let created_at = match document.get("created_at") {
		Some(Bson::DateTime(at)) => from_bson_datetime(*at),
		Some(Bson::String(at)) =>
			DateTime::parse_from_rfc3339(at)
				.ok()
				.map(|at| at.with_timezone(&Utc)),
		_ => None,
	};

	StoredDocument { id, id_timestamp, name, price, stock, created_at }
}

#[cfg(test)]
mod tests {
	use super::*;
	use mongodb::bson::oid::ObjectId;

	#[test]
	fn full_document_is_read_as_is() {
		let oid = ObjectId::new();
		let created = BsonDateTime::from_millis(1_700_000_000_000);
		let document = doc! {
			"_id": oid,
			"name": "Notebook",
			"price": 3.5,
			"stock": 7_i32,
			"created_at": created,
		};

		let stored = stored_from_document(&document);

		assert_eq!(stored.id, Some(oid.to_hex()));
		assert_eq!(stored.name.as_deref(), Some("Notebook"));
		assert_eq!(stored.price, Some(3.5));
		assert_eq!(stored.stock, Some(7));
		assert_eq!(stored.created_at.map(|at| at.timestamp_millis()), Some(1_700_000_000_000));
		assert!(stored.id_timestamp.is_some());
	}

	#[test]
	fn missing_fields_fall_back_to_defaults() {
		let oid = ObjectId::new();
		let stored = stored_from_document(&doc! { "_id": oid, "price": 12_i64 });
		let now = Utc::now();

		let product = stored.clone().into_product(now);

		assert_eq!(stored.price, Some(12.0));
		assert_eq!(product.name, "Unnamed");
		assert_eq!(product.stock, 0);
		// creation time comes from the id, which has second precision
		assert_eq!(
			product.created_at.timestamp(),
			oid.timestamp().timestamp_millis() / 1000
		);
	}

	#[test]
	fn string_timestamps_are_parsed() {
		let stored = stored_from_document(&doc! { "created_at": "2024-03-01T10:00:00Z" });

		assert_eq!(stored.id, None);
		assert_eq!(
			stored.created_at,
			Some(DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z").unwrap().with_timezone(&Utc))
		);
	}

	#[tokio::test]
	async fn malformed_url_is_a_configuration_error() {
		let driver = MongoDriver::new(&DocumentConfig {
			url: "not-a-mongo-url".to_string(),
			database: "catalog".to_string(),
		});

		let err = driver.connect().await.unwrap_err();

		assert!(matches!(err, StoreError::Config { .. }));
		assert!(!err.is_unavailable());
	}

	#[test]
	fn io_failures_are_unavailable() {
		let err = MongoError::from(
			std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused")
		);

		assert!(classify(err).is_unavailable());
	}

	#[tokio::test]
	async fn rejected_connection_strings_are_not_unreachable() {
		let err = ClientOptions::parse("not-a-mongo-url").await.unwrap_err();

		assert!(!is_unreachable(&err));
		assert!(matches!(classify_setup(err.clone()), StoreError::Config { .. }));
		assert!(matches!(classify(err), StoreError::Operation { code: None, .. }));
	}

	#[tokio::test]
	async fn unanswered_server_selection_is_unavailable() {
		let driver = MongoDriver::new(&DocumentConfig {
			url: "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200".to_string(),
			database: "catalog".to_string(),
		});

		let err = driver.connect().await.unwrap_err();

		assert!(err.is_unavailable(), "{:?}", err);
	}

	#[tokio::test]
	async fn failed_srv_lookup_is_unavailable() {
		let driver = MongoDriver::new(&DocumentConfig {
			url: "mongodb+srv://nonexistent-host.invalid/".to_string(),
			database: "catalog".to_string(),
		});

		let err = driver.connect().await.unwrap_err();

		assert!(err.is_unavailable(), "{:?}", err);
	}

	#[tokio::test]
	#[ignore = "requires database"]
	async fn insert_then_list_against_a_live_server() {
		let driver = MongoDriver::new(&DocumentConfig {
			url: "mongodb://localhost:27017".to_string(),
			database: "catalog_test".to_string(),
		});
		let client = driver.connect().await.unwrap();
		let products = driver.collection(&client, "products");

		let id = products
			.insert_one(&NewDocumentProduct {
				name: "Live".to_string(),
				price: 1.25,
				stock: 2,
				created_at: Utc::now(),
			}).await
			.unwrap();

		let all = products.find_all().await.unwrap();
		assert!(all.iter().any(|doc| doc.id.as_deref() == Some(id.as_str())));

		driver.close(client).await;
	}
}
