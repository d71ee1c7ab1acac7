//! Product endpoints under `/api`: full CRUD against the relational store and
//! list/create against the document store.

use std::sync::Arc;

use axum::{
	extract::{ rejection::JsonRejection, Path, State },
	http::StatusCode,
	response::{ IntoResponse, Response },
	Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{ info, warn };

use crate::{
	document::{ DocumentCollection, DocumentDriver, DocumentStore },
	error::{ ApiError, StoreError },
	models::{ DocumentProduct, NewDocumentProduct, Product, ProductInput, ProductPayload },
	server::AppState,
	store::{ parse_product_id, RelationalStore, PRODUCTS_TABLE },
};

/// Value of the `source` field on document-store responses.
pub const DOCUMENT_SOURCE: &str = "mongodb";

#[derive(Debug, Serialize)]
pub struct ProductList {
	pub success: bool,
	pub products: Vec<Product>,
	pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
	pub success: bool,
	pub message: &'static str,
	pub product_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ProductFound {
	pub success: bool,
	pub product: Product,
}

#[derive(Debug, Serialize)]
pub struct Message {
	pub success: bool,
	pub message: String,
}

impl Message {
	pub fn ok(message: impl Into<String>) -> Self {
		Self { success: true, message: message.into() }
	}
}

fn read_payload(payload: Result<Json<ProductPayload>, JsonRejection>) -> Result<ProductPayload, ApiError> {
	payload
		.map(|Json(payload)| payload)
		.map_err(|rejection| ApiError::MalformedBody { message: rejection.body_text() })
}

/// GET /api/products
pub async fn list_products<R: RelationalStore, D: DocumentDriver>(State(
	state,
): State<Arc<AppState<R, D>>>) -> Result<Json<ProductList>, ApiError> {
	info!(store = %state.relational.database_name(), "listing products");

	let products = state.relational
		.list_products().await
		.map_err(|e| ApiError::internal("Error fetching products", &e, state.settings.mode))?;

	Ok(
		Json(ProductList {
			success: true,
			count: products.len(),
			products,
		})
	)
}

/// POST /api/products
pub async fn create_product<R: RelationalStore, D: DocumentDriver>(
	State(state): State<Arc<AppState<R, D>>>,
	payload: Result<Json<ProductPayload>, JsonRejection>
) -> Result<(StatusCode, Json<ProductCreated>), ApiError> {
	let input = ProductInput::from_payload(&read_payload(payload)?)?;
	info!(name = %input.name, price = %input.price, stock = input.stock, "creating product");

	let product_id = state.relational
		.create_product(&input).await
		.map_err(|e| ApiError::internal("Error creating product", &e, state.settings.mode))?;

	info!(product_id, "product created");

	Ok((
		StatusCode::CREATED,
		Json(ProductCreated {
			success: true,
			message: "Product created successfully",
			product_id,
		}),
	))
}

/// GET /api/products/:id
pub async fn get_product<R: RelationalStore, D: DocumentDriver>(
	State(state): State<Arc<AppState<R, D>>>,
	Path(raw_id): Path<String>
) -> Result<Json<ProductFound>, ApiError> {
	let id = parse_product_id(&raw_id).ok_or_else(|| ApiError::not_found(&raw_id))?;

	let product = state.relational
		.get_product(id).await
		.map_err(|e| ApiError::internal("Error fetching product", &e, state.settings.mode))?
		.ok_or_else(|| ApiError::not_found(&raw_id))?;

	Ok(Json(ProductFound { success: true, product }))
}

/// PUT /api/products/:id
pub async fn update_product<R: RelationalStore, D: DocumentDriver>(
	State(state): State<Arc<AppState<R, D>>>,
	Path(raw_id): Path<String>,
	payload: Result<Json<ProductPayload>, JsonRejection>
) -> Result<Json<Message>, ApiError> {
	let input = ProductInput::from_payload(&read_payload(payload)?)?;
	let id = parse_product_id(&raw_id).ok_or_else(|| ApiError::not_found(&raw_id))?;
	info!(id, name = %input.name, "updating product");

	let changed = state.relational
		.update_product(id, &input).await
		.map_err(|e| ApiError::internal("Error updating product", &e, state.settings.mode))?;

	if changed == 0 {
		return Err(ApiError::not_found(raw_id));
	}

	Ok(Json(Message::ok("Product updated successfully")))
}

/// DELETE /api/products/:id
pub async fn delete_product<R: RelationalStore, D: DocumentDriver>(
	State(state): State<Arc<AppState<R, D>>>,
	Path(raw_id): Path<String>
) -> Result<Json<Message>, ApiError> {
	let id = parse_product_id(&raw_id).ok_or_else(|| ApiError::not_found(&raw_id))?;
	info!(id, "deleting product");

	let removed = state.relational
		.delete_product(id).await
		.map_err(|e| ApiError::internal("Error deleting product", &e, state.settings.mode))?;

	if removed == 0 {
		return Err(ApiError::not_found(raw_id));
	}

	Ok(Json(Message::ok("Product deleted successfully")))
}

/// Result of listing the document collection. An unreachable store is a
/// normal outcome here: both variants answer 200 and the `success` flag tells
/// the client whether the store was there.
#[derive(Debug)]
pub enum DocumentListing {
	Listed(Vec<DocumentProduct>),
	StoreUnavailable,
}

#[derive(Serialize)]
struct DocumentList {
	success: bool,
	products: Vec<DocumentProduct>,
	count: usize,
	source: &'static str,
}

#[derive(Serialize)]
struct DocumentStoreAbsent {
	success: bool,
	error: &'static str,
	message: &'static str,
	solution: &'static str,
	products: [DocumentProduct; 0],
	count: usize,
	source: &'static str,
}

impl IntoResponse for DocumentListing {
	fn into_response(self) -> Response {
		match self {
			Self::Listed(products) =>
				Json(DocumentList {
					success: true,
					count: products.len(),
					products,
					source: DOCUMENT_SOURCE,
				}).into_response(),
			Self::StoreUnavailable =>
				Json(DocumentStoreAbsent {
					success: false,
					error: "MongoDB is not available",
					message: "Install MongoDB or check that it is running",
					solution: "Run: mongod",
					products: [],
					count: 0,
					source: DOCUMENT_SOURCE,
				}).into_response(),
		}
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCreated {
	pub success: bool,
	pub message: &'static str,
	pub product_id: String,
	pub product: NewDocumentProduct,
}

async fn fetch_documents<D: DocumentDriver>(
	documents: &DocumentStore<D>
) -> Result<Vec<DocumentProduct>, StoreError> {
	let collection = documents.get_collection_safe(PRODUCTS_TABLE).await?;
	let stored = collection.find_all().await?;

	let now = Utc::now();
	Ok(
		stored
			.into_iter()
			.map(|doc| doc.into_product(now))
			.collect()
	)
}

async fn insert_document<D: DocumentDriver>(
	documents: &DocumentStore<D>,
	product: &NewDocumentProduct
) -> Result<String, StoreError> {
	let collection = documents.get_collection_safe(PRODUCTS_TABLE).await?;
	collection.insert_one(product).await
}

/// GET /api/mongo/products
pub async fn list_document_products<R: RelationalStore, D: DocumentDriver>(State(
	state,
): State<Arc<AppState<R, D>>>) -> Result<DocumentListing, ApiError> {
	match fetch_documents(&state.documents).await {
		Ok(products) => {
			info!(count = products.len(), "document products listed");
			Ok(DocumentListing::Listed(products))
		}
		Err(e) if e.is_unavailable() => {
			warn!(error = %e, "document store unavailable, answering with an empty listing");
			Ok(DocumentListing::StoreUnavailable)
		}
		Err(e) => {
			let cause = anyhow::Error::new(e);
			Err(ApiError::internal("Error reading from MongoDB", &cause, state.settings.mode))
		}
	}
}

/// POST /api/mongo/products
pub async fn create_document_product<R: RelationalStore, D: DocumentDriver>(
	State(state): State<Arc<AppState<R, D>>>,
	payload: Result<Json<ProductPayload>, JsonRejection>
) -> Result<(StatusCode, Json<DocumentCreated>), ApiError> {
	let input = ProductInput::from_payload(&read_payload(payload)?)?;
	let product = NewDocumentProduct::stamped(&input, Utc::now());

	match insert_document(&state.documents, &product).await {
		Ok(product_id) => {
			info!(product_id = %product_id, "document product created");
			Ok((
				StatusCode::CREATED,
				Json(DocumentCreated {
					success: true,
					message: "Product created in MongoDB",
					product_id,
					product,
				}),
			))
		}
		Err(e) if e.is_unavailable() => {
			warn!(error = %e, "document store unavailable, product not created");
			Err(ApiError::StoreUnavailable {
				message: "The product could not be created in MongoDB",
				solution: "Install and start MongoDB",
			})
		}
		Err(e) => {
			let cause = anyhow::Error::new(e);
			Err(ApiError::internal("Error processing request", &cause, state.settings.mode))
		}
	}
}
