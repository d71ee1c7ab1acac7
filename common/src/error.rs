use axum::{ http::StatusCode, response::{ IntoResponse, Response }, Json };
use rust_decimal::Decimal;
use serde_json::{ json, Value };
use thiserror::Error;

use crate::config::Mode;

/// A client-supplied product field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("product name is required")]
	MissingName,

	#[error("product name must be at most {max} characters")]
	NameTooLong {
		max: usize,
	},

	#[error("price must be a valid number")]
	InvalidPrice,

	#[error("price must not be negative")]
	NegativePrice,

	#[error("price must be at most {max}")]
	PriceTooLarge {
		max: Decimal,
	},

	#[error("stock must not be negative")]
	NegativeStock,

	#[error("stock must be at most {max}")]
	StockOutOfRange {
		max: i32,
	},
}

impl ValidationError {
	/// Name of the offending request field.
	pub fn field(&self) -> &'static str {
		match self {
			Self::MissingName | Self::NameTooLong { .. } => "name",
			Self::InvalidPrice | Self::NegativePrice | Self::PriceTooLarge { .. } => "price",
			Self::NegativeStock | Self::StockOutOfRange { .. } => "stock",
		}
	}
}

/// Store-level failure. Cloneable so that a single connection attempt can be
/// shared by every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	#[error("{store} is not connected")]
	NotConnected {
		store: &'static str,
	},

	#[error("{store} is unavailable: {message}")]
	Unavailable {
		store: &'static str,
		message: String,
	},

	#[error("connection queue is full ({limit} requests waiting)")]
	QueueFull {
		limit: usize,
	},

	#[error("{store} operation failed: {message}")]
	Operation {
		store: &'static str,
		code: Option<String>,
		message: String,
	},

	#[error("invalid {store} configuration: {message}")]
	Config {
		store: &'static str,
		message: String,
	},
}

impl StoreError {
	/// True when the store could not be reached at all, as opposed to a
	/// reachable store rejecting an operation.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::NotConnected { .. } | Self::Unavailable { .. })
	}
}

/// Error returned from HTTP handlers. Every variant renders a JSON body with
/// `success: false`.
#[derive(Debug)]
pub enum ApiError {
	/// Request field failed validation (400)
	Validation(ValidationError),

	/// Request body was not valid JSON (400)
	MalformedBody {
		message: String,
	},

	/// No product with this id (404)
	NotFound {
		id: String,
	},

	/// Document store could not be reached for a write (503)
	StoreUnavailable {
		message: &'static str,
		solution: &'static str,
	},

	/// Unexpected store or driver failure (500). `details` is only filled in
	/// when the mode exposes them.
	Internal {
		error: &'static str,
		details: Option<String>,
	},

	/// Administrative operation failed (500), with a hint under `hint_key`.
	Maintenance {
		error: String,
		hint_key: &'static str,
		hint: &'static str,
	},

	/// No route matched (404)
	RouteNotFound {
		path: String,
		method: String,
	},
}

impl ApiError {
	pub fn not_found(id: impl Into<String>) -> Self {
		Self::NotFound { id: id.into() }
	}

	/// Wrap an unexpected failure. The cause is logged here and only echoed to
	/// the client in development mode.
	pub fn internal(error: &'static str, cause: &anyhow::Error, mode: Mode) -> Self {
		tracing::error!(error, cause = ?cause, "request failed");
		Self::Internal {
			error,
			details: mode.exposes_details().then(|| format!("{:#}", cause)),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, body): (StatusCode, Value) = match self {
			Self::Validation(e) =>
				(
					StatusCode::BAD_REQUEST,
					json!({
						"success": false,
						"error": e.to_string(),
						"field": e.field(),
					}),
				),
			Self::MalformedBody { message } =>
				(
					StatusCode::BAD_REQUEST,
					json!({
						"success": false,
						"error": "Request body must be valid JSON",
						"details": message,
					}),
				),
			Self::NotFound { id } =>
				(
					StatusCode::NOT_FOUND,
					json!({
						"success": false,
						"error": format!("Product with ID {} not found", id),
					}),
				),
			Self::StoreUnavailable { message, solution } =>
				(
					StatusCode::SERVICE_UNAVAILABLE,
					json!({
						"success": false,
						"error": "MongoDB is not available",
						"message": message,
						"solution": solution,
					}),
				),
			Self::Internal { error, details } => {
				let mut body = json!({ "success": false, "error": error });
				if let Some(details) = details {
					body["details"] = Value::String(details);
				}
				(StatusCode::INTERNAL_SERVER_ERROR, body)
			}
			Self::Maintenance { error, hint_key, hint } => {
				let mut body = json!({ "success": false, "error": error });
				body[hint_key] = Value::String(hint.to_string());
				(StatusCode::INTERNAL_SERVER_ERROR, body)
			}
			Self::RouteNotFound { path, method } =>
				(
					StatusCode::NOT_FOUND,
					json!({
						"success": false,
						"error": "Route not found",
						"path": path,
						"method": method,
					}),
				),
		};

		(status, Json(body)).into_response()
	}
}

impl From<ValidationError> for ApiError {
	fn from(e: ValidationError) -> Self {
		Self::Validation(e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::to_bytes;

	async fn body_of(response: Response) -> Value {
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		serde_json::from_slice(&bytes).unwrap()
	}

	#[tokio::test]
	async fn validation_error_names_the_field() {
		let response = ApiError::from(ValidationError::InvalidPrice).into_response();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);

		let body = body_of(response).await;
		assert_eq!(body["success"], false);
		assert_eq!(body["field"], "price");
	}

	#[tokio::test]
	async fn not_found_mentions_the_id() {
		let response = ApiError::not_found("42").into_response();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);

		let body = body_of(response).await;
		assert!(body["error"].as_str().unwrap().contains("42"));
	}

	#[tokio::test]
	async fn internal_details_depend_on_mode() {
		let cause = anyhow::anyhow!("connection refused");

		let dev = ApiError::internal("Error fetching products", &cause, Mode::Development);
		let body = body_of(dev.into_response()).await;
		assert_eq!(body["details"], "connection refused");

		let prod = ApiError::internal("Error fetching products", &cause, Mode::Production);
		let response = prod.into_response();
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		let body = body_of(response).await;
		assert!(body.get("details").is_none());
	}

	#[tokio::test]
	async fn maintenance_error_carries_its_hint() {
		let err = ApiError::Maintenance {
			error: "table locked".to_string(),
			hint_key: "solution",
			hint: "Run POST /init-db first",
		};
		let body = body_of(err.into_response()).await;
		assert_eq!(body["solution"], "Run POST /init-db first");
		assert_eq!(body["error"], "table locked");
	}

	#[test]
	fn unavailable_classification() {
		assert!((StoreError::NotConnected { store: "MongoDB" }).is_unavailable());
		assert!(!(StoreError::QueueFull { limit: 3 }).is_unavailable());
	}
}
