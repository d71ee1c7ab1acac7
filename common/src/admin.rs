//! Status, diagnostics and destructive maintenance routes.

use std::sync::Arc;

use axum::{ extract::State, response::{ IntoResponse, Response }, Json };
use chrono::{ DateTime, Utc };
use serde::Serialize;
use tracing::{ error, info, warn };

use crate::{
	api::Message,
	document::DocumentDriver,
	error::ApiError,
	models::{ ColumnInfo, TableDiagnosis },
	server::AppState,
	store::RelationalStore,
};

#[derive(Debug, Serialize)]
pub struct ServerStatus {
	pub status: &'static str,
	pub timestamp: DateTime<Utc>,
	pub port: u16,
	pub environment: String,
}

/// GET /status
pub async fn status<R: RelationalStore, D: DocumentDriver>(State(
	state,
): State<Arc<AppState<R, D>>>) -> Json<ServerStatus> {
	Json(ServerStatus {
		status: "online",
		timestamp: Utc::now(),
		port: state.settings.port,
		environment: state.settings.environment.clone(),
	})
}

#[derive(Debug, Serialize)]
pub struct DocumentHealth {
	pub connected: bool,
	pub status: &'static str,
	pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentStatus {
	pub success: bool,
	pub mongodb: DocumentHealth,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<DateTime<Utc>>,
}

/// GET /mongo-status
pub async fn document_status<R: RelationalStore, D: DocumentDriver>(State(
	state,
): State<Arc<AppState<R, D>>>) -> Json<DocumentStatus> {
	let store = state.documents.store_name();

	let report = match state.documents.probe().await {
		Ok(()) =>
			DocumentStatus {
				success: true,
				mongodb: DocumentHealth {
					connected: true,
					status: "online",
					message: format!("{} is connected and responding", store),
				},
				timestamp: Some(Utc::now()),
			},
		Err(e) if e.is_unavailable() => {
			warn!(error = %e, "document store offline");
			DocumentStatus {
				success: true,
				mongodb: DocumentHealth {
					connected: false,
					status: "offline",
					message: format!("{} is not available", store),
				},
				timestamp: Some(Utc::now()),
			}
		}
		Err(e) => {
			error!(error = %e, "document store check failed");
			DocumentStatus {
				success: false,
				mongodb: DocumentHealth {
					connected: false,
					status: "error",
					message: format!("Error checking {}: {}", store, e),
				},
				timestamp: None,
			}
		}
	};

	Json(report)
}

/// POST /init-db
pub async fn init_db<R: RelationalStore, D: DocumentDriver>(State(
	state,
): State<Arc<AppState<R, D>>>) -> Result<Json<Message>, ApiError> {
	state.relational.init().await.map_err(|e| {
		error!(error = %format!("{:#}", e), "database initialization failed");
		ApiError::Maintenance {
			error: format!("{:#}", e),
			hint_key: "details",
			hint: "Make sure the database server is running and you have permissions",
		}
	})?;

	info!("products table recreated");
	Ok(Json(Message::ok("Database initialized with an auto-increment products table")))
}

#[derive(Debug, Serialize)]
pub struct SeedReport {
	pub success: bool,
	pub message: String,
	pub count: i64,
}

/// POST /setup-test-data
pub async fn setup_test_data<R: RelationalStore, D: DocumentDriver>(State(
	state,
): State<Arc<AppState<R, D>>>) -> Result<Json<SeedReport>, ApiError> {
	info!("re-seeding products with sample data");

	let count = state.relational.reseed().await.map_err(|e| {
		error!(error = %format!("{:#}", e), "sample data setup failed");
		ApiError::Maintenance {
			error: format!("{:#}", e),
			hint_key: "solution",
			hint: "Run POST /init-db first",
		}
	})?;

	info!(count, "sample data created");
	Ok(
		Json(SeedReport {
			success: true,
			message: format!("Created {} sample products", count),
			count,
		})
	)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReport {
	pub success: bool,
	pub table_exists: bool,
	pub has_auto_increment: bool,
	pub structure: Vec<ColumnInfo>,
	pub id_column: Option<ColumnInfo>,
	pub message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingTable {
	pub success: bool,
	pub table_exists: bool,
	pub message: &'static str,
	pub solution: &'static str,
}

impl TableReport {
	pub fn from_columns(columns: Vec<ColumnInfo>) -> Self {
		let id_column = columns
			.iter()
			.find(|column| column.field == "id")
			.cloned();
		let has_auto_increment = id_column.as_ref().is_some_and(ColumnInfo::is_auto_increment);

		Self {
			success: true,
			table_exists: true,
			has_auto_increment,
			structure: columns,
			id_column,
			message: if has_auto_increment {
				"Table is correct, id is auto-increment"
			} else {
				"The id column is missing auto-increment"
			},
		}
	}
}

/// GET /diagnose
pub async fn diagnose<R: RelationalStore, D: DocumentDriver>(State(
	state,
): State<Arc<AppState<R, D>>>) -> Result<Response, ApiError> {
	let diagnosis = state.relational
		.diagnose().await
		.map_err(|e| ApiError::internal("Error diagnosing database", &e, state.settings.mode))?;

	let response = match diagnosis {
		TableDiagnosis::Missing =>
			Json(MissingTable {
				success: false,
				table_exists: false,
				message: "The products table does not exist",
				solution: "Run POST /init-db",
			}).into_response(),
		TableDiagnosis::Present { columns } => Json(TableReport::from_columns(columns)).into_response(),
	};

	Ok(response)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn column(field: &str, extra: &str) -> ColumnInfo {
		ColumnInfo {
			field: field.to_string(),
			column_type: "int".to_string(),
			nullable: "NO".to_string(),
			key: String::new(),
			default: None,
			extra: extra.to_string(),
		}
	}

	#[test]
	fn report_detects_auto_increment_id() {
		let report = TableReport::from_columns(
			vec![column("id", "auto_increment"), column("name", "")]
		);
		assert!(report.has_auto_increment);
		assert_eq!(report.id_column.unwrap().field, "id");
		assert_eq!(report.structure.len(), 2);
	}

	#[test]
	fn report_flags_plain_id() {
		let report = TableReport::from_columns(vec![column("id", "")]);
		assert!(!report.has_auto_increment);

		let report = TableReport::from_columns(vec![column("name", "")]);
		assert!(report.id_column.is_none());
		assert!(!report.has_auto_increment);
	}

	#[test]
	fn report_uses_camel_case_keys() {
		let value = serde_json::to_value(TableReport::from_columns(vec![column("id", "auto_increment")])).unwrap();
		assert_eq!(value["tableExists"], true);
		assert_eq!(value["hasAutoIncrement"], true);
		assert_eq!(value["idColumn"]["Field"], "id");
	}
}
