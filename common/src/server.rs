use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ Context, Result };
use axum::{
	handler::HandlerWithoutStateExt,
	http::{ HeaderValue, Method, StatusCode, Uri },
	response::{ IntoResponse, Response },
	routing::{ get, post },
	Json,
	Router,
};
use serde_json::json;
use tokio::{ net::TcpListener, signal };
use tower_http::{
	catch_panic::CatchPanicLayer,
	cors::{ AllowOrigin, Any, CorsLayer },
	services::ServeDir,
	trace::TraceLayer,
};
use tracing::{ error, info, warn };

use crate::{
	admin,
	api,
	config::{ AppConfig, Mode },
	document::{ DocumentDriver, DocumentStore },
	error::ApiError,
	store::RelationalStore,
};

/// Settings the handlers and middleware read at request time.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	pub mode: Mode,
	pub environment: String,
	pub port: u16,
	pub cors_origin: String,
	pub static_dir: PathBuf,
}

impl From<&AppConfig> for ServerSettings {
	fn from(config: &AppConfig) -> Self {
		Self {
			mode: config.mode,
			environment: config.environment.clone(),
			port: config.port,
			cors_origin: config.cors_origin.clone(),
			static_dir: config.static_dir.clone(),
		}
	}
}

// Shared state for the API
pub struct AppState<R: RelationalStore, D: DocumentDriver> {
	pub relational: Arc<R>,
	pub documents: DocumentStore<D>,
	pub settings: ServerSettings,
}

impl<R: RelationalStore, D: DocumentDriver> AppState<R, D> {
	pub fn new(relational: R, driver: D, settings: ServerSettings) -> Self {
		Self {
			relational: Arc::new(relational),
			documents: DocumentStore::new(driver),
			settings,
		}
	}
}

/// Build the router: status and maintenance routes at the root, product APIs
/// under `/api`, and the static front-end for everything else.
pub fn build_router<R: RelationalStore, D: DocumentDriver>(state: Arc<AppState<R, D>>) -> Router {
	let settings = state.settings.clone();

	let api_routes = Router::new()
		.route(
			"/products",
			get(api::list_products::<R, D>).post(api::create_product::<R, D>)
		)
		.route(
			"/products/:id",
			get(api::get_product::<R, D>)
				.put(api::update_product::<R, D>)
				.delete(api::delete_product::<R, D>)
		)
		.route(
			"/mongo/products",
			get(api::list_document_products::<R, D>).post(api::create_document_product::<R, D>)
		);

	// Static files; anything not on disk gets the JSON 404.
	let static_files = ServeDir::new(&settings.static_dir)
		.call_fallback_on_method_not_allowed(true)
		.not_found_service(route_not_found.into_service());

	let mode = settings.mode;

	Router::new()
		.route("/status", get(admin::status::<R, D>))
		.route("/mongo-status", get(admin::document_status::<R, D>))
		.route("/init-db", post(admin::init_db::<R, D>))
		.route("/setup-test-data", post(admin::setup_test_data::<R, D>))
		.route("/diagnose", get(admin::diagnose::<R, D>))
		.nest("/api", api_routes)
		.fallback_service(static_files)
		.with_state(state)
		.layer(
			CatchPanicLayer::custom(move |panic: Box<dyn std::any::Any + Send + 'static>| {
				panic_response(panic, mode)
			})
		)
		.layer(cors_layer(&settings.cors_origin))
		.layer(TraceLayer::new_for_http())
}

fn cors_layer(origin: &str) -> CorsLayer {
	let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

	if origin.trim() == "*" {
		return layer.allow_origin(Any);
	}

	let origins: Vec<HeaderValue> = origin
		.split(',')
		.map(str::trim)
		.filter(|o| !o.is_empty())
		.filter_map(|o| match HeaderValue::from_str(o) {
			Ok(value) => Some(value),
			Err(_) => {
				warn!(origin = o, "ignoring invalid CORS origin");
				None
			}
		})
		.collect();

	layer.allow_origin(AllowOrigin::list(origins))
}

async fn route_not_found(method: Method, uri: Uri) -> ApiError {
	ApiError::RouteNotFound {
		path: uri.path().to_string(),
		method: method.to_string(),
	}
}

// Global responder for handlers that panic
fn panic_response(panic: Box<dyn std::any::Any + Send + 'static>, mode: Mode) -> Response {
	let detail = if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else if let Some(s) = panic.downcast_ref::<&str>() {
		s.to_string()
	} else {
		"unknown panic".to_string()
	};

	error!(panic = %detail, "handler panicked");

	let message = if mode.exposes_details() { detail } else { "Contact the administrator".to_string() };

	(
		StatusCode::INTERNAL_SERVER_ERROR,
		Json(json!({
			"success": false,
			"error": "Internal server error",
			"message": message,
		})),
	).into_response()
}

// Run the API server with the provided store implementations
pub async fn run_server<R: RelationalStore, D: DocumentDriver>(
	relational: R,
	driver: D,
	config: AppConfig
) -> Result<()> {
	config.log_summary();

	let state = Arc::new(AppState::new(relational, driver, ServerSettings::from(&config)));
	let app = build_router(Arc::clone(&state));

	let addr = SocketAddr::new(config.host, config.port);
	let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {}", addr))?;

	info!("Server listening on http://{}", addr);
	info!("Front-end: http://localhost:{}/  status: /status  products: /api/products", config.port);

	// Connectivity is only reported, never required.
	tokio::spawn(startup_checks(Arc::clone(&state)));

	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

	state.documents.close().await;
	info!("Server stopped");

	Ok(())
}

async fn startup_checks<R: RelationalStore, D: DocumentDriver>(state: Arc<AppState<R, D>>) {
	info!("Checking database connectivity");

	match state.relational.ping().await {
		Ok(schema) =>
			info!(
				store = %state.relational.database_name(),
				schema = %schema,
				"relational store connected"
			),
		Err(e) =>
			warn!(
				store = %state.relational.database_name(),
				error = %format!("{:#}", e),
				"relational store unavailable, relational endpoints will fail until it is reachable"
			),
	}

	if state.documents.check_connection().await {
		info!(store = state.documents.store_name(), "document store connected and responding");
	} else {
		warn!(
			store = state.documents.store_name(),
			"document store unavailable, the server continues with the relational store only"
		);
	}
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!(error = %e, "failed to install Ctrl+C handler");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				error!(error = %e, "failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {
			warn!("Received Ctrl+C, shutting down");
		}
		_ = terminate => {
			warn!("Received SIGTERM, shutting down");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn panic_message_is_hidden_in_production() {
		let response = panic_response(Box::new("boom"), Mode::Production);
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
	}

	#[tokio::test]
	async fn unknown_route_reports_path_and_method() {
		let response = route_not_found(Method::DELETE, Uri::from_static("/nope")).await.into_response();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);

		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(body["path"], "/nope");
		assert_eq!(body["method"], "DELETE");
		assert_eq!(body["success"], false);
	}
}
