use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{ Context, Result };
use tracing::info;

use crate::pool::PoolLimits;

/// Run mode. Decides whether error details reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Development,
	Production,
}

impl Mode {
	/// Only the `development` environment exposes details; every other label
	/// is treated as production.
	pub fn from_environment(environment: &str) -> Self {
		if environment.eq_ignore_ascii_case("development") {
			Self::Development
		} else {
			Self::Production
		}
	}

	pub fn exposes_details(self) -> bool {
		self == Self::Development
	}
}

/// Connection settings for the MySQL relational store.
#[derive(Debug, Clone)]
pub struct RelationalConfig {
	pub host: String,
	pub port: u16,
	pub user: String,
	pub password: Option<String>,
	pub database: String,
	pub pool: PoolLimits,
}

/// Connection settings for the document store.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
	pub url: String,
	pub database: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
	pub host: IpAddr,
	pub port: u16,
	pub environment: String,
	pub mode: Mode,
	pub cors_origin: String,
	pub static_dir: PathBuf,
	pub relational: RelationalConfig,
	pub sqlite_path: PathBuf,
	pub document: DocumentConfig,
}

impl AppConfig {
	/// Load `.env` if present, then read the process environment.
	pub fn from_env() -> Result<Self> {
		if let Err(e) = dotenvy::dotenv() {
			if !e.not_found() {
				return Err(e).context("failed to read .env file");
			}
		}

		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Build the configuration from an arbitrary key lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self> where F: Fn(&str) -> Option<String> {
		let get = |key: &str, default: &str| {
			lookup(key)
				.filter(|value| !value.trim().is_empty())
				.unwrap_or_else(|| default.to_string())
		};

		let environment = get("APP_ENV", "development");

		Ok(Self {
			host: parse_var(&lookup, "HOST", "0.0.0.0")?,
			port: parse_var(&lookup, "PORT", "8000")?,
			mode: Mode::from_environment(&environment),
			environment,
			cors_origin: get("CORS_ORIGIN", "*"),
			static_dir: PathBuf::from(get("STATIC_DIR", "public")),
			relational: RelationalConfig {
				host: get("DB_HOST", "localhost"),
				port: parse_var(&lookup, "DB_PORT", "3306")?,
				user: get("DB_USER", "root"),
				password: lookup("DB_PASSWORD").filter(|password| !password.is_empty()),
				database: get("DB_NAME", "catalog"),
				pool: PoolLimits {
					capacity: parse_var(&lookup, "DB_POOL_SIZE", "20")?,
					queue_limit: parse_var(&lookup, "DB_QUEUE_LIMIT", "100")?,
				},
			},
			sqlite_path: PathBuf::from(get("SQLITE_PATH", "./data/catalog.db")),
			document: DocumentConfig {
				url: get("MONGO_URL", "mongodb://localhost:27017"),
				database: get("MONGO_DB", "catalog"),
			},
		})
	}

	/// Log the effective configuration with the password masked.
	pub fn log_summary(&self) {
		info!(
			host = %self.host,
			port = self.port,
			environment = %self.environment,
			cors_origin = %self.cors_origin,
			static_dir = %self.static_dir.display(),
			"server configuration"
		);
		let password = if self.relational.password.is_some() { "***" } else { "(none)" };
		info!(
			host = %self.relational.host,
			port = self.relational.port,
			user = %self.relational.user,
			password,
			database = %self.relational.database,
			pool_size = self.relational.pool.capacity,
			queue_limit = self.relational.pool.queue_limit,
			"relational store configuration"
		);
		info!(url = %self.document.url, database = %self.document.database, "document store configuration");
	}
}

fn parse_var<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
	where T: FromStr, T::Err: std::error::Error + Send + Sync + 'static, F: Fn(&str) -> Option<String>
{
	let raw = lookup(key)
		.filter(|value| !value.trim().is_empty())
		.unwrap_or_else(|| default.to_string());

	raw.trim().parse::<T>().with_context(|| format!("invalid value for {}: {:?}", key, raw))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
		let vars: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		AppConfig::from_lookup(|key| vars.get(key).cloned())
	}

	#[test]
	fn defaults_apply_when_unset() {
		let config = config_from(&[]).unwrap();

		assert_eq!(config.port, 8000);
		assert_eq!(config.mode, Mode::Development);
		assert_eq!(config.cors_origin, "*");
		assert_eq!(config.relational.port, 3306);
		assert_eq!(config.relational.password, None);
		assert_eq!(config.relational.pool.capacity, 20);
		assert_eq!(config.relational.pool.queue_limit, 100);
		assert_eq!(config.document.url, "mongodb://localhost:27017");
	}

	#[test]
	fn production_hides_details() {
		let config = config_from(&[("APP_ENV", "production")]).unwrap();
		assert_eq!(config.mode, Mode::Production);
		assert!(!config.mode.exposes_details());

		assert_eq!(Mode::from_environment("staging"), Mode::Production);
	}

	#[test]
	fn bad_numbers_are_fatal() {
		let err = config_from(&[("PORT", "eighty")]).unwrap_err();
		assert!(err.to_string().contains("PORT"));

		assert!(config_from(&[("DB_POOL_SIZE", "-1")]).is_err());
	}

	#[test]
	fn overrides_are_read() {
		let config = config_from(
			&[
				("PORT", "9100"),
				("DB_PASSWORD", "secret"),
				("DB_QUEUE_LIMIT", "5"),
				("MONGO_DB", "shop"),
			]
		).unwrap();

		assert_eq!(config.port, 9100);
		assert_eq!(config.relational.password.as_deref(), Some("secret"));
		assert_eq!(config.relational.pool.queue_limit, 5);
		assert_eq!(config.document.database, "shop");
	}
}
