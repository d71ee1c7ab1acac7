use anyhow::{ anyhow, Result };
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing() -> Result<()> {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber
		::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.compact()
		.try_init()
		.map_err(|err| anyhow!(err))
}
