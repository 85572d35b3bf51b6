//! Logging prelude for convenient access to tracing macros.

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// Logs at INFO level and above by default; override with `RUST_LOG`:
///
/// ```bash
/// RUST_LOG=debug syncstation sync
/// RUST_LOG=syncstation::pool=trace syncstation push
/// ```
pub fn init_tracing() {
	init_tracing_with("info");
}

/// Initialize tracing with an explicit default level, still honoring
/// `RUST_LOG` when set.
pub fn init_tracing_with(default_level: &str) {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
		)
		.with_writer(std::io::stderr)
		.init();
}

