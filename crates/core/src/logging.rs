use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the global subscriber. Output goes to stderr because stdout may
/// carry the RPC stream.
pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

/// Filter used when `RUST_LOG` is unset.
fn default_filter(verbosity: u8) -> &'static str {
	// 0 = warnings, including failed lifecycle events
	// 1 (-v) = plugin lifecycle
	// 2+ (-vv) = every message and phase change
	match verbosity {
		0 => "warn",
		1 => "info,denops_runtime=warn",
		_ => "debug",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_filter_keeps_warnings() {
		assert_eq!(default_filter(0), "warn");
		assert_eq!(default_filter(1), "info,denops_runtime=warn");
		assert_eq!(default_filter(3), "debug");
		for verbosity in 0..3 {
			assert!(EnvFilter::try_new(default_filter(verbosity)).is_ok());
		}
	}
}
