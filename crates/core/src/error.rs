//! Error types for plugin code and the worker runner.

use thiserror::Error;

/// Result type alias for denops operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the facade and the worker runner.
#[derive(Debug, Error)]
pub enum Error {
	/// The startup message was malformed. Fatal: raised before any session exists.
	#[error("invalid startup message: {0}")]
	Validation(String),

	/// Failure from the RPC session (timeout, interruption, remote error, transport).
	#[error(transparent)]
	Runtime(#[from] denops_runtime::Error),

	/// The plugin's code could not be loaded.
	#[error("failed to load plugin script '{script}': {source}")]
	Load {
		script: String,
		#[source]
		source: anyhow::Error,
	},

	/// The plugin's entry point returned an error.
	#[error("plugin '{name}' failed: {source:#}")]
	Plugin {
		name: String,
		#[source]
		source: anyhow::Error,
	},

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true for a malformed startup message.
	pub fn is_validation(&self) -> bool {
		matches!(self, Error::Validation(_))
	}

	/// Returns true if the session closed underneath the operation.
	pub fn is_interrupted(&self) -> bool {
		matches!(self, Error::Runtime(e) if e.is_interrupted())
	}

	/// Returns true for a call that ran out of time.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Runtime(e) if e.is_timeout())
	}

	/// Returns the remote error name if the host answered with an error.
	pub fn remote_name(&self) -> Option<&str> {
		match self {
			Error::Runtime(e) => e.error_name(),
			_ => None,
		}
	}
}
