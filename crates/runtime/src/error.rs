//! Error types for the denops runtime.

use std::time::Duration;

use denops_protocol::ErrorPayload;
use denops_protocol::error::METHOD_NOT_FOUND;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the denops runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Transport-level error (framing, broken stream).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Error returned by the peer in a response.
	#[error("{name}: {message}")]
	Remote {
		/// Error type name (e.g., "MethodNotFound", "HandlerError")
		name: String,
		/// Human-readable error message
		message: String,
		/// Stack or cause chain sent by the peer (if available)
		stack: Option<String>,
	},

	/// No response arrived within the configured response timeout.
	#[error("Timeout: no response to '{method}' within {}ms", duration.as_millis())]
	Timeout { method: String, duration: Duration },

	/// The session closed while the operation was pending.
	#[error("Interrupted: session closed")]
	Interrupted,

	/// An inbound message named a method the dispatcher does not know.
	#[error("No handler for method '{0}'")]
	MethodNotFound(String),

	/// A handler failed while nobody was waiting for its result.
	#[error("Handler '{method}' failed: {message}")]
	Handler { method: String, message: String },

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns the error name if this is a Remote error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	/// Returns true if the session closed underneath the operation.
	///
	/// This is the expected outcome for calls still in flight at teardown.
	pub fn is_interrupted(&self) -> bool {
		matches!(self, Error::Interrupted)
	}

	/// Returns true if the method was unknown, locally or at the peer.
	pub fn is_method_not_found(&self) -> bool {
		match self {
			Error::MethodNotFound(_) => true,
			Error::Remote { name, .. } => name == METHOD_NOT_FOUND,
			_ => false,
		}
	}

	/// Returns true if this error ended the session at the transport level.
	pub fn is_transport(&self) -> bool {
		matches!(self, Error::TransportError(_) | Error::Io(_))
	}
}

impl From<ErrorPayload> for Error {
	fn from(payload: ErrorPayload) -> Self {
		Error::Remote {
			name: payload.name,
			message: payload.message,
			stack: payload.stack,
		}
	}
}
