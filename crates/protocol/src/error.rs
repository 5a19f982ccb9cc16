//! Error values carried inside response messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error name used when the receiving side has no handler for a method.
pub const METHOD_NOT_FOUND: &str = "MethodNotFound";

/// Error name used when a handler returned an error.
pub const HANDLER_ERROR: &str = "HandlerError";

/// Error name used when a handler panicked.
pub const PANIC: &str = "Panic";

/// Structured error sent in the `error` slot of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Error type name (e.g., "MethodNotFound", "HandlerError")
	pub name: String,
	/// Human-readable error message
	pub message: String,
	/// Backtrace or handler chain, if the sender had one
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

impl ErrorPayload {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			message: message.into(),
			stack: None,
		}
	}

	pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
		self.stack = Some(stack.into());
		self
	}

	pub fn method_not_found(method: &str) -> Self {
		Self::new(
			METHOD_NOT_FOUND,
			format!("No handler for method '{method}' is registered"),
		)
	}

	/// Interprets an arbitrary error value received from the peer.
	///
	/// Peers that do not send the structured form still produce a usable
	/// payload: the value's text becomes the message.
	pub fn from_value(value: Value) -> Self {
		if let Ok(payload) = serde_json::from_value::<Self>(value.clone()) {
			return payload;
		}
		let message = match value {
			Value::String(s) => s,
			other => other.to_string(),
		};
		Self::new("Error", message)
	}

	pub fn into_value(self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}
}
