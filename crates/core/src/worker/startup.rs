use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::meta::Meta;

/// Locator of a plugin's code, as sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script(String);

impl Script {
	pub fn new(locator: impl Into<String>) -> Self {
		Self(locator.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Script {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Script {
	fn from(locator: &str) -> Self {
		Self::new(locator)
	}
}

/// First message a worker receives: which plugin to run and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupArgs {
	pub name: String,
	pub script: Script,
	pub meta: Meta,
}

impl StartupArgs {
	/// Decodes and validates a raw startup frame body.
	pub fn from_slice(body: &[u8]) -> Result<Self> {
		let value: Value = serde_json::from_slice(body)
			.map_err(|e| Error::Validation(format!("startup message is not JSON: {e}")))?;
		Self::from_value(&value)
	}

	/// Validates a startup message. Unknown extra fields are ignored.
	pub fn from_value(value: &Value) -> Result<Self> {
		let Some(fields) = value.as_object() else {
			return Err(Error::Validation(format!(
				"startup message must be an object, got {value}"
			)));
		};

		let name = required_string(fields.get("name"), "name")?;
		let script = required_string(fields.get("script"), "script")?;
		let meta = fields
			.get("meta")
			.ok_or_else(|| Error::Validation("'meta' is missing".to_string()))
			.and_then(Meta::from_value)?;

		Ok(Self {
			name,
			script: Script(script),
			meta,
		})
	}
}

fn required_string(value: Option<&Value>, field: &str) -> Result<String> {
	match value {
		Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
		Some(Value::String(_)) => Err(Error::Validation(format!("'{field}' must not be empty"))),
		Some(other) => Err(Error::Validation(format!(
			"'{field}' must be a string, got {other}"
		))),
		None => Err(Error::Validation(format!("'{field}' is missing"))),
	}
}
