//! Execution metadata handed to a plugin at startup.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Build flavour of the running denops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	Release,
	Debug,
	Test,
}

/// Editor hosting the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
	Vim,
	Nvim,
}

impl Host {
	pub fn as_str(self) -> &'static str {
		match self {
			Host::Vim => "vim",
			Host::Nvim => "nvim",
		}
	}
}

impl fmt::Display for Host {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
	Windows,
	Mac,
	Linux,
}

/// Immutable description of the environment a plugin runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
	pub mode: Mode,
	pub host: Host,
	/// Host version string, e.g. `"8.2.3452"` or `"0.5.1"`.
	pub version: String,
	pub platform: Platform,
}

impl Meta {
	/// Validates untrusted metadata.
	///
	/// Only an object with every field set to a known value is accepted.
	pub fn from_value(value: &Value) -> Result<Self> {
		if !value.is_object() {
			return Err(Error::Validation(format!("Invalid 'meta' is passed: {value}")));
		}
		serde_json::from_value(value.clone())
			.map_err(|e| Error::Validation(format!("Invalid 'meta' is passed: {value}: {e}")))
	}
}
