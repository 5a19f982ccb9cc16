//! Request, response and notification messages.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ErrorPayload;

/// Correlates a response with the request that caused it.
pub type RequestId = u32;

const KIND_REQUEST: u64 = 0;
const KIND_RESPONSE: u64 = 1;
const KIND_NOTIFICATION: u64 = 2;

/// A call that expects exactly one [`Response`] carrying the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	pub id: RequestId,
	pub method: String,
	pub params: Vec<Value>,
}

/// Answer to a [`Request`]. `error` is `None` on success.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
	pub id: RequestId,
	pub error: Option<Value>,
	pub result: Value,
}

/// One-way message; no id, no response.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
	pub method: String,
	pub params: Vec<Value>,
}

/// Any message that can appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
	Request(Request),
	Response(Response),
	Notification(Notification),
}

/// Reasons a JSON value is not a valid message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
	#[error("message is not an array")]
	NotAnArray,

	#[error("message type is missing or not an integer")]
	MissingKind,

	#[error("unknown message type {0}")]
	UnknownKind(u64),

	#[error("{kind} message must have {expected} fields, got {actual}")]
	FieldCount {
		kind: &'static str,
		expected: usize,
		actual: usize,
	},

	#[error("message id must be an unsigned 32-bit integer")]
	InvalidId,

	#[error("method name must be a string")]
	InvalidMethod,

	#[error("params must be an array")]
	InvalidParams,
}

impl Response {
	pub fn success(id: RequestId, result: Value) -> Self {
		Self {
			id,
			error: None,
			result,
		}
	}

	pub fn failure(id: RequestId, error: ErrorPayload) -> Self {
		Self {
			id,
			error: Some(error.into_value()),
			result: Value::Null,
		}
	}

	/// Splits the response into the outcome the caller should observe.
	pub fn into_result(self) -> Result<Value, ErrorPayload> {
		match self.error {
			Some(error) => Err(ErrorPayload::from_value(error)),
			None => Ok(self.result),
		}
	}
}

impl From<Request> for Message {
	fn from(request: Request) -> Self {
		Self::Request(request)
	}
}

impl From<Response> for Message {
	fn from(response: Response) -> Self {
		Self::Response(response)
	}
}

impl From<Notification> for Message {
	fn from(notification: Notification) -> Self {
		Self::Notification(notification)
	}
}

impl Serialize for Message {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Self::Request(r) => (KIND_REQUEST, r.id, &r.method, &r.params).serialize(serializer),
			Self::Response(r) => (KIND_RESPONSE, r.id, &r.error, &r.result).serialize(serializer),
			Self::Notification(n) => (KIND_NOTIFICATION, &n.method, &n.params).serialize(serializer),
		}
	}
}

impl<'de> Deserialize<'de> for Message {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = Value::deserialize(deserializer)?;
		Self::try_from(value).map_err(de::Error::custom)
	}
}

impl TryFrom<Value> for Message {
	type Error = MessageError;

	fn try_from(value: Value) -> Result<Self, Self::Error> {
		let Value::Array(items) = value else {
			return Err(MessageError::NotAnArray);
		};
		let mut items = items.into_iter();
		let kind = items
			.next()
			.and_then(|v| v.as_u64())
			.ok_or(MessageError::MissingKind)?;
		let fields: Vec<Value> = items.collect();

		match kind {
			KIND_REQUEST => {
				let [id, method, params] = fields_of::<3>(fields, "request")?;
				Ok(Self::Request(Request {
					id: parse_id(&id)?,
					method: parse_method(method)?,
					params: parse_params(params)?,
				}))
			}
			KIND_RESPONSE => {
				let [id, error, result] = fields_of::<3>(fields, "response")?;
				Ok(Self::Response(Response {
					id: parse_id(&id)?,
					error: (!error.is_null()).then_some(error),
					result,
				}))
			}
			KIND_NOTIFICATION => {
				let [method, params] = fields_of::<2>(fields, "notification")?;
				Ok(Self::Notification(Notification {
					method: parse_method(method)?,
					params: parse_params(params)?,
				}))
			}
			other => Err(MessageError::UnknownKind(other)),
		}
	}
}

fn fields_of<const N: usize>(
	fields: Vec<Value>,
	kind: &'static str,
) -> Result<[Value; N], MessageError> {
	let actual = fields.len();
	<[Value; N]>::try_from(fields).map_err(|_| MessageError::FieldCount {
		kind,
		expected: N + 1,
		actual: actual + 1,
	})
}

fn parse_id(value: &Value) -> Result<RequestId, MessageError> {
	value
		.as_u64()
		.and_then(|id| RequestId::try_from(id).ok())
		.ok_or(MessageError::InvalidId)
}

fn parse_method(value: Value) -> Result<String, MessageError> {
	match value {
		Value::String(method) => Ok(method),
		_ => Err(MessageError::InvalidMethod),
	}
}

fn parse_params(value: Value) -> Result<Vec<Value>, MessageError> {
	match value {
		Value::Array(params) => Ok(params),
		_ => Err(MessageError::InvalidParams),
	}
}
