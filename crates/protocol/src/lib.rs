//! Wire types for the denops plugin RPC protocol.
//!
//! Messages follow the msgpack-rpc shapes and travel as JSON arrays:
//!
//! ```text
//! request       [0, id, method, params]
//! response      [1, id, error, result]
//! notification  [2, method, params]
//! ```
//!
//! Framing is the transport's concern and lives in `denops-runtime`.

pub mod error;
pub mod message;

pub use error::ErrorPayload;
pub use message::{Message, MessageError, Notification, Request, RequestId, Response};
