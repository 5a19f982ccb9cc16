//! denops runtime - channel adapter, transport, and RPC session
//!
//! This crate provides the plumbing a plugin worker uses to talk to its host:
//!
//! - **Channel adapter**: a postMessage-style [`WorkerPort`] exposed as an
//!   `AsyncRead`/`AsyncWrite` pair
//! - **Transport**: length-prefixed JSON frames over any byte stream
//! - **Session**: request/response correlation, timeouts, notifications, and
//!   routing of inbound calls to an installed [`Dispatcher`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   denops     │  Facade and worker runner
//! └──────┬───────┘
//!        │ call / notify / dispatcher
//! ┌──────▼───────┐
//! │denops-runtime│  This crate
//! │  ┌────────┐  │
//! │  │Session │  │  id correlation, inbound dispatch
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  [u32 LE length][JSON] frames
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Port   │  │  worker message channel
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod transport;

pub use channel::{WorkerPort, WorkerReader, WorkerWriter};
pub use dispatcher::{Dispatcher, Handler, HandlerFuture, arg};
pub use error::{Error, Result};
pub use session::{
	DEFAULT_RESPONSE_TIMEOUT, ErrorCallback, Session, SessionConfig, SessionState,
};
pub use transport::{
	PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts,
	TransportReceiver,
};
