//! RPC session - request correlation and inbound dispatch over one transport.
//!
//! # Message Flow
//!
//! Outbound call:
//! 1. `call()` allocates an id and parks a oneshot sender in the pending table
//! 2. The request is queued for the writer task
//! 3. The run loop receives the response and resolves the sender by id
//! 4. The caller wakes with the result, a timeout, or `Interrupted`
//!
//! Inbound request:
//! 1. The run loop snapshots the handler from the current dispatcher
//! 2. The handler runs in its own task so the loop keeps reading
//! 3. The outcome is queued back as a response
//!
//! Closing the session (locally or by end of stream) fails every pending call
//! with [`Error::Interrupted`] and wakes [`Session::wait_closed`].

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use denops_protocol::error::{HANDLER_ERROR, PANIC};
use denops_protocol::{ErrorPayload, Message, Notification, Request, RequestId, Response};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use crate::dispatcher::{Dispatcher, Handler};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Default time a call waits for its response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives errors that have no caller waiting for them.
pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// Session settings.
#[derive(Clone)]
pub struct SessionConfig {
	/// How long `call` waits for a response. `None` waits forever.
	pub response_timeout: Option<Duration>,
	/// Sink for handler failures with no waiting caller. When unset, errors
	/// are logged and `Interrupted` is dropped.
	pub error_callback: Option<ErrorCallback>,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
			error_callback: None,
		}
	}
}

impl fmt::Debug for SessionConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionConfig")
			.field("response_timeout", &self.response_timeout)
			.field("error_callback", &self.error_callback.is_some())
			.finish()
	}
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Open,
	/// Pending calls are failed and queued writes are being flushed.
	Closing,
	Closed,
}

/// Pending call table. `closed` flips under the same lock that drains it, so
/// no call can slip in after closure.
#[derive(Default)]
struct PendingCalls {
	closed: bool,
	calls: HashMap<RequestId, oneshot::Sender<Result<Value>>>,
}

/// Removes a call's pending entry when the call future is dropped or times out.
struct CancelGuard {
	id: RequestId,
	pending: Arc<Mutex<PendingCalls>>,
	completed: bool,
}

impl CancelGuard {
	fn new(id: RequestId, pending: Arc<Mutex<PendingCalls>>) -> Self {
		Self {
			id,
			pending,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.pending.lock().calls.remove(&self.id).is_some() {
			debug!(id = self.id, "Retired request id");
		}
	}
}

/// A message waiting for the writer task, with an optional write receipt.
struct Outbound {
	value: Value,
	ack: Option<oneshot::Sender<Result<()>>>,
}

/// Transport pieces consumed by [`Session::run`].
struct SessionIo {
	sender: Box<dyn Transport>,
	receiver: Box<dyn TransportReceiver>,
	message_rx: mpsc::UnboundedReceiver<Value>,
	outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

/// Bidirectional RPC session over one transport.
pub struct Session {
	/// Sequential request ID counter
	last_id: AtomicU32,
	pending: Arc<Mutex<PendingCalls>>,
	outbound_tx: mpsc::UnboundedSender<Outbound>,
	/// Taken once by `run()`
	io: Mutex<Option<SessionIo>>,
	running: AtomicBool,
	dispatcher: RwLock<Arc<Dispatcher>>,
	state_tx: watch::Sender<SessionState>,
	close_error: Mutex<Option<String>>,
	config: SessionConfig,
}

impl Session {
	/// Creates a session. Nothing is read or written until [`run`](Self::run).
	pub fn new(parts: TransportParts, config: SessionConfig) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (state_tx, _) = watch::channel(SessionState::Open);

		Self {
			last_id: AtomicU32::new(0),
			pending: Arc::new(Mutex::new(PendingCalls::default())),
			outbound_tx,
			io: Mutex::new(Some(SessionIo {
				sender,
				receiver,
				message_rx,
				outbound_rx,
			})),
			running: AtomicBool::new(false),
			dispatcher: RwLock::new(Arc::new(Dispatcher::new())),
			state_tx,
			close_error: Mutex::new(None),
			config,
		}
	}

	/// Creates a session and runs it in a background task.
	pub fn spawn(parts: TransportParts, config: SessionConfig) -> Arc<Self> {
		let session = Arc::new(Self::new(parts, config));
		session.start();
		session
	}

	/// Runs the session in a background task.
	pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let session = Arc::clone(self);
		tokio::spawn(async move { session.run().await })
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	pub fn state(&self) -> SessionState {
		*self.state_tx.borrow()
	}

	fn is_open(&self) -> bool {
		self.state() == SessionState::Open
	}

	/// Returns the dispatcher currently consulted for inbound messages.
	pub fn dispatcher(&self) -> Arc<Dispatcher> {
		Arc::clone(&self.dispatcher.read())
	}

	/// Replaces the dispatcher. Messages already dispatched keep the handler
	/// they were given.
	pub fn set_dispatcher(&self, dispatcher: Dispatcher) {
		*self.dispatcher.write() = Arc::new(dispatcher);
	}

	/// Edits a copy of the current dispatcher and installs it in one step.
	pub fn update_dispatcher(&self, edit: impl FnOnce(&mut Dispatcher)) {
		let mut slot = self.dispatcher.write();
		let mut next = Dispatcher::clone(&slot);
		edit(&mut next);
		*slot = Arc::new(next);
	}

	/// Calls `method` on the peer and waits for its response.
	///
	/// # Errors
	///
	/// - [`Error::Remote`] if the peer answered with an error
	/// - [`Error::Timeout`] if no response arrived within the response timeout
	/// - [`Error::Interrupted`] if the session closed first
	pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
		let (tx, rx) = oneshot::channel();
		let id = {
			let mut pending = self.pending.lock();
			if pending.closed {
				return Err(Error::Interrupted);
			}
			let id = loop {
				let id = self.last_id.fetch_add(1, Ordering::Relaxed);
				if !pending.calls.contains_key(&id) {
					break id;
				}
			};
			pending.calls.insert(id, tx);
			id
		};
		let mut guard = CancelGuard::new(id, Arc::clone(&self.pending));

		debug!(id, method, "Sending request");
		let request = Message::from(Request {
			id,
			method: method.to_string(),
			params,
		});
		self.enqueue(&request, None)?;

		let received = match self.config.response_timeout {
			Some(limit) => match tokio::time::timeout(limit, rx).await {
				Ok(received) => received,
				Err(_) => {
					warn!(id, method, timeout_ms = limit.as_millis() as u64, "Request timed out");
					return Err(Error::Timeout {
						method: method.to_string(),
						duration: limit,
					});
				}
			},
			None => rx.await,
		};
		guard.complete();

		// A dropped sender means the table was drained by shutdown.
		received.unwrap_or(Err(Error::Interrupted))
	}

	/// Sends a one-way message and waits until it has been written.
	///
	/// # Errors
	///
	/// [`Error::Interrupted`] if the session is closed, or
	/// [`Error::TransportError`] if writing the frame failed.
	pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
		debug!(method, "Sending notification");
		let notification = Message::from(Notification {
			method: method.to_string(),
			params,
		});
		let (ack_tx, ack_rx) = oneshot::channel();
		self.enqueue(&notification, Some(ack_tx))?;
		ack_rx.await.unwrap_or(Err(Error::Interrupted))
	}

	fn enqueue(&self, message: &Message, ack: Option<oneshot::Sender<Result<()>>>) -> Result<()> {
		if !self.is_open() {
			return Err(Error::Interrupted);
		}
		let value = serde_json::to_value(message)?;
		self.outbound_tx
			.send(Outbound { value, ack })
			.map_err(|_| Error::Interrupted)
	}

	/// Closes the session. Pending calls fail with [`Error::Interrupted`];
	/// messages already queued are still written.
	pub fn close(&self) {
		self.shutdown(None);
	}

	/// Waits until the session has closed.
	///
	/// # Errors
	///
	/// [`Error::TransportError`] if the session ended because the transport
	/// broke rather than by an orderly close from either side.
	pub async fn wait_closed(&self) -> Result<()> {
		let mut state_rx = self.state_tx.subscribe();
		wait_for_state(&mut state_rx, |s| s == SessionState::Closed).await;
		match self.close_error.lock().clone() {
			Some(cause) => Err(Error::TransportError(cause)),
			None => Ok(()),
		}
	}

	fn shutdown(&self, cause: Option<String>) {
		let drained = {
			let mut pending = self.pending.lock();
			if pending.closed {
				return;
			}
			pending.closed = true;
			std::mem::take(&mut pending.calls)
		};

		if let Some(cause) = cause {
			warn!(error = %cause, "Session closed by transport error");
			*self.close_error.lock() = Some(cause);
		} else {
			debug!("Session closing");
		}
		self.state_tx.send_replace(SessionState::Closing);

		if !drained.is_empty() {
			debug!(count = drained.len(), "Interrupting pending calls");
		}
		for (_, tx) in drained {
			let _ = tx.send(Err(Error::Interrupted));
		}

		// Without a run loop there is nothing left to flush.
		if !self.running.load(Ordering::SeqCst) {
			self.state_tx.send_replace(SessionState::Closed);
		}
	}

	fn report(&self, error: Error) {
		match &self.config.error_callback {
			Some(callback) => callback(error),
			None if error.is_interrupted() => debug!("Dropped handler outcome after session closed"),
			None => error!(error = %error, "Unexpected error in session"),
		}
	}

	/// Runs the read/write loops until the session closes.
	///
	/// Only the first call does anything.
	pub async fn run(self: &Arc<Self>) {
		let Some(io) = self.io.lock().take() else {
			warn!("Session::run called more than once");
			return;
		};
		self.running.store(true, Ordering::SeqCst);
		if self.pending.lock().closed {
			self.state_tx.send_replace(SessionState::Closed);
			return;
		}

		let SessionIo {
			sender,
			mut receiver,
			mut message_rx,
			outbound_rx,
		} = io;

		let reader_handle = tokio::spawn(async move { receiver.run().await });
		let writer_handle = tokio::spawn(Arc::clone(self).write_loop(sender, outbound_rx));

		let mut state_rx = self.state_tx.subscribe();
		let stream_ended = loop {
			tokio::select! {
				message = message_rx.recv() => match message {
					Some(value) => self.handle_value(value),
					None => break true,
				},
				() = wait_for_state(&mut state_rx, |s| s != SessionState::Open) => break false,
			}
		};

		let cause = if stream_ended {
			match reader_handle.await {
				Ok(Ok(())) => None,
				Ok(Err(e)) => Some(close_cause(e)),
				Err(e) => Some(format!("transport reader failed: {e}")),
			}
		} else {
			reader_handle.abort();
			None
		};
		self.shutdown(cause);

		if let Err(e) = writer_handle.await {
			error!(error = %e, "Session writer task failed");
		}
		self.state_tx.send_replace(SessionState::Closed);
		debug!("Session closed");
	}

	async fn write_loop(
		self: Arc<Self>,
		mut sender: Box<dyn Transport>,
		mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
	) {
		let mut state_rx = self.state_tx.subscribe();
		loop {
			tokio::select! {
				outbound = outbound_rx.recv() => {
					let Some(outbound) = outbound else { break };
					if let Err(cause) = write_one(sender.as_mut(), outbound).await {
						self.shutdown(Some(cause));
						break;
					}
				}
				() = wait_for_state(&mut state_rx, |s| s != SessionState::Open) => {
					// Flush what was queued before the close.
					outbound_rx.close();
					while let Some(outbound) = outbound_rx.recv().await {
						if write_one(sender.as_mut(), outbound).await.is_err() {
							break;
						}
					}
					break;
				}
			}
		}

		outbound_rx.close();
		while let Some(outbound) = outbound_rx.recv().await {
			if let Some(ack) = outbound.ack {
				let _ = ack.send(Err(Error::Interrupted));
			}
		}
		if let Err(e) = sender.close().await {
			debug!(error = %e, "Failed to shut down transport writer");
		}
	}

	fn handle_value(self: &Arc<Self>, value: Value) {
		match Message::try_from(value) {
			Ok(message) => self.handle_message(message),
			Err(e) => warn!(error = %e, "Failed to parse message"),
		}
	}

	pub(crate) fn handle_message(self: &Arc<Self>, message: Message) {
		match message {
			Message::Response(response) => self.resolve(response),
			Message::Request(request) => self.spawn_request(request),
			Message::Notification(notification) => self.spawn_notification(notification),
		}
	}

	fn resolve(&self, response: Response) {
		let id = response.id;
		let Some(tx) = self.pending.lock().calls.remove(&id) else {
			debug!(id, "Discarding response for unknown or retired request id");
			return;
		};
		let _ = tx.send(response.into_result().map_err(Error::from));
	}

	fn lookup(&self, method: &str) -> Option<Handler> {
		self.dispatcher.read().get(method).cloned()
	}

	fn spawn_request(self: &Arc<Self>, request: Request) {
		let Request { id, method, params } = request;
		// Handler selection happens now, not when the task first runs.
		let handler = self.lookup(&method);
		let session = Arc::clone(self);

		tokio::spawn(async move {
			let response = match handler {
				Some(handler) => match invoke(handler, params).await {
					Ok(result) => Response::success(id, result),
					Err(payload) => {
						debug!(id, method = %method, error = %payload.message, "Handler failed");
						Response::failure(id, payload)
					}
				},
				None => {
					debug!(id, method = %method, "No handler for inbound request");
					Response::failure(id, ErrorPayload::method_not_found(&method))
				}
			};
			if let Err(e) = session.enqueue(&Message::from(response), None) {
				session.report(e);
			}
		});
	}

	fn spawn_notification(self: &Arc<Self>, notification: Notification) {
		let Notification { method, params } = notification;
		let handler = self.lookup(&method);
		let session = Arc::clone(self);

		tokio::spawn(async move {
			let Some(handler) = handler else {
				session.report(Error::MethodNotFound(method));
				return;
			};
			if let Err(payload) = invoke(handler, params).await {
				session.report(Error::Handler {
					method,
					message: payload.message,
				});
			}
		});
	}

	/// Feeds a message through the dispatch path (test-only).
	#[cfg(test)]
	pub(crate) fn dispatch(self: &Arc<Self>, message: Message) {
		self.handle_message(message);
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("state", &self.state())
			.field("pending", &self.pending.lock().calls.len())
			.finish_non_exhaustive()
	}
}

async fn write_one(sender: &mut dyn Transport, outbound: Outbound) -> std::result::Result<(), String> {
	match sender.send(outbound.value).await {
		Ok(()) => {
			if let Some(ack) = outbound.ack {
				let _ = ack.send(Ok(()));
			}
			Ok(())
		}
		Err(e) => {
			let cause = close_cause(e);
			if let Some(ack) = outbound.ack {
				let _ = ack.send(Err(Error::TransportError(cause.clone())));
			}
			Err(cause)
		}
	}
}

/// Text recorded as the reason a session closed.
fn close_cause(e: Error) -> String {
	match e {
		Error::TransportError(cause) => cause,
		other => other.to_string(),
	}
}

/// Runs a handler, turning errors and panics into a response payload.
async fn invoke(handler: Handler, params: Vec<Value>) -> std::result::Result<Value, ErrorPayload> {
	match AssertUnwindSafe(async move { handler.call(params).await })
		.catch_unwind()
		.await
	{
		Ok(Ok(value)) => Ok(value),
		Ok(Err(e)) => {
			let payload = ErrorPayload::new(HANDLER_ERROR, e.to_string());
			let chain: Vec<String> = e.chain().skip(1).map(ToString::to_string).collect();
			if chain.is_empty() {
				Err(payload)
			} else {
				Err(payload.with_stack(chain.join("\n")))
			}
		}
		Err(panic) => {
			let message = panic
				.downcast_ref::<&str>()
				.map(|s| (*s).to_string())
				.or_else(|| panic.downcast_ref::<String>().cloned())
				.unwrap_or_else(|| "handler panicked".to_string());
			Err(ErrorPayload::new(PANIC, message))
		}
	}
}

/// Waits until the watched state satisfies `pred`. Returns immediately if the
/// sender is gone.
async fn wait_for_state(
	state_rx: &mut watch::Receiver<SessionState>,
	pred: impl Fn(SessionState) -> bool,
) {
	let _ = state_rx.wait_for(|s| pred(*s)).await;
}

#[cfg(test)]
mod tests;
