//! Framed transport - length-prefixed JSON messages over a byte stream.
//!
//! Frame format: `[u32 little-endian length][UTF-8 JSON body]`.
//!
//! The transport is split into a sender half (owned by the session's writer
//! task) and a receiver half (owned by the reader task). Decoded messages are
//! forwarded to the session over an unbounded channel as raw JSON values; the
//! session decides what they mean.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Largest frame body accepted in either direction.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Sending half of a transport.
#[async_trait]
pub trait Transport: Send {
	/// Writes one message as a single frame.
	async fn send(&mut self, message: Value) -> Result<()>;

	/// Shuts the underlying writer down so the peer observes end of stream.
	async fn close(&mut self) -> Result<()>;
}

/// Receiving half of a transport.
#[async_trait]
pub trait TransportReceiver: Send {
	/// Reads frames until end of stream.
	///
	/// Returns `Ok(())` when the stream ends cleanly at a frame boundary or the
	/// consumer went away, and an error when the stream breaks mid-frame.
	async fn run(&mut self) -> Result<()>;
}

/// Both halves of a transport plus the channel carrying decoded messages.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Encodes a message into one frame.
pub fn encode_frame(message: &Value) -> Result<Vec<u8>> {
	let body = serde_json::to_vec(message)?;
	let length = u32::try_from(body.len())
		.ok()
		.filter(|len| *len as usize <= MAX_FRAME_LEN)
		.ok_or_else(|| {
			Error::TransportError(format!(
				"Message of {} bytes exceeds the {MAX_FRAME_LEN} byte frame limit",
				body.len()
			))
		})?;

	let mut frame = Vec::with_capacity(4 + body.len());
	frame.extend_from_slice(&length.to_le_bytes());
	frame.extend_from_slice(&body);
	Ok(frame)
}

/// Reads one frame body.
///
/// Returns `None` on a clean end of stream before the first length byte.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
	let mut len_buf = [0u8; 4];
	let mut filled = 0;
	while filled < len_buf.len() {
		let n = reader
			.read(&mut len_buf[filled..])
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;
		if n == 0 {
			if filled == 0 {
				return Ok(None);
			}
			return Err(Error::TransportError(format!(
				"Failed to read length prefix: stream ended after {filled} of 4 bytes"
			)));
		}
		filled += n;
	}

	let length = u32::from_le_bytes(len_buf) as usize;
	if length > MAX_FRAME_LEN {
		return Err(Error::TransportError(format!(
			"Frame of {length} bytes exceeds the {MAX_FRAME_LEN} byte frame limit"
		)));
	}

	let mut body = vec![0u8; length];
	reader
		.read_exact(&mut body)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to read message body: {e}")))?;
	Ok(Some(body))
}

/// Transport over a writer/reader pair (stdio, duplex pipes, worker ports).
pub struct PipeTransport<W, R> {
	sender: PipeTransportSender<W>,
	receiver: PipeTransportReceiver<R>,
}

/// Writer half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	writer: W,
}

/// Reader half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `writer` and reading from `reader`.
	///
	/// Returns the transport and the receiver of decoded messages.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				sender: PipeTransportSender { writer },
				receiver: PipeTransportReceiver { reader, message_tx },
			},
			message_rx,
		)
	}

	/// Reads frames until end of stream (see [`TransportReceiver::run`]).
	pub async fn run(&mut self) -> Result<()> {
		self.receiver.run().await
	}

	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(self.sender, self.receiver)
	}

	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		TransportParts {
			sender: Box::new(self.sender),
			receiver: Box::new(self.receiver),
			message_rx,
		}
	}
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Transport for PipeTransportSender<W> {
	async fn send(&mut self, message: Value) -> Result<()> {
		let frame = encode_frame(&message)?;
		self.writer
			.write_all(&frame)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to write message: {e}")))?;
		self.writer
			.flush()
			.await
			.map_err(|e| Error::TransportError(format!("Failed to flush message: {e}")))?;
		Ok(())
	}

	async fn close(&mut self) -> Result<()> {
		self.writer.shutdown().await?;
		Ok(())
	}
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReceiver for PipeTransportReceiver<R> {
	async fn run(&mut self) -> Result<()> {
		while let Some(body) = read_frame(&mut self.reader).await? {
			match serde_json::from_slice::<Value>(&body) {
				Ok(message) => {
					if self.message_tx.send(message).is_err() {
						tracing::debug!("Message consumer dropped; stopping transport reader");
						return Ok(());
					}
				}
				Err(e) => {
					tracing::warn!(error = %e, len = body.len(), "Skipping frame with invalid JSON body");
				}
			}
		}
		tracing::debug!("Transport reached end of stream");
		Ok(())
	}
}
