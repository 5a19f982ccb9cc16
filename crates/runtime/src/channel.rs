//! Channel adapter - byte streams over a worker message channel.
//!
//! A [`WorkerPort`] is one end of a point-to-point, postMessage-style channel:
//! whole messages go in, whole messages come out. [`WorkerReader`] and
//! [`WorkerWriter`] present the two directions as `AsyncRead` and `AsyncWrite`
//! so the framed transport can run on top without knowing where the bytes
//! travel. Each `poll_write` posts exactly one message.
//!
//! Closing is never an error for the reader: once the peer's end is gone,
//! reads return EOF and the session treats that as an orderly closure.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{PipeTransport, TransportParts};

/// One end of a bidirectional worker message channel.
pub struct WorkerPort {
	tx: mpsc::UnboundedSender<Vec<u8>>,
	rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl WorkerPort {
	/// Creates two connected ports. What one posts, the other receives.
	pub fn pair() -> (Self, Self) {
		let (a_tx, b_rx) = mpsc::unbounded_channel();
		let (b_tx, a_rx) = mpsc::unbounded_channel();
		(Self { tx: a_tx, rx: a_rx }, Self { tx: b_tx, rx: b_rx })
	}

	/// Posts one message to the peer.
	pub fn post_message(&self, data: impl Into<Vec<u8>>) -> Result<()> {
		self.tx
			.send(data.into())
			.map_err(|_| Error::TransportError("worker port is closed".to_string()))
	}

	/// Receives the next message, or `None` once the peer's end is gone.
	pub async fn recv(&mut self) -> Option<Vec<u8>> {
		self.rx.recv().await
	}

	/// Splits the port into a byte-stream reader and writer.
	pub fn split(self) -> (WorkerReader, WorkerWriter) {
		(
			WorkerReader {
				rx: self.rx,
				chunk: Vec::new(),
				offset: 0,
			},
			WorkerWriter { tx: Some(self.tx) },
		)
	}

	/// Wraps the port in the framed transport used by [`crate::Session`].
	pub fn into_transport_parts(self) -> TransportParts {
		let (reader, writer) = self.split();
		let (transport, message_rx) = PipeTransport::new(writer, reader);
		transport.into_transport_parts(message_rx)
	}
}

/// Reading half of a [`WorkerPort`].
pub struct WorkerReader {
	rx: mpsc::UnboundedReceiver<Vec<u8>>,
	chunk: Vec<u8>,
	offset: usize,
}

impl AsyncRead for WorkerReader {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		loop {
			if self.offset < self.chunk.len() {
				let available = &self.chunk[self.offset..];
				let n = available.len().min(buf.remaining());
				buf.put_slice(&available[..n]);
				self.offset += n;
				return Poll::Ready(Ok(()));
			}

			match self.rx.poll_recv(cx) {
				Poll::Ready(Some(chunk)) => {
					self.chunk = chunk;
					self.offset = 0;
				}
				// Peer is gone: EOF, not an error.
				Poll::Ready(None) => return Poll::Ready(Ok(())),
				Poll::Pending => return Poll::Pending,
			}
		}
	}
}

/// Writing half of a [`WorkerPort`].
pub struct WorkerWriter {
	tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl AsyncWrite for WorkerWriter {
	fn poll_write(
		self: Pin<&mut Self>,
		_cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		let sent = self
			.tx
			.as_ref()
			.is_some_and(|tx| tx.send(buf.to_vec()).is_ok());
		if sent {
			Poll::Ready(Ok(buf.len()))
		} else {
			Poll::Ready(Err(io::Error::new(
				io::ErrorKind::BrokenPipe,
				"worker port is closed",
			)))
		}
	}

	fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Poll::Ready(Ok(()))
	}

	fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		self.tx = None;
		Poll::Ready(Ok(()))
	}
}
