//! Length-prefixed JSON transport over a pair of byte pipes.
//!
//! Every frame is a 4-byte little-endian length followed by that many bytes
//! of UTF-8 JSON. The broker bridge speaks the same framing on its stdio.
//!
//! A transport is split into a [`Transport`] (write half, owned by the
//! connection's writer task) and a [`TransportReceiver`] (read half, which
//! forwards decoded frames into an unbounded channel in arrival order).

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Upper bound on a single frame; larger prefixes are treated as corruption.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write half of a transport.
pub trait Transport: Send {
	/// Sends one JSON message as a frame.
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
	/// Reads frames until the pipe closes, forwarding each decoded message.
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Everything a [`Connection`](crate::Connection) needs from a transport.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Transport over an arbitrary writer/reader pair, typically the stdin and
/// stdout of a broker bridge process.
pub struct PipeTransport<W, R> {
	stdin: W,
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport and the channel its decoded frames are sent to.
	pub fn new(stdin: W, stdout: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				stdin,
				stdout,
				message_tx,
			},
			message_rx,
		)
	}

	/// Splits into independently owned write and read halves.
	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender { stdin: self.stdin },
			PipeTransportReceiver {
				stdout: self.stdout,
				message_tx: self.message_tx,
			},
		)
	}

	/// Splits into boxed parts ready for [`Connection::new`](crate::Connection::new).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}

	/// Sends one message without splitting the transport.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.stdin, &message).await
	}

	/// Reads frames until the pipe closes or the message channel is dropped.
	pub async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.stdout, &self.message_tx).await
	}
}

/// Write half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	stdin: W,
}

impl<W> Transport for PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send,
{
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { write_frame(&mut self.stdin, &message).await })
	}
}

/// Read half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move { read_frames(&mut self.stdout, &self.message_tx).await })
	}
}

async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let bytes = serde_json::to_vec(message)?;
	if bytes.len() > MAX_FRAME_LEN {
		return Err(Error::TransportError(format!(
			"Outgoing frame of {} bytes exceeds limit",
			bytes.len()
		)));
	}
	let length = bytes.len() as u32;

	writer.write_all(&length.to_le_bytes()).await?;
	writer.write_all(&bytes).await?;
	writer.flush().await?;
	Ok(())
}

async fn read_frames<R>(reader: &mut R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	loop {
		let mut len_buf = [0u8; 4];
		reader
			.read_exact(&mut len_buf)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;

		let length = u32::from_le_bytes(len_buf) as usize;
		if length > MAX_FRAME_LEN {
			return Err(Error::TransportError(format!(
				"Frame length {length} exceeds limit"
			)));
		}

		let mut buf = vec![0u8; length];
		reader
			.read_exact(&mut buf)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read frame body: {e}")))?;

		match serde_json::from_slice::<Value>(&buf) {
			Ok(message) => {
				if message_tx.send(message).is_err() {
					tracing::debug!("Message channel closed, stopping transport reader");
					return Ok(());
				}
			}
			Err(e) => {
				tracing::warn!("Dropping undecodable frame ({} bytes): {}", length, e);
			}
		}
	}
}

#[cfg(test)]
mod tests;
