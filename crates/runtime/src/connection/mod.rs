//! Bus connection over a framed transport.
//!
//! This module implements method-call correlation and signal dispatch on top
//! of a [`Transport`]. It handles:
//! - Generating unique call serials
//! - Correlating replies with pending calls
//! - Distinguishing signals from replies
//! - Dispatching signals to subscribers, in arrival order
//!
//! # Message Flow
//!
//! 1. Client calls [`Bus::call`] with a [`MethodCall`]
//! 2. Connection assigns a serial and creates a oneshot channel
//! 3. The call is serialized and queued for the writer task
//! 4. Client awaits on the oneshot receiver (steps 1-3 happen before
//!    [`Bus::call`] returns, so calls reach the wire in issue order)
//! 5. The dispatch loop receives the reply and sends it via the oneshot
//!
//! Signals take the same dispatch loop: matching handlers are invoked inline,
//! one signal at a time, so a subscriber never observes reordering.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use indexmap::IndexMap;
use parking_lot::Mutex as ParkingLotMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{mpsc, oneshot, watch};
use usb_portal_protocol::names::{BUS_DRIVER_INTERFACE, BUS_DRIVER_NAME, BUS_DRIVER_PATH, HELLO};

use crate::bus::{Bus, CallFuture, MethodCall, Signal, SignalHandler, SignalRule, SubscriptionId};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Outbound method call frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Serial the reply is correlated by
	pub serial: u32,
	#[serde(flatten)]
	pub call: MethodCall,
	/// Set when no reply is expected
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub no_reply: bool,
}

/// Inbound reply frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
	/// Serial of the call this reply answers
	pub reply_serial: u32,
	/// Success body (mutually exclusive with error)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<Value>,
	/// Error (mutually exclusive with body)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

/// Error carried by a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub name: String,
	#[serde(default)]
	pub message: String,
}

/// Discriminated union of inbound frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Reply frame (has `reply_serial`)
	Reply(Reply),
	/// Signal frame
	Signal(Signal),
	/// Unknown frame (forward-compatible catch-all)
	Unknown(Value),
}

/// Pending call callbacks keyed by serial.
///
/// Held under a synchronous lock so a call is registered and queued before
/// [`Bus::call`] returns.
type CallbackMap = Arc<ParkingLotMutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

type SubscriptionTable = IndexMap<SubscriptionId, (SignalRule, SignalHandler)>;

/// RAII guard ensuring callback cleanup when a call future is dropped.
struct CancelGuard {
	serial: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(serial: u32, callbacks: CallbackMap) -> Self {
		Self {
			serial,
			callbacks,
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

		if self.callbacks.lock().remove(&self.serial).is_some() {
			tracing::debug!(serial = self.serial, "CancelGuard: removed orphaned callback");
		}
	}
}

/// Reply half of an issued call, with automatic cancellation cleanup.
struct ReplyFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ReplyFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Connection to the broker's bus.
///
/// Manages call/reply correlation and signal dispatch. Must be driven by
/// [`run`](Self::run) on a spawned task.
pub struct Connection {
	/// Sequential call serial counter
	last_serial: AtomicU32,
	/// Pending call callbacks keyed by serial
	callbacks: CallbackMap,
	/// Channel for sending outbound frames to the writer task
	outbound_tx: mpsc::UnboundedSender<Value>,
	/// Transport sender (taken by run() to start writer task)
	transport_sender: TokioMutex<Option<Box<dyn Transport>>>,
	/// Receiver for incoming frames from transport
	message_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
	/// Receiver half of transport (owned by run loop, only needed once)
	transport_receiver: TokioMutex<Option<Box<dyn TransportReceiver>>>,
	/// Receiver for outbound frames (taken by run() to start writer task)
	outbound_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
	/// Signal subscriptions in registration order
	subscriptions: ParkingLotMutex<SubscriptionTable>,
	next_subscription: AtomicU64,
	/// Unique name assigned by the bus in reply to `Hello`
	unique_name: OnceLock<String>,
	/// Set by [`close`](Self::close); stops the writer once the queue drains
	closing: watch::Sender<bool>,
	/// Set once [`run`](Self::run) has stopped dispatching
	disconnected: watch::Sender<bool>,
}

impl Connection {
	/// Creates a new Connection with the given transport.
	pub fn new(parts: TransportParts) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

		Self {
			last_serial: AtomicU32::new(1),
			callbacks: Arc::new(ParkingLotMutex::new(HashMap::new())),
			outbound_tx,
			transport_sender: TokioMutex::new(Some(sender)),
			message_rx: TokioMutex::new(Some(message_rx)),
			transport_receiver: TokioMutex::new(Some(receiver)),
			outbound_rx: TokioMutex::new(Some(outbound_rx)),
			subscriptions: ParkingLotMutex::new(IndexMap::new()),
			next_subscription: AtomicU64::new(1),
			unique_name: OnceLock::new(),
			closing: watch::channel(false).0,
			disconnected: watch::channel(false).0,
		}
	}

	/// Calls `Hello` on the bus driver and records the unique name it returns.
	///
	/// Requires [`run`](Self::run) to be running. Subsequent calls return the
	/// cached name without bus traffic.
	pub async fn hello(&self) -> Result<String> {
		if let Some(name) = self.unique_name.get() {
			return Ok(name.clone());
		}

		let body = self
			.send_call(MethodCall::new(
				BUS_DRIVER_NAME,
				BUS_DRIVER_PATH,
				BUS_DRIVER_INTERFACE,
				HELLO,
				Value::Array(Vec::new()),
			))
			.await?;

		let name = body
			.get(0)
			.and_then(Value::as_str)
			.ok_or_else(|| Error::ProtocolError(format!("Hello reply without a name: {body}")))?
			.to_string();

		tracing::debug!("Connected to bus as {}", name);
		Ok(self.unique_name.get_or_init(|| name).clone())
	}

	/// Issues a method call and awaits its reply body.
	pub async fn send_call(&self, call: MethodCall) -> Result<Value> {
		self.start_call(call)?.await
	}

	/// Registers the callback and queues the call frame.
	fn start_call(&self, call: MethodCall) -> Result<ReplyFuture> {
		let serial = self.last_serial.fetch_add(1, Ordering::SeqCst);

		tracing::debug!(
			"Calling: serial={}, path='{}', member='{}.{}'",
			serial,
			call.path,
			call.interface,
			call.member
		);

		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(serial, tx);

		let guard = CancelGuard::new(serial, Arc::clone(&self.callbacks));

		self.queue(Request {
			serial,
			call,
			no_reply: false,
		})?;

		Ok(ReplyFuture { rx, guard })
	}

	fn queue(&self, request: Request) -> Result<()> {
		let request_value = serde_json::to_value(&request)?;
		tracing::trace!("Request JSON: {}", request_value);

		if self.outbound_tx.send(request_value).is_err() {
			tracing::error!("Failed to queue call: outbound channel closed");
			return Err(Error::ChannelClosed);
		}
		Ok(())
	}

	/// Runs the read, write and dispatch loops until the transport closes.
	///
	/// Pending calls fail with [`Error::ChannelClosed`] and
	/// [`Bus::disconnected`] flips once it returns.
	pub async fn run(self: &Arc<Self>) {
		let (Some(transport_receiver), Some(mut transport_sender), Some(mut outbound_rx), Some(mut message_rx)) = (
			self.transport_receiver.lock().await.take(),
			self.transport_sender.lock().await.take(),
			self.outbound_rx.lock().await.take(),
			self.message_rx.lock().await.take(),
		) else {
			tracing::error!("Connection::run() called more than once");
			return;
		};

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = transport_receiver.run().await {
				tracing::error!("Transport read error: {}", e);
			}
		});

		let mut closing = self.closing.subscribe();
		let writer_handle = tokio::spawn(async move {
			loop {
				let message = tokio::select! {
					biased;
					message = outbound_rx.recv() => message,
					_ = closing.wait_for(|closing| *closing) => None,
				};
				let Some(message) = message else {
					break;
				};
				if let Err(e) = transport_sender.send(message).await {
					tracing::error!("Transport write error: {}", e);
					return;
				}
			}

			outbound_rx.close();
			while let Ok(message) = outbound_rx.try_recv() {
				if let Err(e) = transport_sender.send(message).await {
					tracing::error!("Transport write error: {}", e);
					return;
				}
			}
			tracing::debug!("Writer stopped, closing transport");
		});

		while let Some(message_value) = message_rx.recv().await {
			match serde_json::from_value::<Message>(message_value) {
				Ok(message) => {
					if let Err(e) = self.dispatch_internal(message).await {
						tracing::error!("Error dispatching message: {}", e);
					}
				}
				Err(e) => {
					tracing::error!("Failed to parse message: {}", e);
				}
			}
		}

		let _ = reader_handle.await;
		writer_handle.abort();

		let pending = {
			let mut callbacks = self.callbacks.lock();
			let pending = callbacks.len();
			callbacks.clear();
			pending
		};
		tracing::debug!(pending, "Connection closed");
		self.disconnected.send_replace(true);
	}

	/// Flushes queued frames and closes the write half of the transport.
	///
	/// The peer sees end-of-stream; [`run`](Self::run) returns once it hangs
	/// up in turn. Calls made afterwards fail with [`Error::ChannelClosed`].
	pub fn close(&self) {
		self.closing.send_replace(true);
	}

	/// Dispatch an incoming message (test-only public version)
	#[cfg(test)]
	pub async fn dispatch(&self, message: Message) -> Result<()> {
		self.dispatch_internal(message).await
	}

	async fn dispatch_internal(&self, message: Message) -> Result<()> {
		match message {
			Message::Reply(reply) => {
				tracing::debug!("Processing reply for serial: {}", reply.reply_serial);
				let callback = self
					.callbacks
					.lock()
					.remove(&reply.reply_serial)
					.ok_or_else(|| {
						Error::ProtocolError(format!(
							"Cannot find call to answer: serial={}",
							reply.reply_serial
						))
					})?;

				let result = match reply.error {
					Some(error) => Err(parse_remote_error(error)),
					None => Ok(reply.body.unwrap_or(Value::Array(Vec::new()))),
				};

				let _ = callback.send(result);
				Ok(())
			}
			Message::Signal(signal) => {
				self.dispatch_signal(&signal);
				Ok(())
			}
			Message::Unknown(value) => {
				tracing::debug!(
					"Unknown message type (forward-compatible, ignored): {}",
					serde_json::to_string(&value).unwrap_or_else(|_| "<serialization failed>".to_string())
				);
				Ok(())
			}
		}
	}

	/// Invokes every matching handler in subscription order.
	///
	/// The table lock is released before handlers run so they may subscribe
	/// or unsubscribe.
	fn dispatch_signal(&self, signal: &Signal) {
		let handlers: Vec<SignalHandler> = self
			.subscriptions
			.lock()
			.values()
			.filter(|(rule, _)| rule.matches(signal))
			.map(|(_, handler)| Arc::clone(handler))
			.collect();

		if handlers.is_empty() {
			tracing::trace!(
				"Signal without subscribers (ignored): path={}, member={}.{}",
				signal.path,
				signal.interface,
				signal.member
			);
			return;
		}

		for handler in handlers {
			handler(signal);
		}
	}
}

/// Converts an [`ErrorPayload`] into [`Error::Remote`].
fn parse_remote_error(error: ErrorPayload) -> Error {
	Error::Remote {
		name: error.name,
		message: error.message,
	}
}

impl Bus for Connection {
	fn unique_name(&self) -> Option<&str> {
		self.unique_name.get().map(String::as_str)
	}

	fn call(&self, call: MethodCall) -> CallFuture<'_> {
		match self.start_call(call) {
			Ok(reply) => Box::pin(reply),
			Err(e) => Box::pin(async move { Err(e) }),
		}
	}

	fn call_no_reply(&self, call: MethodCall) -> Result<()> {
		let serial = self.last_serial.fetch_add(1, Ordering::SeqCst);
		tracing::debug!(
			"Calling without reply: serial={}, path='{}', member='{}.{}'",
			serial,
			call.path,
			call.interface,
			call.member
		);
		self.queue(Request {
			serial,
			call,
			no_reply: true,
		})
	}

	fn subscribe(&self, rule: SignalRule, handler: SignalHandler) -> SubscriptionId {
		let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
		self.subscriptions.lock().insert(id, (rule, handler));
		id
	}

	fn unsubscribe(&self, id: SubscriptionId) {
		self.subscriptions.lock().shift_remove(&id);
	}

	fn disconnected(&self) -> watch::Receiver<bool> {
		self.disconnected.subscribe()
	}
}
