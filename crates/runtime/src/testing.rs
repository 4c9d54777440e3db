//! In-memory doubles for testing code that talks to the bus.
//!
//! - [`FakeTransportBuilder`] builds a transport for a real
//!   [`Connection`](crate::Connection) whose traffic is driven by a
//!   [`FakeTransportController`].
//! - [`RecordingBus`] implements [`Bus`] directly: calls are recorded and
//!   answered immediately, signals are dispatched synchronously by
//!   [`RecordingBus::emit`].
//!
//! # Example
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let connection = Arc::new(Connection::new(parts));
//! tokio::spawn({
//!     let conn = Arc::clone(&connection);
//!     async move { conn.run().await }
//! });
//!
//! let hello = tokio::spawn({
//!     let conn = Arc::clone(&connection);
//!     async move { conn.hello().await }
//! });
//! let sent = controller.next_sent().await;
//! controller.inject_reply(sent["serial"].as_u64().unwrap() as u32, json!([":1.7"]));
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Mutex as TokioMutex, Notify, mpsc, watch};

use crate::bus::{Bus, CallFuture, MethodCall, Signal, SignalHandler, SignalRule, SubscriptionId};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Builder for creating fake transport instances.
#[derive(Default)]
pub struct FakeTransportBuilder {}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self {}
	}

	/// Builds the fake transport, returning the parts for a
	/// [`Connection`](crate::Connection) and the controller that drives it.
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let (sent_tx, sent_rx) = mpsc::unbounded_channel();
		let sent_messages = Arc::new(TokioMutex::new(Vec::new()));

		let sender = FakeTransportSender {
			sent: Arc::clone(&sent_messages),
			sent_tx,
		};

		let receiver = FakeTransportReceiver {
			inbound_rx,
			message_tx,
		};

		let controller = FakeTransportController {
			inbound_tx,
			sent: sent_messages,
			sent_rx: TokioMutex::new(sent_rx),
		};

		let parts = TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		};

		(parts, controller)
	}
}

/// Controller for injecting inbound traffic and inspecting sent frames.
pub struct FakeTransportController {
	inbound_tx: mpsc::UnboundedSender<Value>,
	sent: Arc<TokioMutex<Vec<Value>>>,
	sent_rx: TokioMutex<mpsc::UnboundedReceiver<Value>>,
}

impl FakeTransportController {
	/// Injects a raw inbound frame.
	pub fn inject(&self, message: Value) {
		let _ = self.inbound_tx.send(message);
	}

	pub fn inject_reply(&self, serial: u32, body: Value) {
		self.inject(serde_json::json!({
			"reply_serial": serial,
			"body": body
		}));
	}

	pub fn inject_error(&self, serial: u32, name: &str, message: &str) {
		self.inject(serde_json::json!({
			"reply_serial": serial,
			"error": {
				"name": name,
				"message": message
			}
		}));
	}

	pub fn inject_signal(&self, path: &str, interface: &str, member: &str, body: Value) {
		self.inject(serde_json::json!({
			"path": path,
			"interface": interface,
			"member": member,
			"body": body
		}));
	}

	/// Takes all sent frames, clearing the buffer.
	pub async fn take_sent(&self) -> Vec<Value> {
		std::mem::take(&mut *self.sent.lock().await)
	}

	/// Waits for the next frame written by the connection.
	///
	/// Independent of [`take_sent`](Self::take_sent): every frame is seen by both.
	pub async fn next_sent(&self) -> Option<Value> {
		self.sent_rx.lock().await.recv().await
	}

	/// Closes the inbound side, as if the broker went away.
	pub fn disconnect(self) {
		drop(self.inbound_tx);
	}
}

struct FakeTransportSender {
	sent: Arc<TokioMutex<Vec<Value>>>,
	sent_tx: mpsc::UnboundedSender<Value>,
}

impl Transport for FakeTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		let sent = Arc::clone(&self.sent);
		let _ = self.sent_tx.send(message.clone());
		Box::pin(async move {
			sent.lock().await.push(message);
			Ok(())
		})
	}
}

struct FakeTransportReceiver {
	inbound_rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for FakeTransportReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(message) = self.inbound_rx.recv().await {
				if self.message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}

/// A call seen by [`RecordingBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
	pub call: MethodCall,
	pub no_reply: bool,
}

/// [`Bus`] implementation that records calls and dispatches signals inline.
///
/// Calls succeed immediately with an empty reply unless a failure was queued
/// with [`fail_next_call`](Self::fail_next_call).
pub struct RecordingBus {
	unique_name: String,
	next_id: AtomicU64,
	subscriptions: Mutex<IndexMap<SubscriptionId, (SignalRule, SignalHandler)>>,
	calls: Mutex<Vec<RecordedCall>>,
	failures: Mutex<VecDeque<Error>>,
	call_recorded: Notify,
	disconnected: watch::Sender<bool>,
}

impl RecordingBus {
	pub fn new(unique_name: impl Into<String>) -> Self {
		Self {
			unique_name: unique_name.into(),
			next_id: AtomicU64::new(1),
			subscriptions: Mutex::new(IndexMap::new()),
			calls: Mutex::new(Vec::new()),
			failures: Mutex::new(VecDeque::new()),
			call_recorded: Notify::new(),
			disconnected: watch::channel(false).0,
		}
	}

	/// Marks the bus as gone, as a dead connection would.
	pub fn disconnect(&self) {
		self.disconnected.send_replace(true);
	}

	/// Dispatches `signal` to every matching handler, in subscription order.
	///
	/// Returns the number of handlers invoked.
	pub fn emit(&self, signal: Signal) -> usize {
		let handlers: Vec<SignalHandler> = self
			.subscriptions
			.lock()
			.values()
			.filter(|(rule, _)| rule.matches(&signal))
			.map(|(_, handler)| Arc::clone(handler))
			.collect();

		for handler in &handlers {
			handler(&signal);
		}
		handlers.len()
	}

	pub fn emit_signal(&self, path: &str, interface: &str, member: &str, body: Value) -> usize {
		self.emit(Signal {
			path: path.into(),
			interface: interface.into(),
			member: member.into(),
			body,
		})
	}

	/// Makes the next [`Bus::call`] fail with `error`.
	pub fn fail_next_call(&self, error: Error) {
		self.failures.lock().push_back(error);
	}

	pub fn calls(&self) -> Vec<RecordedCall> {
		self.calls.lock().clone()
	}

	/// Recorded calls whose member is `member`, in issue order.
	pub fn calls_to(&self, member: &str) -> Vec<RecordedCall> {
		self.calls
			.lock()
			.iter()
			.filter(|c| c.call.member == member)
			.cloned()
			.collect()
	}

	pub fn subscription_count(&self) -> usize {
		self.subscriptions.lock().len()
	}

	pub fn has_subscription(&self, interface: &str, member: &str, path: &str) -> bool {
		let rule = SignalRule::new(interface, member, path);
		self.subscriptions.lock().values().any(|(r, _)| *r == rule)
	}

	/// Waits until a call to `member` has been recorded and returns the first one.
	pub async fn wait_for_call(&self, member: &str) -> MethodCall {
		loop {
			let notified = self.call_recorded.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			if let Some(recorded) = self.calls_to(member).into_iter().next() {
				return recorded.call;
			}
			notified.await;
		}
	}

	fn record(&self, call: MethodCall, no_reply: bool) {
		self.calls.lock().push(RecordedCall { call, no_reply });
		self.call_recorded.notify_waiters();
	}
}

impl Bus for RecordingBus {
	fn unique_name(&self) -> Option<&str> {
		Some(&self.unique_name)
	}

	fn call(&self, call: MethodCall) -> CallFuture<'_> {
		self.record(call, false);
		let result = match self.failures.lock().pop_front() {
			Some(error) => Err(error),
			None => Ok(Value::Array(Vec::new())),
		};
		Box::pin(async move { result })
	}

	fn call_no_reply(&self, call: MethodCall) -> Result<()> {
		self.record(call, true);
		Ok(())
	}

	fn subscribe(&self, rule: SignalRule, handler: SignalHandler) -> SubscriptionId {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
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
