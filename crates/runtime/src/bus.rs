//! The bus abstraction the portal client is written against.
//!
//! [`Bus`] is the minimal surface the session protocol needs: a unique name,
//! method calls with and without a reply, and signal subscriptions keyed by
//! interface, member and object path. [`Connection`](crate::Connection)
//! implements it over a pipe transport; tests implement it in memory.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::error::Result;

/// Identifier returned by [`Bus::subscribe`].
pub type SubscriptionId = u64;

/// Callback invoked for every matching signal, from the dispatch context.
///
/// Handlers for one connection never run concurrently with each other and
/// observe signals in arrival order. They must not block.
pub type SignalHandler = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Boxed future returned by [`Bus::call`].
pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// An outbound method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
	pub destination: String,
	pub path: String,
	pub interface: String,
	pub member: String,
	/// Arguments as a JSON array.
	pub body: Value,
}

impl MethodCall {
	pub fn new(
		destination: impl Into<String>,
		path: impl Into<String>,
		interface: impl Into<String>,
		member: impl Into<String>,
		body: Value,
	) -> Self {
		Self {
			destination: destination.into(),
			path: path.into(),
			interface: interface.into(),
			member: member.into(),
			body,
		}
	}
}

/// An inbound signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
	pub path: String,
	pub interface: String,
	pub member: String,
	#[serde(default)]
	pub body: Value,
}

/// Match rule for a signal subscription. All three fields must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalRule {
	pub interface: String,
	pub member: String,
	pub path: String,
}

impl SignalRule {
	pub fn new(
		interface: impl Into<String>,
		member: impl Into<String>,
		path: impl Into<String>,
	) -> Self {
		Self {
			interface: interface.into(),
			member: member.into(),
			path: path.into(),
		}
	}

	pub fn matches(&self, signal: &Signal) -> bool {
		self.path == signal.path && self.member == signal.member && self.interface == signal.interface
	}
}

/// Connection to the message bus.
pub trait Bus: Send + Sync {
	/// The connection's unique name (e.g. `:1.42`), once known.
	fn unique_name(&self) -> Option<&str>;

	/// Issues a method call and resolves with the reply body.
	///
	/// The call is on its way before this returns; the future only waits for
	/// the reply. Dropping it abandons the reply, not the call. Implementations
	/// may dispatch signals synchronously from inside `call`.
	fn call(&self, call: MethodCall) -> CallFuture<'_>;

	/// Queues a method call whose reply is not wanted.
	///
	/// Synchronous so it can be used from `Drop` and from signal handlers.
	fn call_no_reply(&self, call: MethodCall) -> Result<()>;

	/// Registers `handler` for every signal matching `rule`.
	fn subscribe(&self, rule: SignalRule, handler: SignalHandler) -> SubscriptionId;

	/// Removes a subscription. Unknown ids are ignored.
	fn unsubscribe(&self, id: SubscriptionId);

	/// Watch that turns `true` once the connection is gone for good.
	///
	/// No reply or signal is delivered after it flips. A dropped sender
	/// means the same thing.
	fn disconnected(&self) -> watch::Receiver<bool>;
}

/// RAII handle that removes a signal subscription when dropped.
///
/// Holds a weak reference to the bus, so dropping after the connection is
/// gone is a no-op.
pub struct SignalSubscription {
	id: SubscriptionId,
	rule: SignalRule,
	bus: Option<Weak<dyn Bus>>,
}

impl SignalSubscription {
	/// Subscribes `handler` to `rule` on `bus`.
	pub fn new(bus: &Arc<dyn Bus>, rule: SignalRule, handler: SignalHandler) -> Self {
		let id = bus.subscribe(rule.clone(), handler);
		tracing::debug!(id, path = %rule.path, member = %rule.member, "Subscribed to signal");
		Self {
			id,
			rule,
			bus: Some(Arc::downgrade(bus)),
		}
	}

	pub fn id(&self) -> SubscriptionId {
		self.id
	}

	pub fn rule(&self) -> &SignalRule {
		&self.rule
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if let Some(bus) = self.bus.take().and_then(|weak| weak.upgrade()) {
			bus.unsubscribe(self.id);
			tracing::debug!(id = self.id, path = %self.rule.path, member = %self.rule.member, "Unsubscribed from signal");
		}
	}
}

impl Drop for SignalSubscription {
	fn drop(&mut self) {
		self.release();
	}
}

impl std::fmt::Debug for SignalSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SignalSubscription")
			.field("id", &self.id)
			.field("rule", &self.rule)
			.field("active", &self.bus.is_some())
			.finish()
	}
}
