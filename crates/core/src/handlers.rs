//! Observer lists for session lifecycle notifications.
//!
//! Handlers live in an [`IndexMap`] keyed by [`HandlerId`], so removal is O(1)
//! and notification follows registration order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Unique identifier for registered handlers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub(crate) fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Callback run once when a session closes.
pub type ClosedHandler = Arc<dyn Fn() + Send + Sync>;

/// Registered handlers in registration order.
pub(crate) struct HandlerList<F> {
	handlers: Arc<Mutex<IndexMap<HandlerId, F>>>,
}

impl<F: Clone + Send + 'static> HandlerList<F> {
	pub(crate) fn new() -> Self {
		Self {
			handlers: Arc::new(Mutex::new(IndexMap::new())),
		}
	}

	pub(crate) fn add(&self, handler: F) -> Subscription {
		let id = next_handler_id();
		self.handlers.lock().insert(id, handler);

		let weak: Weak<Mutex<IndexMap<HandlerId, F>>> = Arc::downgrade(&self.handlers);
		Subscription::new(
			id,
			Arc::new(move |id| {
				if let Some(map) = weak.upgrade() {
					map.lock().shift_remove(&id);
				}
			}),
		)
	}

	/// Removes and returns every handler, for one-shot notifications.
	pub(crate) fn drain(&self) -> Vec<F> {
		self.handlers.lock().drain(..).map(|(_, handler)| handler).collect()
	}

	pub(crate) fn len(&self) -> usize {
		self.handlers.lock().len()
	}
}

/// RAII handle that unregisters a handler on drop.
///
/// Holds a weak reference to the handler list, so dropping it after the
/// owning session is gone is a no-op.
#[must_use = "the handler is removed when the subscription is dropped"]
pub struct Subscription {
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(HandlerId) + Send + Sync>>,
}

/// Returned by [`UsbSession::on_closed`](crate::UsbSession::on_closed).
pub type ClosedSubscription = Subscription;

impl Subscription {
	fn new(id: HandlerId, dropper: Arc<dyn Fn(HandlerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Keeps the handler registered for as long as its list exists.
	pub fn detach(mut self) {
		self.dropper = None;
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}
