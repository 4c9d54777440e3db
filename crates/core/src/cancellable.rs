//! Caller-side cancellation of pending requests.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Identifier returned by [`Cancellable::connect`].
pub type CancelHandlerId = u64;

type CancelCallback = Box<dyn FnOnce() + Send>;

struct State {
	cancelled: bool,
	next_id: CancelHandlerId,
	handlers: IndexMap<CancelHandlerId, CancelCallback>,
}

struct Inner {
	state: Mutex<State>,
	notify: watch::Sender<bool>,
}

/// A cloneable cancellation flag with synchronous observers.
///
/// Observers run on the thread that calls [`cancel`](Self::cancel), before it
/// returns, in the order they were connected. Each runs at most once.
#[derive(Clone)]
pub struct Cancellable {
	inner: Arc<Inner>,
}

impl Cancellable {
	pub fn new() -> Self {
		let (notify, _) = watch::channel(false);
		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(State {
					cancelled: false,
					next_id: 1,
					handlers: IndexMap::new(),
				}),
				notify,
			}),
		}
	}

	/// Cancels and runs every connected observer. Later calls do nothing.
	pub fn cancel(&self) {
		let handlers = {
			let mut state = self.inner.state.lock();
			if state.cancelled {
				return;
			}
			state.cancelled = true;
			std::mem::take(&mut state.handlers)
		};

		tracing::debug!(observers = handlers.len(), "Cancelled");
		for (_, handler) in handlers {
			handler();
		}
		self.inner.notify.send_replace(true);
	}

	pub fn is_cancelled(&self) -> bool {
		self.inner.state.lock().cancelled
	}

	/// Registers `handler` to run on cancellation.
	///
	/// If already cancelled, `handler` runs immediately and `None` is returned.
	pub fn connect<F>(&self, handler: F) -> Option<CancelHandlerId>
	where
		F: FnOnce() + Send + 'static,
	{
		let mut state = self.inner.state.lock();
		if state.cancelled {
			drop(state);
			handler();
			return None;
		}

		let id = state.next_id;
		state.next_id += 1;
		state.handlers.insert(id, Box::new(handler));
		Some(id)
	}

	/// Removes an observer that has not run yet. Returns whether it was found.
	pub fn disconnect(&self, id: CancelHandlerId) -> bool {
		self.inner.state.lock().handlers.shift_remove(&id).is_some()
	}

	/// Resolves once [`cancel`](Self::cancel) has been called.
	pub async fn cancelled(&self) {
		let mut rx = self.inner.notify.subscribe();
		let _ = rx.wait_for(|cancelled| *cancelled).await;
	}
}

impl Default for Cancellable {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for Cancellable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("Cancellable")
			.field("cancelled", &state.cancelled)
			.field("observers", &state.handlers.len())
			.finish()
	}
}
