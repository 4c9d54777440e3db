//! Granted sessions and their lifecycle.
//!
//! A [`UsbSession`] is created by [`UsbPortal::create_session`] once the
//! broker grants a request. It owns the device registry and the signal
//! subscriptions that keep it current, and moves from
//! [`SessionState::Active`] to [`SessionState::Closed`] exactly once: by
//! [`UsbSession::close`], by dropping the last handle, when the broker
//! emits `Closed`, or when the bus connection is lost.
//!
//! [`UsbPortal::create_session`]: crate::UsbPortal::create_session

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use usb_portal_protocol::names::{CLOSE, CLOSED, PORTAL_BUS_NAME, SESSION_INTERFACE};
use usb_portal_protocol::{DeviceEventKind, DeviceEventsBatch};
use usb_portal_runtime::{Bus, MethodCall, Signal, SignalRule, SignalSubscription};

use crate::device::Device;
use crate::handlers::{ClosedHandler, ClosedSubscription, HandlerList};
use crate::registry::DeviceRegistry;
use crate::request::wait_disconnected;
use crate::subscriber::EventSubscriber;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Active,
	Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseOrigin {
	/// Closed by this process; the broker has to be told.
	Local,
	/// The broker announced the closure, or can no longer be reached.
	Broker,
}

struct SessionData {
	state: SessionState,
	registry: DeviceRegistry,
	events: Option<EventSubscriber>,
	closed_signal: Option<SignalSubscription>,
}

pub(crate) struct SessionInner {
	handle: String,
	bus: Arc<dyn Bus>,
	data: Mutex<SessionData>,
	closed_handlers: HandlerList<ClosedHandler>,
	state_tx: watch::Sender<SessionState>,
	changes_tx: watch::Sender<u64>,
}

/// A granted session.
///
/// Cheap to clone; all clones share the same state. The session is closed
/// when the last clone is dropped.
#[derive(Clone)]
pub struct UsbSession {
	inner: Arc<SessionInner>,
}

impl UsbSession {
	/// Creates an active session and subscribes it to its signals.
	///
	/// Must run in the bus dispatch context that delivered the grant, so
	/// that no `DeviceEvents` signal can slip in between.
	pub(crate) fn establish(bus: Arc<dyn Bus>, handle: String, devices: Vec<Device>) -> Self {
		let (state_tx, _) = watch::channel(SessionState::Active);
		let (changes_tx, _) = watch::channel(0);
		let device_count = devices.len();

		let inner = Arc::new(SessionInner {
			handle,
			bus,
			data: Mutex::new(SessionData {
				state: SessionState::Active,
				registry: DeviceRegistry::load(devices),
				events: None,
				closed_signal: None,
			}),
			closed_handlers: HandlerList::new(),
			state_tx,
			changes_tx,
		});

		let events = EventSubscriber::attach(&inner.bus, &inner.handle, Arc::downgrade(&inner));
		let closed_signal = SignalSubscription::new(
			&inner.bus,
			SignalRule::new(SESSION_INTERFACE, CLOSED, inner.handle.as_str()),
			closed_signal_handler(Arc::downgrade(&inner)),
		);

		{
			let mut data = inner.data.lock();
			data.events = Some(events);
			data.closed_signal = Some(closed_signal);
		}
		watch_connection(&inner);

		tracing::debug!(handle = %inner.handle, devices = device_count, "Session established");
		Self { inner }
	}

	/// Object path of the session on the broker.
	pub fn handle(&self) -> &str {
		&self.inner.handle
	}

	pub fn state(&self) -> SessionState {
		self.inner.data.lock().state
	}

	pub fn is_closed(&self) -> bool {
		self.state() == SessionState::Closed
	}

	/// Devices currently available, in arrival order. Empty once closed.
	pub fn devices(&self) -> Vec<Device> {
		self.inner.data.lock().registry.snapshot()
	}

	/// Closes the session. Idempotent.
	///
	/// Releases the signal subscriptions, clears the registry, tells the
	/// broker, and notifies [`on_closed`](Self::on_closed) handlers.
	pub fn close(&self) {
		self.inner.close(CloseOrigin::Local);
	}

	/// Registers `handler` to run once when the session closes.
	///
	/// Handlers registered after closure never run; use
	/// [`closed`](Self::closed) to wait regardless of timing.
	pub fn on_closed<F>(&self, handler: F) -> ClosedSubscription
	where
		F: Fn() + Send + Sync + 'static,
	{
		self.inner.closed_handlers.add(Arc::new(handler))
	}

	/// Resolves once the session is closed.
	pub async fn closed(&self) {
		let mut rx = self.inner.state_tx.subscribe();
		let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
	}

	/// Receiver whose value increases every time the device list or the
	/// state changes.
	pub fn changes(&self) -> watch::Receiver<u64> {
		self.inner.changes_tx.subscribe()
	}
}

impl std::fmt::Debug for UsbSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let data = self.inner.data.lock();
		f.debug_struct("UsbSession")
			.field("handle", &self.inner.handle)
			.field("state", &data.state)
			.field("devices", &data.registry.len())
			.finish()
	}
}

impl SessionInner {
	/// Applies one `DeviceEvents` batch in order. Ignored once closed.
	pub(crate) fn apply_events(&self, batch: DeviceEventsBatch) {
		{
			let mut data = self.data.lock();
			if data.state == SessionState::Closed {
				tracing::debug!(handle = %self.handle, "Dropping device events for closed session");
				return;
			}

			for event in batch.events {
				match event.kind {
					DeviceEventKind::Add => {
						tracing::debug!(handle = %self.handle, id = %event.id, "Device added");
						data.registry.apply_add(Device::new(event.id, event.attributes));
					}
					DeviceEventKind::Remove => {
						if data.registry.apply_remove(&event.id).is_some() {
							tracing::debug!(handle = %self.handle, id = %event.id, "Device removed");
						} else {
							tracing::debug!(handle = %self.handle, id = %event.id, "Remove for unknown device");
						}
					}
					DeviceEventKind::Other(kind) => {
						tracing::debug!(handle = %self.handle, id = %event.id, %kind, "Ignoring device event");
					}
				}
			}
		}

		self.changes_tx.send_modify(|generation| *generation += 1);
	}

	fn close(&self, origin: CloseOrigin) {
		let (events, closed_signal) = {
			let mut data = self.data.lock();
			if data.state == SessionState::Closed {
				return;
			}
			data.state = SessionState::Closed;
			data.registry.clear();
			(data.events.take(), data.closed_signal.take())
		};

		// Unsubscribing touches the bus, so it happens outside the lock.
		drop(events);
		drop(closed_signal);

		if origin == CloseOrigin::Local {
			let call = MethodCall::new(
				PORTAL_BUS_NAME,
				self.handle.as_str(),
				SESSION_INTERFACE,
				CLOSE,
				serde_json::json!([]),
			);
			if let Err(e) = self.bus.call_no_reply(call) {
				tracing::warn!(handle = %self.handle, "Failed to close session on the broker: {}", e);
			}
		}

		tracing::debug!(handle = %self.handle, ?origin, "Session closed");
		self.state_tx.send_replace(SessionState::Closed);
		self.changes_tx.send_modify(|generation| *generation += 1);

		for handler in self.closed_handlers.drain() {
			handler();
		}
	}
}

impl Drop for SessionInner {
	fn drop(&mut self) {
		self.close(CloseOrigin::Local);
	}
}

/// Closes the session once the bus connection is gone.
///
/// Without a Tokio runtime nothing is watched; the session then closes only
/// locally or on `Closed`.
fn watch_connection(inner: &Arc<SessionInner>) {
	let Ok(runtime) = tokio::runtime::Handle::try_current() else {
		tracing::debug!(handle = %inner.handle, "No runtime, connection loss will not close the session");
		return;
	};

	let disconnected = inner.bus.disconnected();
	let mut state = inner.state_tx.subscribe();
	let session = Arc::downgrade(inner);
	runtime.spawn(async move {
		tokio::select! {
			_ = async { let _ = state.wait_for(|s| *s == SessionState::Closed).await; } => {}
			_ = wait_disconnected(disconnected) => {
				if let Some(session) = session.upgrade() {
					tracing::debug!(handle = %session.handle, "Bus connection lost");
					session.close(CloseOrigin::Broker);
				}
			}
		}
	});
}

fn closed_signal_handler(session: Weak<SessionInner>) -> usb_portal_runtime::SignalHandler {
	Arc::new(move |_: &Signal| {
		if let Some(session) = session.upgrade() {
			session.close(CloseOrigin::Broker);
		}
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use usb_portal_protocol::names::{DEVICE_EVENTS, USB_INTERFACE};
	use usb_portal_protocol::{AttributeMap, Variant};
	use usb_portal_runtime::testing::RecordingBus;

	use super::*;

	const HANDLE: &str = "/org/freedesktop/portal/desktop/session/1_1/s";

	fn setup(ids: &[&str]) -> (Arc<RecordingBus>, UsbSession) {
		let recording = Arc::new(RecordingBus::new(":1.1"));
		let devices = ids.iter().map(|id| Device::new(*id, AttributeMap::new())).collect();
		let session = UsbSession::establish(recording.clone(), HANDLE.to_string(), devices);
		(recording, session)
	}

	fn ids(session: &UsbSession) -> Vec<String> {
		session.devices().iter().map(|d| d.id().to_string()).collect()
	}

	fn events(recording: &RecordingBus, entries: serde_json::Value) -> usize {
		recording.emit_signal(HANDLE, USB_INTERFACE, DEVICE_EVENTS, json!([HANDLE, entries]))
	}

	#[test]
	fn test_establish_subscribes() {
		let (recording, session) = setup(&["a"]);
		assert!(recording.has_subscription(USB_INTERFACE, DEVICE_EVENTS, HANDLE));
		assert!(recording.has_subscription(SESSION_INTERFACE, CLOSED, HANDLE));
		assert_eq!(session.state(), SessionState::Active);
		assert_eq!(ids(&session), ["a"]);
	}

	#[test]
	fn test_events_apply_in_order() {
		let (recording, session) = setup(&[]);
		events(
			&recording,
			json!([
				["add", "a", {"readable": {"b": true}}],
				["add", "b", {}],
				["remove", "a", {}],
				["add", "a", {}],
			]),
		);
		assert_eq!(ids(&session), ["b", "a"]);
		assert_eq!(session.devices()[1].get(&crate::device::READABLE), None);
	}

	#[test]
	fn test_unknown_kind_and_malformed_entries_are_skipped() {
		let (recording, session) = setup(&["a"]);
		events(
			&recording,
			json!([
				["change", "a", {}],
				[42],
				["add", "b", {"device-file": {"s": "/dev/bus/usb/001/002"}}],
			]),
		);
		assert_eq!(ids(&session), ["a", "b"]);
		assert_eq!(
			session.devices()[1].get(&crate::device::DEVICE_FILE).as_deref(),
			Some("/dev/bus/usb/001/002")
		);
	}

	#[test]
	fn test_close_is_idempotent() {
		let (recording, session) = setup(&["a"]);
		let count = Arc::new(Mutex::new(0));
		let _sub = {
			let count = Arc::clone(&count);
			session.on_closed(move || *count.lock() += 1)
		};

		session.close();
		session.close();

		assert!(session.is_closed());
		assert!(session.devices().is_empty());
		assert_eq!(*count.lock(), 1);
		assert_eq!(recording.calls_to(CLOSE).len(), 1);
		assert_eq!(recording.subscription_count(), 0);
	}

	#[test]
	fn test_events_after_close_are_ignored() {
		let (recording, session) = setup(&[]);
		session.close();
		assert_eq!(events(&recording, json!([["add", "x", {}]])), 0);
		assert!(session.devices().is_empty());
	}

	#[test]
	fn test_in_flight_events_after_close_are_ignored() {
		let (_recording, session) = setup(&[]);
		session.close();

		let batch = DeviceEventsBatch::from_body(&json!([HANDLE, [["add", "x", {}]]])).unwrap();
		session.inner.apply_events(batch);
		assert!(session.devices().is_empty());
	}

	#[test]
	fn test_broker_closed_signal() {
		let (recording, session) = setup(&["a"]);
		let fired = Arc::new(Mutex::new(false));
		let _sub = {
			let fired = Arc::clone(&fired);
			session.on_closed(move || *fired.lock() = true)
		};

		recording.emit_signal(HANDLE, SESSION_INTERFACE, CLOSED, json!([{}]));

		assert!(session.is_closed());
		assert!(*fired.lock());
		assert!(session.devices().is_empty());
		assert!(recording.calls_to(CLOSE).is_empty());

		session.close();
		assert!(recording.calls_to(CLOSE).is_empty());
	}

	#[test]
	fn test_dropped_handler_not_called() {
		let (_recording, session) = setup(&[]);
		let fired = Arc::new(Mutex::new(false));
		let sub = {
			let fired = Arc::clone(&fired);
			session.on_closed(move || *fired.lock() = true)
		};
		drop(sub);
		session.close();
		assert!(!*fired.lock());
	}

	#[test]
	fn test_drop_last_handle_closes() {
		let (recording, session) = setup(&["a"]);
		let clone = session.clone();
		drop(session);
		assert!(recording.calls_to(CLOSE).is_empty());

		drop(clone);
		let closes = recording.calls_to(CLOSE);
		assert_eq!(closes.len(), 1);
		assert_eq!(closes[0].call.path, HANDLE);
		assert!(closes[0].no_reply);
		assert_eq!(recording.subscription_count(), 0);
	}

	#[tokio::test]
	async fn test_closed_future_and_changes() {
		let (recording, session) = setup(&[]);
		let mut changes = session.changes();

		events(&recording, json!([["add", "a", {}]]));
		changes.changed().await.unwrap();
		assert_eq!(*changes.borrow_and_update(), 1);

		let waiter = tokio::spawn({
			let session = session.clone();
			async move { session.closed().await }
		});
		session.close();
		waiter.await.unwrap();
		changes.changed().await.unwrap();
		assert_eq!(*changes.borrow(), 2);
	}

	#[tokio::test]
	async fn test_connection_loss_closes_session() {
		let (recording, session) = setup(&["a"]);
		let count = Arc::new(Mutex::new(0));
		let _sub = {
			let count = Arc::clone(&count);
			session.on_closed(move || *count.lock() += 1)
		};

		recording.disconnect();
		tokio::time::timeout(std::time::Duration::from_secs(5), session.closed())
			.await
			.expect("session should close once the bus is gone");

		assert!(session.devices().is_empty());
		assert_eq!(*count.lock(), 1);
		assert_eq!(recording.subscription_count(), 0);
		assert!(recording.calls_to(CLOSE).is_empty());
	}

	#[tokio::test]
	async fn test_closed_session_ignores_later_disconnect() {
		let (recording, session) = setup(&["a"]);
		session.close();
		assert_eq!(recording.calls_to(CLOSE).len(), 1);

		recording.disconnect();
		tokio::task::yield_now().await;
		assert_eq!(recording.calls_to(CLOSE).len(), 1);
		assert!(session.is_closed());
	}

	#[test]
	fn test_attributes_survive_in_registry() {
		let (recording, session) = setup(&[]);
		events(&recording, json!([["add", "k", {"vendor-id": {"q": 1133}}]]));
		let device = &session.devices()[0];
		assert_eq!(device.get(&crate::device::VENDOR_ID), Some(1133));
		assert_eq!(device.raw("vendor-id"), Some(&Variant::Uint16(1133)));
	}
}
