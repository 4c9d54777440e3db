//! Routing of `DeviceEvents` signals into a session's registry.

use std::sync::{Arc, Weak};

use usb_portal_protocol::DeviceEventsBatch;
use usb_portal_protocol::names::{DEVICE_EVENTS, USB_INTERFACE};
use usb_portal_runtime::{Bus, Signal, SignalRule, SignalSubscription};

use crate::session::SessionInner;

/// Owns the `DeviceEvents` subscription at one session handle.
///
/// Batches are decoded entry by entry; malformed entries are logged and
/// skipped, the rest of the batch still applies.
pub(crate) struct EventSubscriber {
	subscription: SignalSubscription,
}

impl EventSubscriber {
	pub(crate) fn attach(bus: &Arc<dyn Bus>, handle: &str, session: Weak<SessionInner>) -> Self {
		let expected_handle = handle.to_string();
		let subscription = SignalSubscription::new(
			bus,
			SignalRule::new(USB_INTERFACE, DEVICE_EVENTS, handle),
			Arc::new(move |signal: &Signal| {
				let Some(session) = session.upgrade() else {
					return;
				};
				deliver(&session, &expected_handle, signal);
			}),
		);
		Self { subscription }
	}
}

impl std::fmt::Debug for EventSubscriber {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventSubscriber")
			.field("subscription", &self.subscription.id())
			.finish()
	}
}

fn deliver(session: &SessionInner, handle: &str, signal: &Signal) {
	let batch = match DeviceEventsBatch::from_body(&signal.body) {
		Ok(batch) => batch,
		Err(e) => {
			tracing::warn!(%handle, "Discarding malformed DeviceEvents signal: {}", e);
			return;
		}
	};

	if let Some(announced) = batch.session_handle.as_deref().filter(|h| *h != handle) {
		tracing::debug!(%handle, %announced, "DeviceEvents names a different session handle");
	}

	for rejected in &batch.rejected {
		tracing::warn!(%handle, "Skipping malformed device event: {}", rejected);
	}

	session.apply_events(batch);
}
