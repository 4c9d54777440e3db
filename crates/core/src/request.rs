//! The `CreateSession` request and its single outcome.
//!
//! A request moves through four stages:
//!
//! 1. **Parent export**: the optional parent window is exported. Cancellable.
//! 2. **Dispatch**: correlation tokens are generated, the `Response` signal is
//!    subscribed at the predicted request path, the cancellation observer is
//!    connected, and only then is `CreateSession` issued.
//! 3. **Await**: the first of the broker's response, a call failure, or a
//!    caller cancellation decides the outcome.
//! 4. **Teardown**: [`PendingCreateCall`] drops the response subscription,
//!    disconnects the observer and unexports the parent, on every path.
//!
//! The session itself is built inside the `Response` handler, in the bus
//! dispatch context, so its `DeviceEvents` subscription exists before any
//! later signal is dispatched.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use tokio::sync::{oneshot, watch};
use usb_portal_protocol::names::{
	CLOSE, CREATE_SESSION, PORTAL_BUS_NAME, PORTAL_OBJECT_PATH, REQUEST_INTERFACE, RESPONSE,
	SESSION_INTERFACE, USB_INTERFACE,
};
use usb_portal_protocol::{
	AccessMode, CreateSessionArgs, DeviceCandidate, RequestResponse, ResponseCode, new_token,
	request_path, sender_component, session_path,
};
use usb_portal_runtime::{Bus, CallFuture, MethodCall, Signal, SignalRule, SignalSubscription};

use crate::cancellable::{CancelHandlerId, Cancellable};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::parent::{ExportedParent, WindowParent};
use crate::session::UsbSession;

/// Parameters of [`UsbPortal::create_session`](crate::UsbPortal::create_session).
#[derive(Clone, Default)]
pub struct CreateSessionOptions {
	access_mode: AccessMode,
	candidates: Option<Vec<DeviceCandidate>>,
	reason: Option<String>,
	parent: Option<Arc<dyn WindowParent>>,
	cancellable: Option<Cancellable>,
}

impl CreateSessionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn access_mode(mut self, access_mode: AccessMode) -> Self {
		self.access_mode = access_mode;
		self
	}

	/// Devices the caller would like to be offered. Must not be empty.
	pub fn candidates(mut self, candidates: impl IntoIterator<Item = DeviceCandidate>) -> Self {
		self.candidates = Some(candidates.into_iter().collect());
		self
	}

	/// Text shown to the user in the consent dialog.
	pub fn reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());
		self
	}

	pub fn parent(mut self, parent: Arc<dyn WindowParent>) -> Self {
		self.parent = Some(parent);
		self
	}

	pub fn cancellable(mut self, cancellable: Cancellable) -> Self {
		self.cancellable = Some(cancellable);
		self
	}
}

impl std::fmt::Debug for CreateSessionOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CreateSessionOptions")
			.field("access_mode", &self.access_mode)
			.field("candidates", &self.candidates)
			.field("reason", &self.reason)
			.field("parent", &self.parent.is_some())
			.field("cancellable", &self.cancellable)
			.finish()
	}
}

type OutcomeSender = oneshot::Sender<Result<UsbSession>>;

struct SlotState {
	sender: Option<OutcomeSender>,
	dispatched: bool,
}

/// Holds the sender of the single outcome. Whoever takes it first decides.
///
/// The lock is reentrant: a bus that dispatches `Response` from inside
/// [`Bus::call`] resolves the slot on the thread that is dispatching it.
struct OutcomeSlot {
	state: ReentrantMutex<RefCell<SlotState>>,
}

impl OutcomeSlot {
	fn new() -> (Arc<Self>, oneshot::Receiver<Result<UsbSession>>) {
		let (tx, rx) = oneshot::channel();
		let slot = Arc::new(Self {
			state: ReentrantMutex::new(RefCell::new(SlotState {
				sender: Some(tx),
				dispatched: false,
			})),
		});
		(slot, rx)
	}

	/// Issues the call unless the outcome is already decided.
	///
	/// Runs under the slot lock, so a concurrent cancellation either
	/// happens-before (no call) or sees the call as dispatched.
	fn dispatch<'a>(&self, issue: impl FnOnce() -> CallFuture<'a>) -> Option<CallFuture<'a>> {
		let guard = self.state.lock();
		{
			let mut state = guard.borrow_mut();
			if state.sender.is_none() {
				return None;
			}
			state.dispatched = true;
		}
		Some(issue())
	}

	fn is_resolved(&self) -> bool {
		self.state.lock().borrow().sender.is_none()
	}

	/// Delivers the outcome computed by `outcome` if nobody has yet.
	///
	/// `outcome` runs only when this caller wins.
	fn resolve_with(&self, outcome: impl FnOnce() -> Result<UsbSession>) -> bool {
		let Some(sender) = self.state.lock().borrow_mut().sender.take() else {
			return false;
		};
		// An undeliverable session is dropped here, which closes it.
		let _ = sender.send(outcome());
		true
	}

	/// Resolves as cancelled, asking the broker to drop the request if the
	/// call already went out.
	fn cancel(&self, bus: Option<Arc<dyn Bus>>, request_path: &str) -> bool {
		let (sender, dispatched) = {
			let guard = self.state.lock();
			let mut state = guard.borrow_mut();
			let Some(sender) = state.sender.take() else {
				return false;
			};
			(sender, state.dispatched)
		};

		if dispatched {
			if let Some(bus) = bus {
				close_request(bus.as_ref(), request_path);
			}
		}

		let _ = sender.send(Err(Error::CallerCancelled));
		true
	}
}

/// Resources held while a request is outstanding. Dropping it tears them
/// down; dropping it unresolved counts as a caller cancellation.
struct PendingCreateCall {
	bus: Arc<dyn Bus>,
	request_path: String,
	session_handle: String,
	slot: Arc<OutcomeSlot>,
	response: Option<SignalSubscription>,
	cancel_observer: Option<(Cancellable, CancelHandlerId)>,
	parent: Option<ExportedParent>,
}

impl Drop for PendingCreateCall {
	fn drop(&mut self) {
		if self.slot.cancel(Some(Arc::clone(&self.bus)), &self.request_path) {
			tracing::debug!(request = %self.request_path, "Request abandoned");
		}

		self.response.take();
		if let Some((cancellable, id)) = self.cancel_observer.take() {
			cancellable.disconnect(id);
		}
		self.parent.take();

		tracing::trace!(
			request = %self.request_path,
			session = %self.session_handle,
			"Request torn down"
		);
	}
}

/// Runs one `CreateSession` request to its outcome.
pub(crate) async fn create_session(bus: &Arc<dyn Bus>, options: CreateSessionOptions) -> Result<UsbSession> {
	let CreateSessionOptions {
		access_mode,
		candidates,
		reason,
		parent,
		cancellable,
	} = options;

	if candidates.as_ref().is_some_and(Vec::is_empty) {
		return Err(Error::InvalidArgument(
			"candidate device list must not be empty".to_string(),
		));
	}

	if cancellable.as_ref().is_some_and(Cancellable::is_cancelled) {
		return Err(Error::CallerCancelled);
	}

	let sender = bus.unique_name().map(sender_component).ok_or_else(|| {
		Error::Transport(usb_portal_runtime::Error::ProtocolError(
			"connection has no unique name".to_string(),
		))
	})?;

	let parent = match parent {
		Some(parent) => {
			let exported = tokio::select! {
				biased;
				_ = wait_cancelled(cancellable.as_ref()) => return Err(Error::CallerCancelled),
				exported = ExportedParent::export(parent) => exported?,
			};
			Some(exported)
		}
		None => None,
	};

	let args = CreateSessionArgs {
		parent_handle: parent
			.as_ref()
			.map(|p| p.handle().to_string())
			.unwrap_or_default(),
		handle_token: new_token(),
		session_handle_token: new_token(),
		access_mode,
		reason,
		devices: candidates,
	};
	let request_path = request_path(&sender, &args.handle_token);
	let session_handle = session_path(&sender, &args.session_handle_token);

	let (slot, outcome_rx) = OutcomeSlot::new();

	let response = SignalSubscription::new(
		bus,
		SignalRule::new(REQUEST_INTERFACE, RESPONSE, request_path.as_str()),
		response_handler(Arc::downgrade(bus), session_handle.clone(), Arc::clone(&slot)),
	);

	let mut pending = PendingCreateCall {
		bus: Arc::clone(bus),
		request_path: request_path.clone(),
		session_handle: session_handle.clone(),
		slot: Arc::clone(&slot),
		response: Some(response),
		cancel_observer: None,
		parent,
	};

	if let Some(cancellable) = cancellable {
		let slot = Arc::clone(&slot);
		let bus = Arc::downgrade(bus);
		let path = request_path.clone();
		let observer = cancellable.connect(move || {
			if slot.cancel(bus.upgrade(), &path) {
				tracing::debug!(request = %path, "Request cancelled by caller");
			}
		});
		if let Some(id) = observer {
			pending.cancel_observer = Some((cancellable, id));
		}
	}

	tracing::debug!(
		request = %request_path,
		session = %session_handle,
		access_mode = %args.access_mode,
		"Creating USB session"
	);

	let call = MethodCall::new(
		PORTAL_BUS_NAME,
		PORTAL_OBJECT_PATH,
		USB_INTERFACE,
		CREATE_SESSION,
		args.to_body(),
	);
	let reply = slot.dispatch(|| bus.call(call));
	let outcome = await_outcome(&slot, &request_path, reply, outcome_rx, bus.disconnected()).await;

	drop(pending);

	match &outcome {
		Ok(session) => tracing::debug!(session = %session.handle(), "USB session granted"),
		Err(e) => tracing::debug!(request = %request_path, "USB session not granted: {}", e),
	}
	outcome
}

/// Waits for the outcome while watching the call itself and the connection
/// for failure.
async fn await_outcome(
	slot: &OutcomeSlot,
	request_path: &str,
	reply: Option<CallFuture<'_>>,
	mut outcome_rx: oneshot::Receiver<Result<UsbSession>>,
	disconnected: watch::Receiver<bool>,
) -> Result<UsbSession> {
	if let Some(reply) = reply {
		tokio::select! {
			outcome = &mut outcome_rx => return flatten(outcome),
			result = reply => match result {
				Ok(body) => {
					let handle = body.get(0).and_then(serde_json::Value::as_str);
					if handle.is_some_and(|h| h != request_path) {
						tracing::warn!(
							expected = %request_path,
							got = ?handle,
							"Broker returned an unexpected request handle"
						);
					}
				}
				Err(e) => {
					slot.resolve_with(|| Err(Error::Transport(e)));
				}
			},
		}
	}

	tokio::select! {
		outcome = &mut outcome_rx => return flatten(outcome),
		_ = wait_disconnected(disconnected) => {
			if slot.resolve_with(|| Err(Error::Transport(usb_portal_runtime::Error::ChannelClosed))) {
				tracing::debug!(request = %request_path, "Connection lost while awaiting response");
			}
		}
	}

	flatten(outcome_rx.await)
}

pub(crate) async fn wait_disconnected(mut disconnected: watch::Receiver<bool>) {
	let _ = disconnected.wait_for(|gone| *gone).await;
}

fn flatten(outcome: std::result::Result<Result<UsbSession>, oneshot::error::RecvError>) -> Result<UsbSession> {
	outcome.unwrap_or_else(|_| Err(Error::Transport(usb_portal_runtime::Error::ChannelClosed)))
}

async fn wait_cancelled(cancellable: Option<&Cancellable>) {
	match cancellable {
		Some(cancellable) => cancellable.cancelled().await,
		None => std::future::pending().await,
	}
}

/// Handles `Response(u, a{sv})` at the request path.
fn response_handler(
	bus: Weak<dyn Bus>,
	session_handle: String,
	slot: Arc<OutcomeSlot>,
) -> usb_portal_runtime::SignalHandler {
	Arc::new(move |signal: &Signal| {
		if slot.is_resolved() {
			tracing::debug!(path = %signal.path, "Response after the request was resolved, ignored");
			return;
		}
		slot.resolve_with(|| match bus.upgrade() {
			Some(bus) => complete(bus, &session_handle, signal),
			None => Err(Error::Transport(usb_portal_runtime::Error::ChannelClosed)),
		});
	})
}

/// Turns a `Response` signal into the request's outcome.
fn complete(bus: Arc<dyn Bus>, session_handle: &str, signal: &Signal) -> Result<UsbSession> {
	let response =
		RequestResponse::from_body(&signal.body).map_err(|e| Error::MalformedResponse(e.to_string()))?;

	match response.code() {
		ResponseCode::Success => {}
		ResponseCode::Cancelled => return Err(Error::Denied),
		ResponseCode::Other(code) => return Err(Error::BrokerFailure { code }),
	}

	let devices: Vec<Device> = match response.available_devices() {
		Ok(devices) => devices
			.into_iter()
			.map(|(id, attributes)| Device::new(id, attributes))
			.collect(),
		Err(e) => {
			tracing::warn!(session = %session_handle, "Malformed available_devices: {}", e);
			close_session(bus.as_ref(), session_handle);
			return Err(Error::MalformedResponse(e.to_string()));
		}
	};

	Ok(UsbSession::establish(bus, session_handle.to_string(), devices))
}

fn close_request(bus: &dyn Bus, request_path: &str) {
	let call = MethodCall::new(
		PORTAL_BUS_NAME,
		request_path,
		REQUEST_INTERFACE,
		CLOSE,
		serde_json::json!([]),
	);
	if let Err(e) = bus.call_no_reply(call) {
		tracing::warn!(request = %request_path, "Failed to close request: {}", e);
	}
}

fn close_session(bus: &dyn Bus, session_handle: &str) {
	let call = MethodCall::new(
		PORTAL_BUS_NAME,
		session_handle,
		SESSION_INTERFACE,
		CLOSE,
		serde_json::json!([]),
	);
	if let Err(e) = bus.call_no_reply(call) {
		tracing::warn!(session = %session_handle, "Failed to close session: {}", e);
	}
}
