//! Entry point: a handle on the broker over one bus connection.

use std::sync::Arc;

use usb_portal_runtime::{Bus, Connection, TransportParts};

use crate::error::Result;
use crate::request::{self, CreateSessionOptions};
use crate::session::UsbSession;

/// Client for the USB portal.
///
/// Cheap to clone. Any number of requests and sessions may be active at the
/// same time over the same bus.
#[derive(Clone)]
pub struct UsbPortal {
	bus: Arc<dyn Bus>,
}

impl UsbPortal {
	/// Wraps an established bus connection. Its unique name must be known.
	pub fn new(bus: Arc<dyn Bus>) -> Self {
		Self { bus }
	}

	/// Starts a [`Connection`] over `parts`, greets the bus, and wraps it.
	///
	/// The connection's dispatch loop runs on a spawned task for as long as
	/// the transport stays open.
	pub async fn connect(parts: TransportParts) -> Result<Self> {
		let connection = Arc::new(Connection::new(parts));
		tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.run().await }
		});

		let name = connection.hello().await?;
		tracing::info!(unique_name = %name, "Connected to portal bus");
		Ok(Self::new(connection))
	}

	pub fn bus(&self) -> &Arc<dyn Bus> {
		&self.bus
	}

	/// Asks the broker for a USB session.
	///
	/// Resolves once the broker answers, the call fails, or the request is
	/// cancelled through [`CreateSessionOptions::cancellable`]. Dropping the
	/// returned future before then cancels the request as well.
	///
	/// # Errors
	///
	/// - [`Error::InvalidArgument`](crate::Error::InvalidArgument) for an
	///   empty candidate list, before anything is sent
	/// - [`Error::Denied`](crate::Error::Denied) if the user declined
	/// - [`Error::CallerCancelled`](crate::Error::CallerCancelled)
	/// - [`Error::BrokerFailure`](crate::Error::BrokerFailure) for other
	///   response codes
	/// - [`Error::MalformedResponse`](crate::Error::MalformedResponse)
	/// - [`Error::Transport`](crate::Error::Transport) if the call fails
	pub async fn create_session(&self, options: CreateSessionOptions) -> Result<UsbSession> {
		request::create_session(&self.bus, options).await
	}
}

impl std::fmt::Debug for UsbPortal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UsbPortal")
			.field("unique_name", &self.bus.unique_name())
			.finish()
	}
}
