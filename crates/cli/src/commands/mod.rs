pub mod devices;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use usb_portal::{Cancellable, UsbPortal};
use usb_portal_runtime::{BrokerProcess, Connection};

use crate::cli::{Cli, Commands};
use crate::config::{CliConfig, Settings};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = CliConfig::load(cli.config.as_deref())?;
	let settings = Settings::resolve(cli.broker.as_deref(), cli.command.request_args(), &config)?;

	match cli.command {
		Commands::Devices(_) => devices::run(&settings).await,
		Commands::Watch(_) => watch::run(&settings).await,
	}
}

/// A running broker bridge and the portal client talking to it.
pub(crate) struct PortalConnection {
	pub portal: UsbPortal,
	connection: Arc<Connection>,
	broker: BrokerProcess,
}

impl PortalConnection {
	pub async fn open(settings: &Settings) -> Result<Self> {
		let mut broker = BrokerProcess::launch(&settings.broker_program, &settings.broker_args)
			.await
			.with_context(|| format!("starting broker '{}'", settings.broker_program))?;

		let parts = broker.into_transport_parts()?;
		let connection = Arc::new(Connection::new(parts));
		tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.run().await }
		});

		let name = connection.hello().await.context("greeting the bus")?;
		tracing::info!(unique_name = %name, "Connected to portal bus");

		Ok(Self {
			portal: UsbPortal::new(connection.clone()),
			connection,
			broker,
		})
	}

	/// Flushes outstanding calls and stops the bridge.
	pub async fn shutdown(self) -> Result<()> {
		self.connection.close();
		self.broker.shutdown().await.context("stopping broker")?;
		Ok(())
	}
}

/// Cancels `cancellable` on Ctrl-C. Abort the returned task once the request resolves.
pub(crate) fn cancel_on_ctrl_c(cancellable: &Cancellable) -> tokio::task::JoinHandle<()> {
	let cancellable = cancellable.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::info!("Interrupted, cancelling request");
			cancellable.cancel();
		}
	})
}
