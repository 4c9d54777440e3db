use anyhow::{Context, Result};
use usb_portal::{Cancellable, UsbPortal};

use super::{PortalConnection, cancel_on_ctrl_c};
use crate::config::Settings;
use crate::output;

pub async fn run(settings: &Settings) -> Result<()> {
	let connection = PortalConnection::open(settings).await?;
	let outcome = list(&connection.portal, settings).await;
	connection.shutdown().await?;
	outcome
}

async fn list(portal: &UsbPortal, settings: &Settings) -> Result<()> {
	let cancellable = Cancellable::new();
	let interrupt = cancel_on_ctrl_c(&cancellable);
	let session = portal.create_session(settings.session_options(cancellable)).await;
	interrupt.abort();

	let session = session.context("requesting USB access")?;
	output::print_devices(&session.devices(), settings.json)?;
	session.close();
	Ok(())
}
