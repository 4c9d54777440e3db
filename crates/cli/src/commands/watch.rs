use anyhow::{Context, Result};
use usb_portal::{Cancellable, UsbPortal};

use super::{PortalConnection, cancel_on_ctrl_c};
use crate::config::Settings;
use crate::output;

pub async fn run(settings: &Settings) -> Result<()> {
	let connection = PortalConnection::open(settings).await?;
	let outcome = watch(&connection.portal, settings).await;
	connection.shutdown().await?;
	outcome
}

async fn watch(portal: &UsbPortal, settings: &Settings) -> Result<()> {
	let cancellable = Cancellable::new();
	let interrupt = cancel_on_ctrl_c(&cancellable);
	let session = portal.create_session(settings.session_options(cancellable)).await;
	interrupt.abort();
	let session = session.context("requesting USB access")?;

	let mut changes = session.changes();
	let generation = *changes.borrow_and_update();
	output::print_snapshot(generation, &session.devices(), settings.json)?;

	loop {
		tokio::select! {
			changed = changes.changed() => {
				if changed.is_err() {
					break;
				}
				if session.is_closed() {
					tracing::warn!("Session closed by the portal or the connection was lost");
					break;
				}
				let generation = *changes.borrow_and_update();
				output::print_snapshot(generation, &session.devices(), settings.json)?;
			}
			_ = tokio::signal::ctrl_c() => {
				tracing::info!("Interrupted");
				break;
			}
		}
	}

	session.close();
	Ok(())
}
