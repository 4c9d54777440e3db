//! Broker bridge process management.
//!
//! The broker bridge is an external program that owns the real bus
//! connection and relays frames over its stdio using the length-prefixed
//! JSON framing in [`transport`](crate::transport).

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{Error, Result};
use crate::transport::{PipeTransport, TransportParts};

/// How long a freshly spawned bridge gets to fail before it is considered up.
const STARTUP_GRACE: Duration = Duration::from_millis(100);

/// Manages the broker bridge process lifecycle.
#[derive(Debug)]
pub struct BrokerProcess {
	/// The bridge child process
	///
	/// Public so integration tests can reach the pipes. Production code
	/// should go through [`into_transport_parts`](Self::into_transport_parts).
	pub process: Child,
}

impl BrokerProcess {
	/// Launches `program` with `args`, stdin and stdout piped.
	///
	/// # Errors
	///
	/// Returns [`Error::LaunchFailed`] if the process cannot be spawned or
	/// exits during the startup grace period.
	pub async fn launch<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<OsStr>,
	{
		let program = program.as_ref();
		let mut cmd = Command::new(program);
		cmd.args(args)
			.env("USB_PORTAL_CLIENT_VERSION", env!("CARGO_PKG_VERSION"))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true);

		let mut child = cmd.spawn().map_err(|e| {
			Error::LaunchFailed(format!("Failed to spawn {}: {}", program.to_string_lossy(), e))
		})?;

		tokio::time::sleep(STARTUP_GRACE).await;

		match child.try_wait() {
			Ok(Some(status)) => {
				return Err(Error::LaunchFailed(format!(
					"Broker exited immediately with status: {}",
					status
				)));
			}
			Ok(None) => {}
			Err(e) => {
				return Err(Error::LaunchFailed(format!("Failed to check process status: {}", e)));
			}
		}

		tracing::debug!(program = %program.to_string_lossy(), pid = ?child.id(), "Broker launched");
		Ok(Self { process: child })
	}

	/// Takes the stdio pipes and wraps them in a transport.
	///
	/// Can only succeed once per process.
	pub fn into_transport_parts(&mut self) -> Result<TransportParts> {
		let (stdin, stdout): (ChildStdin, ChildStdout) = match (self.process.stdin.take(), self.process.stdout.take()) {
			(Some(stdin), Some(stdout)) => (stdin, stdout),
			_ => return Err(Error::TransportError("Broker stdio already taken".to_string())),
		};

		let (transport, message_rx) = PipeTransport::new(stdin, stdout);
		Ok(transport.into_transport_parts(message_rx))
	}

	/// Shuts the bridge down and waits for it to exit.
	pub async fn shutdown(mut self) -> Result<()> {
		drop(self.process.stdin.take());

		// Closing stdin is the bridge's cue to exit.
		if let Ok(Ok(status)) = tokio::time::timeout(Duration::from_secs(2), self.process.wait()).await {
			tracing::debug!(%status, "Broker exited");
			return Ok(());
		}

		self.kill().await
	}

	/// Force kills the bridge.
	pub async fn kill(mut self) -> Result<()> {
		self.process
			.kill()
			.await
			.map_err(|e| Error::LaunchFailed(format!("Failed to kill process: {}", e)))?;

		let _ = tokio::time::timeout(Duration::from_millis(500), self.process.wait()).await;
		Ok(())
	}
}
