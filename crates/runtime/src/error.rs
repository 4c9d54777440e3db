//! Error types for the bus runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to the broker over the bus.
#[derive(Debug, Error)]
pub enum Error {
	/// Failed to launch the broker bridge process.
	#[error("Failed to launch broker: {0}")]
	LaunchFailed(String),

	/// Transport-level error (framing, pipe closed mid-frame).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol-level error (unexpected or unparseable message).
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// The remote side answered a method call with an error.
	#[error("{name}: {message}")]
	Remote {
		/// Error name (e.g. `org.freedesktop.DBus.Error.AccessDenied`)
		name: String,
		/// Human-readable error message
		message: String,
	},

	/// The connection was closed before a reply arrived.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns the error name if this is a Remote error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns true if the connection is gone and no further calls can succeed.
	pub fn is_disconnected(&self) -> bool {
		matches!(self, Error::ChannelClosed | Error::Io(_) | Error::TransportError(_))
	}
}
