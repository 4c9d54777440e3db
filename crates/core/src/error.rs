//! Error types for the portal client.

use thiserror::Error;

/// Result type alias for portal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed session request.
#[derive(Debug, Error)]
pub enum Error {
	/// The user or the broker declined the request (response code 1).
	#[error("Request denied by the portal")]
	Denied,

	/// The broker answered with a code other than success or denial.
	#[error("Portal request failed with response code {code}")]
	BrokerFailure { code: u32 },

	/// The caller cancelled before an answer arrived.
	#[error("Request cancelled by the caller")]
	CallerCancelled,

	/// The bus call could not be issued or the connection failed.
	#[error(transparent)]
	Transport(#[from] usb_portal_runtime::Error),

	/// The broker reported success with a payload that could not be decoded.
	#[error("Malformed portal response: {0}")]
	MalformedResponse(String),

	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// The parent window could not be exported.
	#[error("Failed to export parent window: {0}")]
	ParentExport(String),
}

impl Error {
	/// Returns true for outcomes that mean "the request did not go ahead"
	/// rather than "something broke": [`Denied`](Self::Denied) and
	/// [`CallerCancelled`](Self::CallerCancelled).
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Error::Denied | Error::CallerCancelled)
	}

	/// Returns true if the underlying connection is gone.
	pub fn is_disconnected(&self) -> bool {
		matches!(self, Error::Transport(e) if e.is_disconnected())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cancelled_classification() {
		assert!(Error::Denied.is_cancelled());
		assert!(Error::CallerCancelled.is_cancelled());
		assert!(!Error::BrokerFailure { code: 2 }.is_cancelled());
		assert!(!Error::MalformedResponse("x".into()).is_cancelled());
	}

	#[test]
	fn test_transport_conversion() {
		let err: Error = usb_portal_runtime::Error::ChannelClosed.into();
		assert!(err.is_disconnected());
		assert!(!err.is_cancelled());
		assert_eq!(err.to_string(), "Channel closed unexpectedly");
	}
}
