//! Identity of the window a request is made on behalf of.
//!
//! The broker uses the exported handle to attach its consent dialog to the
//! caller's window. Exports are scoped to one request: the handle is
//! unexported when the request resolves, however it resolves.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;

/// Boxed future returned by [`WindowParent::export`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A window that can be exported as a handle string such as `x11:1a2b` or
/// `wayland:<token>`.
pub trait WindowParent: Send + Sync {
	/// Produces a handle for the duration of one request.
	///
	/// Failures should be reported as [`Error::ParentExport`](crate::Error::ParentExport).
	fn export(&self) -> BoxFuture<'_, Result<String>>;

	/// Releases what [`export`](Self::export) acquired.
	fn unexport(&self);
}

/// A handle that is already known, e.g. passed in by a launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedHandle(pub String);

impl ExportedHandle {
	pub fn new(handle: impl Into<String>) -> Self {
		Self(handle.into())
	}
}

impl From<&str> for ExportedHandle {
	fn from(handle: &str) -> Self {
		Self::new(handle)
	}
}

impl std::fmt::Display for ExportedHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl WindowParent for ExportedHandle {
	fn export(&self) -> BoxFuture<'_, Result<String>> {
		let handle = self.0.clone();
		Box::pin(async move { Ok(handle) })
	}

	fn unexport(&self) {}
}

/// Unexports the parent when dropped.
pub(crate) struct ExportedParent {
	parent: Arc<dyn WindowParent>,
	handle: String,
}

impl ExportedParent {
	pub(crate) async fn export(parent: Arc<dyn WindowParent>) -> Result<Self> {
		let handle = parent.export().await?;
		tracing::debug!(%handle, "Exported parent window");
		Ok(Self { parent, handle })
	}

	pub(crate) fn handle(&self) -> &str {
		&self.handle
	}
}

impl Drop for ExportedParent {
	fn drop(&mut self) {
		tracing::debug!(handle = %self.handle, "Unexporting parent window");
		self.parent.unexport();
	}
}
