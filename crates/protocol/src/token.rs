//! Correlation tokens and the object paths derived from them.
//!
//! The broker places the `Response` signal for a request at
//! `REQUEST_PATH_PREFIX/<sender>/<handle_token>` and the session object at
//! `SESSION_PATH_PREFIX/<sender>/<session_handle_token>`, so both paths are
//! known before the call is issued.

use uuid::Uuid;

use crate::names::{REQUEST_PATH_PREFIX, SESSION_PATH_PREFIX};

/// Returns a fresh token, unique per outstanding call.
///
/// Tokens only contain `[A-Za-z0-9_]` so they are valid object path elements.
pub fn new_token() -> String {
	format!("usb_portal_{}", Uuid::new_v4().simple())
}

/// Converts a unique bus name (`:1.42`) into its object path form (`1_42`).
pub fn sender_component(unique_name: &str) -> String {
	unique_name.trim_start_matches(':').replace('.', "_")
}

pub fn request_path(sender: &str, token: &str) -> String {
	format!("{REQUEST_PATH_PREFIX}{sender}/{token}")
}

pub fn session_path(sender: &str, token: &str) -> String {
	format!("{SESSION_PATH_PREFIX}{sender}/{token}")
}
