//! Wire types for the USB portal broker protocol.
//!
//! This crate holds everything that crosses the bus: well-known names and
//! object paths, the tagged [`Variant`] encoding used for attribute bags, the
//! [`DeviceCandidate`] filter hint, and typed views over the `CreateSession`,
//! `Response` and `DeviceEvents` payloads.
//!
//! Encoding conventions:
//!
//! - Method and signal bodies are JSON arrays, one element per argument.
//! - Arguments with a fixed signature (`s`, `u`, `o`, `a(ssa{sv})`, …) are
//!   plain JSON values.
//! - `v` values are single-key objects tagged with their signature, e.g.
//!   `{"s": "hello"}` or `{"q": 1234}`.

pub mod candidate;
pub mod names;
pub mod token;
pub mod usb;
pub mod variant;

pub use candidate::DeviceCandidate;
pub use token::{new_token, request_path, sender_component, session_path};
pub use usb::{
	AccessMode, CreateSessionArgs, DecodeError, DeviceEvent, DeviceEventKind, DeviceEventsBatch,
	RequestResponse, ResponseCode,
};
pub use variant::{AttributeMap, FromVariant, Variant};
