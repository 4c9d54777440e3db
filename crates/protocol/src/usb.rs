//! Typed views over the `org.freedesktop.portal.Usb` payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::candidate::DeviceCandidate;
use crate::variant::{AttributeMap, Variant};

/// Which devices the session may be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
	/// Only devices matching one of the supplied candidates.
	#[default]
	ListedDevices,
	/// Every device the broker is willing to share.
	All,
}

impl AccessMode {
	pub fn as_str(&self) -> &'static str {
		match self {
			AccessMode::ListedDevices => "listed-devices",
			AccessMode::All => "all",
		}
	}
}

impl std::fmt::Display for AccessMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Failure to decode a payload received from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
	#[error("expected {expected}, got {got}")]
	Shape { expected: &'static str, got: String },

	#[error("'{key}' has signature '{got}', expected '{expected}'")]
	Signature {
		key: String,
		expected: &'static str,
		got: &'static str,
	},

	#[error("{0}")]
	Json(String),
}

impl DecodeError {
	fn shape(expected: &'static str, got: &Value) -> Self {
		DecodeError::Shape {
			expected,
			got: truncate(got.to_string()),
		}
	}
}

fn truncate(mut s: String) -> String {
	const MAX: usize = 120;
	if s.len() > MAX {
		let mut end = MAX;
		while !s.is_char_boundary(end) {
			end -= 1;
		}
		s.truncate(end);
		s.push('…');
	}
	s
}

/// Arguments of `CreateSession(s parent_handle, a{sv} options)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionArgs {
	pub parent_handle: String,
	pub handle_token: String,
	pub session_handle_token: String,
	pub access_mode: AccessMode,
	pub reason: Option<String>,
	pub devices: Option<Vec<DeviceCandidate>>,
}

impl CreateSessionArgs {
	/// Builds the `a{sv}` options dictionary.
	pub fn options(&self) -> AttributeMap {
		let mut options = AttributeMap::new();
		options.insert("handle_token".into(), Variant::from(self.handle_token.as_str()));
		options.insert(
			"session_handle_token".into(),
			Variant::from(self.session_handle_token.as_str()),
		);
		options.insert("access_mode".into(), Variant::from(self.access_mode.as_str()));
		if let Some(reason) = &self.reason {
			options.insert("reason".into(), Variant::from(reason.as_str()));
		}
		if let Some(devices) = &self.devices {
			let devices = devices
				.iter()
				.map(|candidate| Variant::Dict(candidate.to_vardict()))
				.collect();
			options.insert("devices".into(), Variant::Array(devices));
		}
		options
	}

	/// Encodes the call body.
	pub fn to_body(&self) -> Value {
		serde_json::json!([self.parent_handle, self.options()])
	}
}

/// Interpretation of the `response` code of a `Response` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
	Success,
	/// The user or the broker declined.
	Cancelled,
	Other(u32),
}

impl From<u32> for ResponseCode {
	fn from(code: u32) -> Self {
		match code {
			0 => ResponseCode::Success,
			1 => ResponseCode::Cancelled,
			other => ResponseCode::Other(other),
		}
	}
}

/// Body of `Response(u response, a{sv} results)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResponse {
	pub response: u32,
	pub results: AttributeMap,
}

impl RequestResponse {
	pub fn from_body(body: &Value) -> Result<Self, DecodeError> {
		let (response, results): (u32, AttributeMap) = serde_json::from_value(body.clone())
			.map_err(|e| DecodeError::Json(format!("Response body: {e}")))?;
		Ok(Self { response, results })
	}

	pub fn code(&self) -> ResponseCode {
		ResponseCode::from(self.response)
	}

	/// Decodes `available_devices` (`a(sa{sv})`).
	///
	/// A missing key is an empty list; a present but malformed one is an error.
	pub fn available_devices(&self) -> Result<Vec<(String, AttributeMap)>, DecodeError> {
		let Some(value) = self.results.get("available_devices") else {
			return Ok(Vec::new());
		};

		let Variant::Array(items) = value else {
			return Err(DecodeError::Signature {
				key: "available_devices".into(),
				expected: "a",
				got: value.signature(),
			});
		};

		items
			.iter()
			.map(|item| match item {
				Variant::Struct(fields) => match fields.as_slice() {
					[id, Variant::Dict(attributes)] => id
						.as_str()
						.map(|id| (id.to_string(), attributes.clone()))
						.ok_or(DecodeError::Signature {
							key: "available_devices[].id".into(),
							expected: "s",
							got: id.signature(),
						}),
					_ => Err(DecodeError::Shape {
						expected: "(sa{sv})",
						got: format!("{} fields", fields.len()),
					}),
				},
				other => Err(DecodeError::Signature {
					key: "available_devices[]".into(),
					expected: "r",
					got: other.signature(),
				}),
			})
			.collect()
	}
}

/// Kind of a single entry in a `DeviceEvents` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEventKind {
	Add,
	Remove,
	/// A kind this client does not understand; ignored by consumers.
	Other(String),
}

impl From<&str> for DeviceEventKind {
	fn from(kind: &str) -> Self {
		match kind {
			"add" => DeviceEventKind::Add,
			"remove" => DeviceEventKind::Remove,
			other => DeviceEventKind::Other(other.to_string()),
		}
	}
}

/// One `(s event, s id, a{sv} attributes)` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
	pub kind: DeviceEventKind,
	pub id: String,
	/// Only meaningful for [`DeviceEventKind::Add`].
	pub attributes: AttributeMap,
}

impl DeviceEvent {
	fn from_value(value: &Value) -> Result<Self, DecodeError> {
		let fields = value
			.as_array()
			.ok_or_else(|| DecodeError::shape("(ssa{sv})", value))?;

		let (kind, id) = match fields.as_slice() {
			[kind, id, ..] => (
				kind.as_str().ok_or_else(|| DecodeError::shape("event string", kind))?,
				id.as_str().ok_or_else(|| DecodeError::shape("id string", id))?,
			),
			_ => return Err(DecodeError::shape("(ssa{sv})", value)),
		};

		let attributes = match fields.get(2) {
			Some(Value::Null) | None => AttributeMap::new(),
			Some(attrs) => serde_json::from_value(attrs.clone())
				.map_err(|e| DecodeError::Json(format!("attributes of '{id}': {e}")))?,
		};

		Ok(Self {
			kind: DeviceEventKind::from(kind),
			id: id.to_string(),
			attributes,
		})
	}
}

/// Body of `DeviceEvents(o session_handle, a(ssa{sv}) events)`.
///
/// Entries are decoded individually so one malformed entry does not cost
/// the rest of the batch; rejected entries are reported in `rejected`.
#[derive(Debug, Clone, Default)]
pub struct DeviceEventsBatch {
	pub session_handle: Option<String>,
	pub events: Vec<DeviceEvent>,
	pub rejected: Vec<DecodeError>,
}

impl DeviceEventsBatch {
	pub fn from_body(body: &Value) -> Result<Self, DecodeError> {
		let args = body.as_array().ok_or_else(|| DecodeError::shape("argument array", body))?;
		let entries = args
			.get(1)
			.and_then(Value::as_array)
			.ok_or_else(|| DecodeError::shape("(oa(ssa{sv}))", body))?;

		let mut batch = DeviceEventsBatch {
			session_handle: args.first().and_then(Value::as_str).map(str::to_string),
			..Default::default()
		};

		for entry in entries {
			match DeviceEvent::from_value(entry) {
				Ok(event) => batch.events.push(event),
				Err(e) => batch.rejected.push(e),
			}
		}

		Ok(batch)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn args(devices: Option<Vec<DeviceCandidate>>) -> CreateSessionArgs {
		CreateSessionArgs {
			parent_handle: "x11:1f".into(),
			handle_token: "req".into(),
			session_handle_token: "sess".into(),
			access_mode: AccessMode::ListedDevices,
			reason: None,
			devices,
		}
	}

	#[test]
	fn test_access_mode_strings() {
		assert_eq!(AccessMode::ListedDevices.as_str(), "listed-devices");
		assert_eq!(AccessMode::All.as_str(), "all");
		assert_eq!(serde_json::to_value(AccessMode::All).unwrap(), json!("all"));
	}

	#[test]
	fn test_create_session_body() {
		let body = args(None).to_body();
		assert_eq!(body[0], "x11:1f");
		assert_eq!(body[1]["handle_token"], json!({"s": "req"}));
		assert_eq!(body[1]["session_handle_token"], json!({"s": "sess"}));
		assert_eq!(body[1]["access_mode"], json!({"s": "listed-devices"}));
		assert!(body[1].get("reason").is_none());
		assert!(body[1].get("devices").is_none());
	}

	#[test]
	fn test_create_session_devices_keep_order() {
		let body = args(Some(vec![
			DeviceCandidate::new(0x1, 0x2),
			DeviceCandidate::new(0x3, 0x4),
		]))
		.to_body();

		assert_eq!(
			body[1]["devices"],
			json!({"a": [
				{"a{sv}": {"product_id": {"q": 2}, "vendor_id": {"q": 1}}},
				{"a{sv}": {"product_id": {"q": 4}, "vendor_id": {"q": 3}}},
			]})
		);
	}

	#[test]
	fn test_response_codes() {
		assert_eq!(ResponseCode::from(0), ResponseCode::Success);
		assert_eq!(ResponseCode::from(1), ResponseCode::Cancelled);
		assert_eq!(ResponseCode::from(2), ResponseCode::Other(2));
	}

	#[test]
	fn test_response_available_devices() {
		let response = RequestResponse::from_body(&json!([0, {
			"available_devices": {"a": [
				{"r": [{"s": "A"}, {"a{sv}": {"readable": {"b": true}}}]},
				{"r": [{"s": "B"}, {"a{sv}": {}}]}
			]}
		}]))
		.unwrap();

		assert_eq!(response.code(), ResponseCode::Success);
		let devices = response.available_devices().unwrap();
		assert_eq!(devices.len(), 2);
		assert_eq!(devices[0].0, "A");
		assert_eq!(devices[0].1["readable"], Variant::Bool(true));
		assert_eq!(devices[1].0, "B");
	}

	#[test]
	fn test_response_missing_devices_is_empty() {
		let response = RequestResponse::from_body(&json!([0, {}])).unwrap();
		assert!(response.available_devices().unwrap().is_empty());
	}

	#[test]
	fn test_response_malformed_devices() {
		let response =
			RequestResponse::from_body(&json!([0, {"available_devices": {"s": "nope"}}])).unwrap();
		assert!(matches!(
			response.available_devices(),
			Err(DecodeError::Signature { .. })
		));

		let response = RequestResponse::from_body(&json!([0, {
			"available_devices": {"a": [{"r": [{"s": "A"}]}]}
		}]))
		.unwrap();
		assert!(response.available_devices().is_err());
	}

	#[test]
	fn test_response_bad_body() {
		assert!(RequestResponse::from_body(&json!({"response": 0})).is_err());
		assert!(RequestResponse::from_body(&json!([-1, {}])).is_err());
	}

	#[test]
	fn test_device_events_batch() {
		let batch = DeviceEventsBatch::from_body(&json!([
			"/org/freedesktop/portal/desktop/session/1_1/s",
			[
				["remove", "A", {}],
				["add", "C", {"writable": {"b": false}}],
				["change", "B", {}],
				["remove", "B"]
			]
		]))
		.unwrap();

		assert_eq!(
			batch.session_handle.as_deref(),
			Some("/org/freedesktop/portal/desktop/session/1_1/s")
		);
		assert_eq!(batch.events.len(), 4);
		assert_eq!(batch.events[0].kind, DeviceEventKind::Remove);
		assert_eq!(batch.events[1].kind, DeviceEventKind::Add);
		assert_eq!(batch.events[1].attributes["writable"], Variant::Bool(false));
		assert_eq!(batch.events[2].kind, DeviceEventKind::Other("change".into()));
		assert!(batch.events[3].attributes.is_empty());
		assert!(batch.rejected.is_empty());
	}

	#[test]
	fn test_device_events_skips_malformed_entries() {
		let batch = DeviceEventsBatch::from_body(&json!([
			"/s",
			[["add"], 42, ["add", "D", {"x": {"zz": 1}}], ["add", "E", {}]]
		]))
		.unwrap();

		assert_eq!(batch.events.len(), 1);
		assert_eq!(batch.events[0].id, "E");
		assert_eq!(batch.rejected.len(), 3);
	}

	#[test]
	fn test_device_events_bad_body() {
		assert!(DeviceEventsBatch::from_body(&json!(["/s"])).is_err());
		assert!(DeviceEventsBatch::from_body(&json!({"events": []})).is_err());
	}
}
