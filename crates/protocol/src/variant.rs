//! Tagged variant values and attribute bags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attribute bag (`a{sv}`), ordered by key.
pub type AttributeMap = BTreeMap<String, Variant>;

/// A self-describing value, serialized as a single-key object whose key is
/// the value's type signature.
///
/// ```text
/// {"s": "/dev/bus/usb/001/004"}   {"b": true}   {"q": 1133}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
	#[serde(rename = "b")]
	Bool(bool),
	#[serde(rename = "y")]
	Byte(u8),
	#[serde(rename = "n")]
	Int16(i16),
	#[serde(rename = "q")]
	Uint16(u16),
	#[serde(rename = "i")]
	Int32(i32),
	#[serde(rename = "u")]
	Uint32(u32),
	#[serde(rename = "x")]
	Int64(i64),
	#[serde(rename = "t")]
	Uint64(u64),
	#[serde(rename = "d")]
	Double(f64),
	#[serde(rename = "s")]
	Str(String),
	#[serde(rename = "o")]
	ObjectPath(String),
	/// Homogeneous array (`a…`).
	#[serde(rename = "a")]
	Array(Vec<Variant>),
	/// Tuple (`(…)`).
	#[serde(rename = "r")]
	Struct(Vec<Variant>),
	#[serde(rename = "a{sv}")]
	Dict(AttributeMap),
}

impl Variant {
	/// Returns the type signature this variant is tagged with.
	pub fn signature(&self) -> &'static str {
		match self {
			Variant::Bool(_) => "b",
			Variant::Byte(_) => "y",
			Variant::Int16(_) => "n",
			Variant::Uint16(_) => "q",
			Variant::Int32(_) => "i",
			Variant::Uint32(_) => "u",
			Variant::Int64(_) => "x",
			Variant::Uint64(_) => "t",
			Variant::Double(_) => "d",
			Variant::Str(_) => "s",
			Variant::ObjectPath(_) => "o",
			Variant::Array(_) => "a",
			Variant::Struct(_) => "r",
			Variant::Dict(_) => "a{sv}",
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Variant::Str(s) | Variant::ObjectPath(s) => Some(s),
			_ => None,
		}
	}
}

impl From<&str> for Variant {
	fn from(value: &str) -> Self {
		Variant::Str(value.to_string())
	}
}

impl From<String> for Variant {
	fn from(value: String) -> Self {
		Variant::Str(value)
	}
}

impl From<bool> for Variant {
	fn from(value: bool) -> Self {
		Variant::Bool(value)
	}
}

impl From<u16> for Variant {
	fn from(value: u16) -> Self {
		Variant::Uint16(value)
	}
}

impl From<u32> for Variant {
	fn from(value: u32) -> Self {
		Variant::Uint32(value)
	}
}

impl From<AttributeMap> for Variant {
	fn from(value: AttributeMap) -> Self {
		Variant::Dict(value)
	}
}

/// Types that can be read out of a [`Variant`] without conversion.
///
/// Extraction is strict: a `u16` is only read from a `q` value, never from a
/// wider or signed integer.
pub trait FromVariant: Sized {
	/// Signature of the values this type is read from.
	const SIGNATURE: &'static str;

	fn from_variant(value: &Variant) -> Option<Self>;
}

impl FromVariant for String {
	const SIGNATURE: &'static str = "s";

	fn from_variant(value: &Variant) -> Option<Self> {
		value.as_str().map(str::to_string)
	}
}

impl FromVariant for bool {
	const SIGNATURE: &'static str = "b";

	fn from_variant(value: &Variant) -> Option<Self> {
		match value {
			Variant::Bool(b) => Some(*b),
			_ => None,
		}
	}
}

impl FromVariant for u16 {
	const SIGNATURE: &'static str = "q";

	fn from_variant(value: &Variant) -> Option<Self> {
		match value {
			Variant::Uint16(v) => Some(*v),
			_ => None,
		}
	}
}

impl FromVariant for u32 {
	const SIGNATURE: &'static str = "u";

	fn from_variant(value: &Variant) -> Option<Self> {
		match value {
			Variant::Uint32(v) => Some(*v),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_variant_tagging() {
		assert_eq!(serde_json::to_value(Variant::from("x")).unwrap(), json!({"s": "x"}));
		assert_eq!(serde_json::to_value(Variant::Uint16(7)).unwrap(), json!({"q": 7}));

		let parsed: Variant = serde_json::from_value(json!({"b": true})).unwrap();
		assert_eq!(parsed, Variant::Bool(true));
	}

	#[test]
	fn test_nested_dict() {
		let parsed: AttributeMap = serde_json::from_value(json!({
			"properties": {"a{sv}": {"ID_MODEL": {"s": "Keyboard"}}},
			"readable": {"b": true}
		}))
		.unwrap();

		let Some(Variant::Dict(props)) = parsed.get("properties") else {
			panic!("expected nested dict");
		};
		assert_eq!(props["ID_MODEL"].as_str(), Some("Keyboard"));
		assert_eq!(bool::from_variant(&parsed["readable"]), Some(true));
	}

	#[test]
	fn test_strict_extraction() {
		assert_eq!(u16::from_variant(&Variant::Uint32(7)), None);
		assert_eq!(bool::from_variant(&Variant::Str("true".into())), None);
		assert_eq!(
			String::from_variant(&Variant::ObjectPath("/a".into())),
			Some("/a".to_string())
		);
	}

	#[test]
	fn test_unknown_tag_rejected() {
		assert!(serde_json::from_value::<Variant>(json!({"z": 1})).is_err());
	}
}
