//! Devices offered by a session and typed access to their attributes.

use std::borrow::Cow;
use std::marker::PhantomData;

use serde::Serialize;
use usb_portal_protocol::{AttributeMap, FromVariant, Variant};

/// A USB device the broker has made available to a session.
///
/// Devices are immutable snapshots: the registry replaces entries, it never
/// edits them. Two devices are equal when their ids are, since the id is the
/// only thing the broker guarantees to be stable for a device's lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
	id: String,
	attributes: AttributeMap,
}

impl Device {
	pub fn new(id: impl Into<String>, attributes: AttributeMap) -> Self {
		Self {
			id: id.into(),
			attributes,
		}
	}

	/// Opaque identifier, unique within one session's registry.
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn attributes(&self) -> &AttributeMap {
		&self.attributes
	}

	/// Looks up `key`, returning `None` if it is absent or has a different type.
	///
	/// ```ignore
	/// use usb_portal::device::{DEVICE_FILE, READABLE};
	///
	/// if device.get(&READABLE) == Some(true) {
	///     println!("{:?}", device.get(&DEVICE_FILE));
	/// }
	/// ```
	pub fn get<T: FromVariant>(&self, key: &Attribute<T>) -> Option<T> {
		let value = self.attributes.get(key.name())?;
		let typed = T::from_variant(value);
		if typed.is_none() {
			tracing::trace!(
				device = %self.id,
				key = key.name(),
				expected = T::SIGNATURE,
				got = value.signature(),
				"Attribute has unexpected type"
			);
		}
		typed
	}

	/// Untyped lookup.
	pub fn raw(&self, name: &str) -> Option<&Variant> {
		self.attributes.get(name)
	}
}

impl PartialEq for Device {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for Device {}

/// A named attribute read as `T`.
pub struct Attribute<T> {
	name: Cow<'static, str>,
	_type: PhantomData<fn() -> T>,
}

impl<T> Attribute<T> {
	pub const fn new(name: &'static str) -> Self {
		Self {
			name: Cow::Borrowed(name),
			_type: PhantomData,
		}
	}

	pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
		Self {
			name: name.into(),
			_type: PhantomData,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

impl<T> Clone for Attribute<T> {
	fn clone(&self) -> Self {
		Self {
			name: self.name.clone(),
			_type: PhantomData,
		}
	}
}

impl<T> std::fmt::Debug for Attribute<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Attribute").field(&self.name).finish()
	}
}

/// Object path or id of the parent device.
pub const PARENT: Attribute<String> = Attribute::new("parent");
/// Device node, e.g. `/dev/bus/usb/001/004`.
pub const DEVICE_FILE: Attribute<String> = Attribute::new("device-file");
pub const READABLE: Attribute<bool> = Attribute::new("readable");
pub const WRITABLE: Attribute<bool> = Attribute::new("writable");
pub const VENDOR_ID: Attribute<u16> = Attribute::new("vendor-id");
pub const PRODUCT_ID: Attribute<u16> = Attribute::new("product-id");

pub fn string(name: impl Into<Cow<'static, str>>) -> Attribute<String> {
	Attribute::named(name)
}

pub fn boolean(name: impl Into<Cow<'static, str>>) -> Attribute<bool> {
	Attribute::named(name)
}

pub fn uint16(name: impl Into<Cow<'static, str>>) -> Attribute<u16> {
	Attribute::named(name)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn keyboard() -> Device {
		Device::new(
			"dev-1",
			AttributeMap::from([
				("parent".to_string(), Variant::Str("hub-0".into())),
				("device-file".to_string(), Variant::Str("/dev/bus/usb/001/004".into())),
				("readable".to_string(), Variant::Bool(true)),
				("writable".to_string(), Variant::Bool(false)),
				("vendor-id".to_string(), Variant::Uint16(0x046d)),
				("serial".to_string(), Variant::Uint32(7)),
			]),
		)
	}

	#[test]
	fn test_well_known_keys() {
		let device = keyboard();
		assert_eq!(device.get(&PARENT).as_deref(), Some("hub-0"));
		assert_eq!(device.get(&DEVICE_FILE).as_deref(), Some("/dev/bus/usb/001/004"));
		assert_eq!(device.get(&READABLE), Some(true));
		assert_eq!(device.get(&WRITABLE), Some(false));
		assert_eq!(device.get(&VENDOR_ID), Some(0x046d));
		assert_eq!(device.get(&PRODUCT_ID), None);
	}

	#[test]
	fn test_type_mismatch_is_absent() {
		let device = keyboard();
		assert_eq!(device.get(&boolean("parent")), None);
		assert_eq!(device.get(&uint16("serial")), None);
		assert_eq!(device.get(&string("readable")), None);
		assert!(device.raw("serial").is_some());
	}

	#[test]
	fn test_equality_by_id() {
		let a = keyboard();
		let b = Device::new("dev-1", AttributeMap::new());
		let c = Device::new("dev-2", a.attributes().clone());
		assert_eq!(a, b);
		assert_ne!(a, c);
	}
}
