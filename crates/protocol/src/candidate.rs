//! Vendor/product filter hints sent with `CreateSession`.

use serde::{Deserialize, Serialize};

use crate::variant::{AttributeMap, Variant};

/// A vendor/product pair the caller would like to be offered.
///
/// Only meaningful with [`AccessMode::ListedDevices`](crate::AccessMode::ListedDevices),
/// where the broker never offers a device outside the supplied candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceCandidate {
	vendor_id: u16,
	product_id: u16,
}

impl DeviceCandidate {
	pub const fn new(vendor_id: u16, product_id: u16) -> Self {
		Self {
			vendor_id,
			product_id,
		}
	}

	pub fn vendor_id(&self) -> u16 {
		self.vendor_id
	}

	pub fn product_id(&self) -> u16 {
		self.product_id
	}

	/// Encodes the candidate as the `a{sv}` element of the `devices` option.
	pub fn to_vardict(&self) -> AttributeMap {
		AttributeMap::from([
			("vendor_id".to_string(), Variant::Uint16(self.vendor_id)),
			("product_id".to_string(), Variant::Uint16(self.product_id)),
		])
	}
}

impl std::fmt::Display for DeviceCandidate {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
	}
}

impl std::str::FromStr for DeviceCandidate {
	type Err = String;

	/// Parses the `lsusb` style `VID:PID` form, both halves in hex.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (vendor, product) = s
			.split_once(':')
			.ok_or_else(|| format!("expected VID:PID, got '{s}'"))?;
		let parse = |part: &str| {
			u16::from_str_radix(part.trim_start_matches("0x"), 16)
				.map_err(|e| format!("invalid id '{part}': {e}"))
		};
		Ok(Self::new(parse(vendor)?, parse(product)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_candidate_equality() {
		assert_eq!(DeviceCandidate::new(1, 2), DeviceCandidate::new(1, 2));
		assert_ne!(DeviceCandidate::new(1, 2), DeviceCandidate::new(2, 1));
	}

	#[test]
	fn test_candidate_vardict() {
		let dict = DeviceCandidate::new(0x046d, 0xc52b).to_vardict();
		assert_eq!(dict["vendor_id"], Variant::Uint16(0x046d));
		assert_eq!(dict["product_id"], Variant::Uint16(0xc52b));
	}

	#[test]
	fn test_candidate_parse_and_display() {
		let candidate: DeviceCandidate = "046d:c52b".parse().unwrap();
		assert_eq!(candidate, DeviceCandidate::new(0x046d, 0xc52b));
		assert_eq!(candidate.to_string(), "046d:c52b");
		assert!("046d".parse::<DeviceCandidate>().is_err());
		assert!("zz:01".parse::<DeviceCandidate>().is_err());
	}
}
