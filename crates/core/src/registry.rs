//! Ordered set of devices currently available to a session.

use crate::device::Device;

/// Devices in arrival order.
///
/// Adds append unconditionally, so a repeated id yields two entries; removes
/// drop only the first entry with a matching id. A later remove for the same
/// id clears the second entry.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
	devices: Vec<Device>,
}

impl DeviceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a registry from the devices listed in a successful response.
	pub fn load(devices: impl IntoIterator<Item = Device>) -> Self {
		Self {
			devices: devices.into_iter().collect(),
		}
	}

	pub fn apply_add(&mut self, device: Device) {
		self.devices.push(device);
	}

	/// Removes the first device with `id`, returning it.
	pub fn apply_remove(&mut self, id: &str) -> Option<Device> {
		let index = self.devices.iter().position(|d| d.id() == id)?;
		Some(self.devices.remove(index))
	}

	/// Point-in-time copy; later changes do not affect it.
	pub fn snapshot(&self) -> Vec<Device> {
		self.devices.clone()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Device> {
		self.devices.iter()
	}

	pub fn len(&self) -> usize {
		self.devices.len()
	}

	pub fn is_empty(&self) -> bool {
		self.devices.is_empty()
	}

	pub fn clear(&mut self) {
		self.devices.clear();
	}
}
