//! Rendering of device lists.

use std::io::{self, Write};

use serde::Serialize;
use usb_portal::Device;
use usb_portal::device::{DEVICE_FILE, PRODUCT_ID, READABLE, VENDOR_ID, WRITABLE};

/// One line of `watch --json` output.
#[derive(Serialize)]
struct Snapshot<'a> {
	generation: u64,
	devices: &'a [Device],
}

pub fn print_devices(devices: &[Device], json: bool) -> io::Result<()> {
	let stdout = io::stdout();
	let mut out = stdout.lock();
	write_devices(&mut out, devices, json)?;
	out.flush()
}

pub fn print_snapshot(generation: u64, devices: &[Device], json: bool) -> io::Result<()> {
	let stdout = io::stdout();
	let mut out = stdout.lock();
	write_snapshot(&mut out, generation, devices, json)?;
	out.flush()
}

pub fn write_devices(out: &mut impl Write, devices: &[Device], json: bool) -> io::Result<()> {
	if json {
		serde_json::to_writer_pretty(&mut *out, devices)?;
		return writeln!(out);
	}

	if devices.is_empty() {
		return writeln!(out, "No devices available");
	}

	for device in devices {
		writeln!(out, "{}", device_line(device))?;
	}
	Ok(())
}

/// `watch` output: one JSON object per line, or a header plus table.
pub fn write_snapshot(out: &mut impl Write, generation: u64, devices: &[Device], json: bool) -> io::Result<()> {
	if json {
		serde_json::to_writer(&mut *out, &Snapshot { generation, devices })?;
		return writeln!(out);
	}

	writeln!(out, "-- {} device(s)", devices.len())?;
	for device in devices {
		writeln!(out, "{}", device_line(device))?;
	}
	Ok(())
}

fn device_line(device: &Device) -> String {
	let ids = match (device.get(&VENDOR_ID), device.get(&PRODUCT_ID)) {
		(Some(vendor), Some(product)) => format!("{vendor:04x}:{product:04x}"),
		_ => "-".to_string(),
	};
	let access = match (device.get(&READABLE), device.get(&WRITABLE)) {
		(Some(true), Some(true)) => "rw",
		(Some(true), _) => "r-",
		(_, Some(true)) => "-w",
		_ => "--",
	};
	let file = device.get(&DEVICE_FILE).unwrap_or_else(|| "-".to_string());

	format!("{}\t{}\t{}\t{}", device.id(), ids, access, file)
}
