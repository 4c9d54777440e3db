use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use usb_portal::DeviceCandidate;

#[derive(Parser, Debug)]
#[command(name = "usb-portal")]
#[command(about = "Request access to USB devices through the desktop portal")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Broker bridge command: program followed by its arguments
	#[arg(long, global = true, env = "USB_PORTAL_BROKER", value_name = "CMD")]
	pub broker: Option<String>,

	/// Config file (default: $XDG_CONFIG_HOME/usb-portal/config.json)
	#[arg(long, global = true, env = "USB_PORTAL_CONFIG", value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Request a session, print the devices it grants, and close it
	Devices(RequestArgs),

	/// Request a session and print its devices every time they change
	Watch(RequestArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RequestArgs {
	/// Ask for every device the portal is willing to share
	#[arg(long, conflicts_with = "devices")]
	pub all: bool,

	/// Ask for a specific device, as hex VID:PID (repeatable)
	#[arg(long = "device", value_name = "VID:PID")]
	pub devices: Vec<DeviceCandidate>,

	/// Reason shown in the consent dialog
	#[arg(long)]
	pub reason: Option<String>,

	/// Exported handle of the window to attach the dialog to
	#[arg(long, env = "USB_PORTAL_PARENT", value_name = "HANDLE")]
	pub parent: Option<String>,

	/// Print JSON instead of a table
	#[arg(long)]
	pub json: bool,
}

impl Commands {
	pub fn request_args(&self) -> &RequestArgs {
		match self {
			Commands::Devices(args) | Commands::Watch(args) => args,
		}
	}
}
