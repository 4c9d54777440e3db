use std::process::ExitCode;

use clap::Parser;
use usb_portal_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match commands::dispatch(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::from(exit_code(&err))
		}
	}
}

/// 2 when the request was declined or cancelled, 1 for every other failure.
fn exit_code(err: &anyhow::Error) -> u8 {
	match err.downcast_ref::<usb_portal::Error>() {
		Some(e) if e.is_cancelled() => 2,
		_ => 1,
	}
}
