use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub fn init_logging(verbosity: u8) {
	// 0 = warnings only (malformed broker input, failed closes)
	// 1 (-v) = info for the client, warn for bus plumbing
	// 2+ (-vv) = debug for everything, including protocol traffic
	let filter = match verbosity {
		0 => "warn",
		1 => "info,usb_portal_runtime=warn",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(verbosity >= 2)
		.with_level(true)
		.compact()
		.init();
}
