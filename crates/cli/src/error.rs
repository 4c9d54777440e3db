use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("no broker configured: pass --broker, set USB_PORTAL_BROKER, or add \"broker\" to {config}")]
	NoBroker { config: String },

	#[error("broker command is empty")]
	EmptyBrokerCommand,

	#[error("cannot read config file {path}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config file {path}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
}
