//! Configuration file and its merge with command-line flags.
//!
//! The file lives at `$XDG_CONFIG_HOME/usb-portal/config.json` unless
//! `--config` points elsewhere:
//!
//! ```json
//! {
//!   "broker": { "command": "usb-portal-bridge", "args": ["--session"] },
//!   "access_mode": "listed-devices",
//!   "reason": "Access your security key"
//! }
//! ```
//!
//! Flags always win over file values.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use usb_portal::{AccessMode, Cancellable, CreateSessionOptions, DeviceCandidate, ExportedHandle};

use crate::cli::RequestArgs;
use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
	pub broker: Option<BrokerConfig>,
	pub access_mode: Option<AccessMode>,
	pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
}

/// Default config location, `None` if the platform has no config directory.
pub fn default_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("usb-portal").join("config.json"))
}

impl CliConfig {
	/// Loads `explicit` if given (it must exist), else the default file if
	/// present, else an empty config.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		match explicit {
			Some(path) => Self::load_from(path),
			None => match default_path() {
				Some(path) if path.exists() => Self::load_from(&path),
				_ => Ok(Self::default()),
			},
		}
	}

	pub fn load_from(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		let config = serde_json::from_str(&content).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})?;
		tracing::debug!(path = %path.display(), "Loaded config");
		Ok(config)
	}
}

/// Everything a command needs, after flags and file are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
	pub broker_program: String,
	pub broker_args: Vec<String>,
	pub access_mode: AccessMode,
	pub candidates: Vec<DeviceCandidate>,
	pub reason: Option<String>,
	pub parent: Option<String>,
	pub json: bool,
}

impl Settings {
	/// `broker` is the `--broker` flag: a program followed by
	/// whitespace-separated arguments.
	pub fn resolve(broker: Option<&str>, args: &RequestArgs, config: &CliConfig) -> Result<Self> {
		let (broker_program, broker_args) = match (broker, &config.broker) {
			(Some(command), _) => {
				let mut words = command.split_whitespace().map(str::to_string);
				let program = words.next().ok_or(CliError::EmptyBrokerCommand)?;
				(program, words.collect())
			}
			(None, Some(broker)) if broker.command.trim().is_empty() => {
				return Err(CliError::EmptyBrokerCommand);
			}
			(None, Some(broker)) => (broker.command.clone(), broker.args.clone()),
			(None, None) => {
				return Err(CliError::NoBroker {
					config: default_path()
						.map(|p| p.display().to_string())
						.unwrap_or_else(|| "the config file".to_string()),
				});
			}
		};

		let access_mode = if args.all {
			AccessMode::All
		} else if !args.devices.is_empty() {
			AccessMode::ListedDevices
		} else {
			config.access_mode.unwrap_or_default()
		};

		Ok(Self {
			broker_program,
			broker_args,
			access_mode,
			candidates: args.devices.clone(),
			reason: args.reason.clone().or_else(|| config.reason.clone()),
			parent: args.parent.clone(),
			json: args.json,
		})
	}

	pub fn session_options(&self, cancellable: Cancellable) -> CreateSessionOptions {
		let mut options = CreateSessionOptions::new()
			.access_mode(self.access_mode)
			.cancellable(cancellable);
		if !self.candidates.is_empty() {
			options = options.candidates(self.candidates.iter().copied());
		}
		if let Some(reason) = &self.reason {
			options = options.reason(reason.clone());
		}
		if let Some(parent) = &self.parent {
			options = options.parent(std::sync::Arc::new(ExportedHandle::new(parent.clone())));
		}
		options
	}
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	fn args() -> RequestArgs {
		RequestArgs {
			all: false,
			devices: Vec::new(),
			reason: None,
			parent: None,
			json: false,
		}
	}

	fn config_with_broker() -> CliConfig {
		CliConfig {
			broker: Some(BrokerConfig {
				command: "bridge".into(),
				args: vec!["--session".into()],
			}),
			access_mode: Some(AccessMode::All),
			reason: Some("from file".into()),
		}
	}

	#[test]
	fn test_load_round_trip() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("config.json");
		let config = config_with_broker();
		fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

		assert_eq!(CliConfig::load(Some(&path)).unwrap(), config);
	}

	#[test]
	fn test_partial_file() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("config.json");
		fs::write(&path, r#"{"access_mode": "all"}"#).unwrap();

		let config = CliConfig::load_from(&path).unwrap();
		assert_eq!(config.access_mode, Some(AccessMode::All));
		assert!(config.broker.is_none());
	}

	#[test]
	fn test_explicit_missing_file_is_error() {
		let tmp = TempDir::new().unwrap();
		let err = CliConfig::load(Some(&tmp.path().join("nope.json"))).unwrap_err();
		assert!(matches!(err, CliError::ConfigRead { .. }));
	}

	#[test]
	fn test_invalid_json_is_error() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("config.json");
		fs::write(&path, "{ not json").unwrap();
		assert!(matches!(CliConfig::load_from(&path), Err(CliError::ConfigParse { .. })));
	}

	#[test]
	fn test_file_values_used_without_flags() {
		let settings = Settings::resolve(None, &args(), &config_with_broker()).unwrap();
		assert_eq!(settings.broker_program, "bridge");
		assert_eq!(settings.broker_args, ["--session"]);
		assert_eq!(settings.access_mode, AccessMode::All);
		assert_eq!(settings.reason.as_deref(), Some("from file"));
	}

	#[test]
	fn test_flags_win() {
		let mut args = args();
		args.devices = vec![DeviceCandidate::new(1, 2)];
		args.reason = Some("from flag".into());

		let settings = Settings::resolve(Some("other-bridge --verbose"), &args, &config_with_broker()).unwrap();
		assert_eq!(settings.broker_program, "other-bridge");
		assert_eq!(settings.broker_args, ["--verbose"]);
		assert_eq!(settings.access_mode, AccessMode::ListedDevices);
		assert_eq!(settings.reason.as_deref(), Some("from flag"));
	}

	#[test]
	fn test_missing_broker() {
		let err = Settings::resolve(None, &args(), &CliConfig::default()).unwrap_err();
		assert!(matches!(err, CliError::NoBroker { .. }));

		let err = Settings::resolve(Some("   "), &args(), &CliConfig::default()).unwrap_err();
		assert!(matches!(err, CliError::EmptyBrokerCommand));
	}

	#[test]
	fn test_default_access_mode() {
		let config = CliConfig {
			access_mode: None,
			..config_with_broker()
		};
		let settings = Settings::resolve(None, &args(), &config).unwrap();
		assert_eq!(settings.access_mode, AccessMode::ListedDevices);
	}
}
