//! Command-line client for the USB desktop portal.
//!
//! ```text
//! usb-portal [-v] [--broker CMD] [--config FILE] devices [--all | --device VID:PID ...] [--json]
//! usb-portal [-v] [--broker CMD] [--config FILE] watch   [--all | --device VID:PID ...] [--json]
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
