//! USB portal runtime - bus connection, transport and broker process
//!
//! This crate provides the low-level plumbing the portal client runs on:
//!
//! - **Bus**: The [`Bus`] trait the session protocol is written against
//! - **Transport**: Length-prefixed JSON frames over stdio pipes
//! - **Connection**: Call/reply correlation by serial and ordered signal dispatch
//! - **Broker**: Launching the bridge process that owns the real bus connection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  usb-portal  │  Sessions, device registry
//! └──────┬───────┘
//!        │ Arc<dyn Bus>
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │ Conn   │  │  Serial correlation, signal routing
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  Framed pipes
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Broker │  │  Process management
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod broker;
pub mod bus;
pub mod connection;
pub mod error;
pub mod testing;
pub mod transport;

pub use broker::BrokerProcess;
pub use bus::{Bus, CallFuture, MethodCall, Signal, SignalHandler, SignalRule, SignalSubscription, SubscriptionId};
pub use connection::{Connection, ErrorPayload, Message, Reply, Request};
pub use error::{Error, Result};
pub use transport::{
	PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts, TransportReceiver,
};
