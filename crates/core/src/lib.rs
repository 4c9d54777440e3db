//! Client for the USB desktop portal.
//!
//! A sandboxed application asks the portal broker for access to USB devices
//! with [`UsbPortal::create_session`]. Once the user consents, the returned
//! [`UsbSession`] keeps a live list of the devices the application may open,
//! updated from the broker's `DeviceEvents` signals until the session closes.
//!
//! # Example
//!
//! ```ignore
//! use usb_portal::{AccessMode, CreateSessionOptions, DeviceCandidate, UsbPortal};
//! use usb_portal::device::DEVICE_FILE;
//!
//! let portal = UsbPortal::connect(parts).await?;
//! let session = portal
//!     .create_session(
//!         CreateSessionOptions::new()
//!             .access_mode(AccessMode::ListedDevices)
//!             .candidates([DeviceCandidate::new(0x046d, 0xc52b)])
//!             .reason("Configure your receiver"),
//!     )
//!     .await?;
//!
//! for device in session.devices() {
//!     println!("{} {:?}", device.id(), device.get(&DEVICE_FILE));
//! }
//! ```

pub mod cancellable;
pub mod device;
pub mod error;
pub mod handlers;
pub mod parent;
pub mod portal;
pub mod registry;
pub mod request;
pub mod session;
mod subscriber;

pub use cancellable::{CancelHandlerId, Cancellable};
pub use device::{Attribute, Device};
pub use error::{Error, Result};
pub use handlers::{ClosedSubscription, HandlerId};
pub use parent::{BoxFuture, ExportedHandle, WindowParent};
pub use portal::UsbPortal;
pub use registry::DeviceRegistry;
pub use request::CreateSessionOptions;
pub use session::{SessionState, UsbSession};
pub use usb_portal_protocol::{AccessMode, AttributeMap, DeviceCandidate, Variant};
