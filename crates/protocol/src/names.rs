//! Well-known bus names, object paths, interfaces and members.

/// Bus name the portal broker owns.
pub const PORTAL_BUS_NAME: &str = "org.freedesktop.portal.Desktop";

/// Object path of the broker's portal object.
pub const PORTAL_OBJECT_PATH: &str = "/org/freedesktop/portal/desktop";

/// Prefix of every reserved request path, followed by `<sender>/<token>`.
pub const REQUEST_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/request/";

/// Prefix of every session handle, followed by `<sender>/<token>`.
pub const SESSION_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/session/";

pub const USB_INTERFACE: &str = "org.freedesktop.portal.Usb";
pub const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
pub const SESSION_INTERFACE: &str = "org.freedesktop.portal.Session";

pub const CREATE_SESSION: &str = "CreateSession";
pub const DEVICE_EVENTS: &str = "DeviceEvents";
pub const RESPONSE: &str = "Response";
pub const CLOSE: &str = "Close";
pub const CLOSED: &str = "Closed";

/// Message bus driver, answers `Hello` with the connection's unique name.
pub const BUS_DRIVER_NAME: &str = "org.freedesktop.DBus";
pub const BUS_DRIVER_PATH: &str = "/org/freedesktop/DBus";
pub const BUS_DRIVER_INTERFACE: &str = "org.freedesktop.DBus";
pub const HELLO: &str = "Hello";
