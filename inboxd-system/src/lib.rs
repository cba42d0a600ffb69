//! D-Bus protocol surface and process wiring for the inboxd daemon.

pub mod collaborators;
pub mod daemon;
pub mod dbus_interfaces;
