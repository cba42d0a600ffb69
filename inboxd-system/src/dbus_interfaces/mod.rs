//! D-Bus interfaces exported by the daemon.

pub mod notifications_server;

pub use notifications_server::{InboxdControl, NotificationsServer, NOTIFICATIONS_PATH};
