//! Notification intake, retention and delivery-policy engine for inboxd.
//!
//! This crate holds the daemon's domain logic, independent of the bus
//! transport and of any rendering substrate:
//!
//! - [`types`] — notification records, the folder tree, close reasons;
//! - [`events`] — the typed lifecycle event bus;
//! - [`paths`] — storage-path computation including subdir redirect rules;
//! - [`settings`] — the hierarchical, invalidation-aware settings resolver;
//! - [`store`] — the persistent folder-tree cache with cascading trash;
//! - [`ingest`] — the protocol-facing ingestion service;
//! - [`policy`] — display eligibility, batching, and the on-screen stack;
//! - [`collaborators`] — seams to the trash, audio and screen substrates.

pub mod collaborators;
pub mod error;
pub mod events;
pub mod ingest;
pub mod paths;
pub mod policy;
pub mod settings;
pub mod store;
pub mod types;

pub use error::NotificationError;
pub use events::{EventBus, NotificationEvent};
pub use ingest::IngestionService;
pub use policy::PolicyEngine;
pub use settings::{SettingsResolver, SharedSettings, TimedSetting, TimedValue};
pub use store::NotificationStore;
pub use types::{
    CachedNotification, CloseReason, Notification, NotificationFolder, NotificationId,
    SharedNotification, Urgency,
};
