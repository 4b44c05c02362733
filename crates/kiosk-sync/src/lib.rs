//! Live state synchronization for a kiosk control panel.
//!
//! The device cycles through tabs grouped into playlists and only reports
//! its state when polled.  This crate keeps a locally cached view of that
//! state consistent, overlays optimistic updates while activations are in
//! flight, bounds thumbnail retry frequency after failed image loads, and
//! derives a live countdown for the active tab from a server-reported
//! timestamp.
//!
//! [`engine::SyncEngine`] ties the pieces together; the individual parts
//! ([`status::StatusCache`], [`mutate::Activator`],
//! [`preview::PreviewController`], [`progress::ProgressTimer`]) are usable
//! on their own.

pub mod clock;
pub mod engine;
pub mod mutate;
pub mod playlists;
pub mod preview;
pub mod progress;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::SyncEngine;
pub use preview::PreviewSource;
pub use progress::Progress;
