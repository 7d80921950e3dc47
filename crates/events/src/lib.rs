//! Execution event fan-out for the testgrid platform.
//!
//! This crate provides the building blocks for streaming execution
//! lifecycle updates to observers:
//!
//! - [`ExecutionEvent`] — the canonical event envelope.
//! - [`NotificationHub`] — per-subscriber fan-out with non-blocking
//!   delivery; a slow or departed subscriber never blocks the publisher
//!   or other subscribers.

pub mod event;
pub mod hub;

pub use event::ExecutionEvent;
pub use hub::NotificationHub;
