//! Booking acceptance and recurrence engine for shared desks and rooms.
//!
//! [`engine::Engine`] admits bookings against organization policy, space
//! conflicts and location capacity, expands recurring series, and runs the
//! approval workflow. Persistence and side effects are injected through
//! [`store::Repositories`] and [`notify::NotificationSink`].

pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod recurrence;
pub mod settings;
pub mod store;
pub mod timezone;
