//! Personal activity-time tracker. Hours are kept per activity in day, month and year buckets
//! that roll over on their own as the calendar moves on, and can be logged by hand or with
//! stopwatch timers that survive restarts.
//!

pub mod cli;
pub mod config;
pub mod fs;
pub mod store;
pub mod timer;
pub mod tracker;
pub mod users;
pub mod utils;
