//! The activity collection and everything that changes it.
//!
//!  - [entities] describes the stored document: activities, their day/month/year buckets, notes
//!    and the session log.
//!  - [rollover] moves `current` into `previous` when a calendar boundary is crossed.
//!  - [manager::DataManager] owns the collection of one user, caches it, applies rollover on read
//!    and mediates every write.

pub mod cache;
pub mod entities;
pub mod error;
pub mod manager;
pub mod rollover;
pub mod seed;
pub mod subscription;
