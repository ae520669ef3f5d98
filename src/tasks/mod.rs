//! Background Tasks Module
//!
//! Tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - Expiry Cleanup: removes expired disk entries at a configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
