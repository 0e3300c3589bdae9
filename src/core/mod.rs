//! Polling pipeline: walkers, workers, the pool that owns them, and the
//! queue and publisher that carry their events out.

pub mod cache;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod pool;
pub mod publisher;
pub mod queue;
pub mod readiness;
pub mod walker;
pub mod worker;
