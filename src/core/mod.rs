//! Core concurrency primitives.
//!
//! - Named locks that serialize work per task
//! - The per-conversation workflow scheduler
//! - The worker pool every background unit is spawned on

pub mod conversation;
pub mod keyed_lock;
pub mod workers;

pub use conversation::ConversationScheduler;
pub use keyed_lock::{KeyedGuard, KeyedLock};
pub use workers::WorkerPool;
