//! Offline mutation queue.
//!
//! Mutations that cannot reach the backend right away are queued here and
//! applied later by the processor:
//! - Each operation gets a fixed retry budget (3 attempts by default)
//! - Success or retry exhaustion removes it from the queue
//! - Retries only happen when the processor runs again; the scheduler runs it
//!   on an interval or on demand

mod operation;
mod processor;
mod queue;
mod scheduler;

pub use operation::{NewOperation, OperationKind, DEFAULT_MAX_RETRIES};
pub use processor::SyncProcessor;
pub use queue::SyncQueue;
pub use scheduler::{SyncScheduler, SyncTrigger};
