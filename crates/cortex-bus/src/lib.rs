//! The message bus: a SQLite-backed, priority-ordered, crash-durable queue.
//!
//! Envelopes enter through [`MessageBus::enqueue`], drain strictly one at a
//! time through the processing loop, and leave a checkpoint trail behind.

pub mod bus;
pub mod db;
pub mod error;
pub mod types;

pub use bus::MessageBus;
pub use error::{BusError, Result};
pub use types::{BusEntry, BusState, Checkpoint, CheckpointData};
