//! The Cortex processing loop and everything it drives per turn: the model
//! provider contract, the synchronous tool runtime, async task dispatch with
//! core-owned ids, output parsing/routing, startup recovery, and the
//! delivery handler that closes the loop with the router.

pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod output;
pub mod processing;
pub mod provider;
pub mod recovery;
pub mod tools;

pub use delivery::{CortexDeliveryHandler, RouterSpawner};
pub use dispatch::{SpawnRequest, TaskSpawner};
pub use error::{AgentError, Result};
pub use processing::{CortexLoop, Disposition, LoopParts, TurnOutcome};
pub use provider::{ModelError, ModelProvider, ModelRequest, ModelResponse, ToolCall};
pub use recovery::{run_startup_recovery, RecoveryReport};
