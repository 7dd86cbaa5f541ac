//! Shared types and configuration for the Cortex orchestrator.
//!
//! Everything that crosses a crate boundary lives here: the [`types::Envelope`]
//! in-flight unit, priorities and relationships, output targets, and the
//! figment-backed [`config::CortexConfig`].

pub mod config;
pub mod error;
pub mod types;

pub use error::{CortexError, Result};
