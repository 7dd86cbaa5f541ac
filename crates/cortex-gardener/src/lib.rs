//! The Gardener: background maintenance tasks that keep the stores lean.
//!
//! Three periodic workers, each reading and writing through the same
//! session/hippocampus interfaces as the loop — their writes serialize with
//! loop writes at the storage layer:
//! - the compactor demotes idle channels through the attention layers,
//! - the fact extractor compacts old conversation rows into hot facts,
//! - the evictor moves stale hot facts into cold storage.

pub mod compactor;
pub mod error;
pub mod evictor;
pub mod extractor;

pub use compactor::Compactor;
pub use error::{GardenerError, Result};
pub use evictor::Evictor;
pub use extractor::{FactExtractor, FactModel};
