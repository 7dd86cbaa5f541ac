//! Channel boundary: the adapter contract every transport implements, the
//! registry the output router dispatches through, and the sender resolver
//! that turns raw platform identities into relationships.

pub mod adapter;
pub mod error;
pub mod registry;
pub mod resolver;

pub use adapter::ChannelAdapter;
pub use error::{ChannelError, Result};
pub use registry::AdapterRegistry;
pub use resolver::{PartnerResolver, SenderResolver};
