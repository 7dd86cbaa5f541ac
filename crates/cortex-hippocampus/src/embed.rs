use async_trait::async_trait;

use crate::error::Result;

/// Injected embedding service contract.
///
/// Implementations wrap whatever provider the deployment uses; the core only
/// needs a fixed dimensionality and a text→vector call.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed output dimensionality (e.g. 768).
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
