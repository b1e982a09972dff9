//! Image provider trait.

use crate::error::Result;
use crate::image::types::{GeneratedImage, GenerationRequest};
use async_trait::async_trait;

/// A hosted model that turns a prompt plus source photo into an image.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Performs one generation call.
    ///
    /// Returns `Ok(None)` when the model answered without any inline image
    /// part (for example a text-only reply).
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<GeneratedImage>>;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str;

    /// Checks if the provider is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}
