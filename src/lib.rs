#![warn(missing_docs)]
//! scenegen - place the person from a photo into a scene using Gemini image models.
//!
//! A scene template (café, office, beach, ...) supplies the base
//! instruction, an optional user instruction is appended, and the combined
//! prompt is sent together with the photo once per requested image.
//!
//! # Quick Start
//!
//! ```no_run
//! use scenegen::batch::{self, FailurePolicy};
//! use scenegen::{GeminiProvider, SceneTemplate, Session, SourceImage};
//!
//! #[tokio::main]
//! async fn main() -> scenegen::Result<()> {
//!     let provider = GeminiProvider::builder().build()?;
//!     let scene = SceneTemplate::lookup("beach")?;
//!     let photo = SourceImage::from_path("me.jpg")?;
//!
//!     let report = batch::generate(
//!         &provider,
//!         scene.instruction,
//!         &photo.data,
//!         "holding a surfboard",
//!         4,
//!         FailurePolicy::KeepPartial,
//!     )
//!     .await;
//!
//!     let mut session = Session::new();
//!     session.record(report);
//!     session.save_all("out")?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `cli` (default): the `scenegen` binary and the MCP server

pub mod batch;
mod error;
pub mod image;
pub mod prompt;
pub mod scene;
pub mod session;

#[cfg(feature = "cli")]
#[doc(hidden)]
pub mod mcp;

// Re-export error types at crate root
pub use error::{Result, SceneGenError};

pub use batch::{BatchReport, BatchSummary, FailurePolicy, IterationOutcome};
pub use crate::image::providers::{GeminiModel, GeminiProvider, GeminiProviderBuilder};
pub use crate::image::{
    GeneratedImage, GenerationMetadata, GenerationRequest, ImageFormat, ImageProvider,
    SourceImage, SourceSummary,
};
pub use prompt::build_prompt;
pub use scene::{SceneTemplate, SCENE_TEMPLATES};
pub use session::{Download, Session};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::batch::{generate, FailurePolicy};
    pub use crate::error::{Result, SceneGenError};
    pub use crate::image::providers::GeminiProvider;
    pub use crate::image::{GeneratedImage, ImageProvider, SourceImage};
    pub use crate::prompt::build_prompt;
    pub use crate::scene::SceneTemplate;
    pub use crate::session::Session;
}
