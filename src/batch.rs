//! Sequential multi-image generation.

use crate::error::{Result, SceneGenError};
use crate::image::{GeneratedImage, GenerationRequest, ImageProvider};
use crate::prompt::build_prompt;
use serde::Serialize;
use std::time::Instant;

/// Smallest image count a user may request.
pub const MIN_COUNT: u32 = 1;
/// Largest image count a user may request.
pub const MAX_COUNT: u32 = 10;
/// Image count used when none is given.
pub const DEFAULT_COUNT: u32 = 4;

/// Checks a user-supplied image count against `[MIN_COUNT, MAX_COUNT]`.
pub fn validate_count(count: u32) -> Result<u32> {
    if (MIN_COUNT..=MAX_COUNT).contains(&count) {
        Ok(count)
    } else {
        Err(SceneGenError::InvalidRequest(format!(
            "count must be between {MIN_COUNT} and {MAX_COUNT}, got {count}"
        )))
    }
}

/// What to do when one iteration fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep going; successful images are kept.
    #[default]
    KeepPartial,
    /// Stop at the first failure and discard every image of the batch.
    AbortBatch,
}

/// Result of one generation call.
#[derive(Debug, Clone)]
pub enum IterationOutcome {
    /// The model returned an image.
    Image(GeneratedImage),
    /// The model answered without an inline image part.
    NoImage,
    /// The call, the response traversal or the decoding failed.
    Failed {
        /// Human-readable error.
        reason: String,
        /// Whether the error looked transient.
        retryable: bool,
    },
}

impl IterationOutcome {
    fn from_result(result: Result<Option<GeneratedImage>>) -> Self {
        match result {
            Ok(Some(image)) => Self::Image(image),
            Ok(None) => Self::NoImage,
            Err(e) => Self::Failed {
                retryable: e.is_retryable(),
                reason: e.to_string(),
            },
        }
    }
}

/// Everything that happened during one generation batch.
#[derive(Debug, Clone)]
#[must_use = "the report holds the generated images"]
pub struct BatchReport {
    /// The combined prompt sent on every call.
    pub prompt: String,
    /// Number of images requested.
    pub requested: u32,
    /// Policy the batch ran under.
    pub policy: FailurePolicy,
    /// One entry per issued call, in issuance order.
    pub outcomes: Vec<IterationOutcome>,
    /// Total wall time in milliseconds.
    pub duration_ms: u64,
}

impl BatchReport {
    /// Number of iterations that produced an image.
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IterationOutcome::Image(_)))
            .count()
    }

    /// Number of iterations that returned no image part.
    pub fn empty(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IterationOutcome::NoImage))
            .count()
    }

    /// Number of failed iterations.
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IterationOutcome::Failed { .. }))
            .count()
    }

    /// True when the batch stopped early under [`FailurePolicy::AbortBatch`].
    pub fn aborted(&self) -> bool {
        self.policy == FailurePolicy::AbortBatch && self.failed() > 0
    }

    /// Error messages, prefixed with the 1-based iteration number.
    pub fn errors(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| match o {
                IterationOutcome::Failed { reason, .. } => {
                    Some(format!("Image {}: {}", i + 1, reason))
                }
                _ => None,
            })
            .collect()
    }

    /// Images to show, in issuance order. Empty for an aborted batch.
    pub fn images(&self) -> Vec<&GeneratedImage> {
        if self.aborted() {
            return Vec::new();
        }
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                IterationOutcome::Image(image) => Some(image),
                _ => None,
            })
            .collect()
    }

    /// Consumes the report, returning the images to show.
    pub fn into_images(self) -> Vec<GeneratedImage> {
        if self.aborted() {
            return Vec::new();
        }
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                IterationOutcome::Image(image) => Some(image),
                _ => None,
            })
            .collect()
    }

    /// Counts and errors, without pixel data.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            prompt: self.prompt.clone(),
            requested: self.requested,
            succeeded: self.images().len(),
            empty: self.empty(),
            failed: self.failed(),
            aborted: self.aborted(),
            duration_ms: self.duration_ms,
            errors: self.errors(),
        }
    }
}

/// Serializable overview of a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Combined prompt.
    pub prompt: String,
    /// Images requested.
    pub requested: u32,
    /// Images kept.
    pub succeeded: usize,
    /// Calls that returned no image.
    pub empty: usize,
    /// Calls that failed.
    pub failed: usize,
    /// Whether the batch was aborted.
    pub aborted: bool,
    /// Total wall time in milliseconds.
    pub duration_ms: u64,
    /// Error messages.
    pub errors: Vec<String>,
}

/// Requests `count` images of the person in `source_image` placed in the scene.
///
/// Calls are issued one after another. With `count == 0` nothing is sent.
pub async fn generate<P>(
    provider: &P,
    template: &str,
    source_image: &[u8],
    user_text: &str,
    count: u32,
    policy: FailurePolicy,
) -> BatchReport
where
    P: ImageProvider + ?Sized,
{
    let start = Instant::now();
    let prompt = build_prompt(template, user_text);
    let request = GenerationRequest::new(prompt.clone()).with_input_image(source_image.to_vec());

    tracing::info!(
        provider = provider.name(),
        count,
        ?policy,
        "starting generation batch"
    );

    let mut outcomes = Vec::with_capacity(count.min(MAX_COUNT) as usize);
    for i in 0..count {
        let outcome = IterationOutcome::from_result(provider.generate(&request).await);
        match &outcome {
            IterationOutcome::Image(image) => tracing::debug!(
                iteration = i + 1,
                width = image.width(),
                height = image.height(),
                "received image"
            ),
            IterationOutcome::NoImage => {
                tracing::warn!(iteration = i + 1, "response contained no image part")
            }
            IterationOutcome::Failed { reason, .. } => {
                tracing::warn!(iteration = i + 1, "generation failed: {reason}")
            }
        }

        let stop = policy == FailurePolicy::AbortBatch
            && matches!(outcome, IterationOutcome::Failed { .. });
        outcomes.push(outcome);
        if stop {
            break;
        }
    }

    let report = BatchReport {
        prompt,
        requested: count,
        policy,
        outcomes,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    tracing::info!(
        requested = count,
        succeeded = report.succeeded(),
        empty = report.empty(),
        failed = report.failed(),
        aborted = report.aborted(),
        duration_ms = report.duration_ms,
        "generation batch finished"
    );

    report
}
