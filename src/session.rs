//! Per-user result state: the last generated images and whether to show them.

use crate::batch::BatchReport;
use crate::error::Result;
use crate::image::GeneratedImage;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// MIME type of every download.
pub const DOWNLOAD_MIME_TYPE: &str = "image/png";

/// File name offered for the image at `index` (0-based).
pub fn download_file_name(index: usize) -> String {
    format!("generated_image_{}.png", index + 1)
}

/// A PNG ready to be handed to the user.
#[derive(Debug, Clone, Serialize)]
pub struct Download {
    /// Suggested file name.
    pub file_name: String,
    /// Always [`DOWNLOAD_MIME_TYPE`].
    pub mime_type: &'static str,
    /// PNG bytes.
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Result set of one interactive session.
///
/// Starts empty and hidden, is overwritten by every finished batch and
/// emptied by [`Session::clear`].
#[derive(Debug, Default)]
pub struct Session {
    results: Vec<GeneratedImage>,
    show_results: bool,
}

impl Session {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the result set with the images of `report` and shows it.
    pub fn record(&mut self, report: BatchReport) {
        self.results = report.into_images();
        self.show_results = true;
        tracing::debug!(images = self.results.len(), "session results replaced");
    }

    /// Drops all results and hides the result area.
    pub fn clear(&mut self) {
        self.results.clear();
        self.show_results = false;
    }

    /// Whether the result area is switched on.
    pub fn show_results(&self) -> bool {
        self.show_results
    }

    /// Images to display; empty unless results are shown and present.
    pub fn visible_results(&self) -> &[GeneratedImage] {
        if self.show_results {
            self.results.as_slice()
        } else {
            &[]
        }
    }

    /// Number of grid columns for the visible results: 1, 2 or 3 for that
    /// many images, 2 otherwise.
    pub fn layout_columns(&self) -> usize {
        match self.visible_results().len() {
            n @ 1..=3 => n,
            _ => 2,
        }
    }

    /// PNG downloads for every visible result, in order.
    pub fn downloads(&self) -> Result<Vec<Download>> {
        self.visible_results()
            .iter()
            .enumerate()
            .map(|(i, image)| {
                Ok(Download {
                    file_name: download_file_name(i),
                    mime_type: DOWNLOAD_MIME_TYPE,
                    data: image.to_png_bytes()?,
                })
            })
            .collect()
    }

    /// Writes every download into `dir`, creating it if needed.
    pub fn save_all(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut paths = Vec::new();
        for download in self.downloads()? {
            let path = dir.join(&download.file_name);
            std::fs::write(&path, &download.data)?;
            tracing::debug!(path = %path.display(), bytes = download.data.len(), "saved image");
            paths.push(path);
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::test_support::{ScriptedProvider, Step};
    use crate::batch::{generate, FailurePolicy};
    use crate::image::ImageFormat;

    async fn report(steps: Vec<Step>, policy: FailurePolicy) -> BatchReport {
        let count = steps.len() as u32;
        let provider = ScriptedProvider::new(steps);
        generate(&provider, "T", b"photo", "", count, policy).await
    }

    #[test]
    fn test_new_session_is_empty_and_hidden() {
        let session = Session::new();
        assert!(!session.show_results());
        assert!(session.visible_results().is_empty());
        assert!(session.downloads().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_then_clear() {
        let mut session = Session::new();
        let batch = report(vec![Step::Image(3), Step::Image(4)], FailurePolicy::KeepPartial).await;
        session.record(batch);

        assert!(session.show_results());
        assert_eq!(session.visible_results().len(), 2);
        assert_eq!(session.layout_columns(), 2);

        session.clear();
        assert!(!session.show_results());
        assert!(session.visible_results().is_empty());
    }

    #[tokio::test]
    async fn test_record_overwrites_previous_results() {
        let mut session = Session::new();
        session.record(report(vec![Step::Image(1); 5], FailurePolicy::KeepPartial).await);
        assert_eq!(session.layout_columns(), 2);

        session.record(report(vec![Step::Image(9)], FailurePolicy::KeepPartial).await);
        assert_eq!(session.visible_results().len(), 1);
        assert_eq!(session.visible_results()[0].width(), 9);
        assert_eq!(session.layout_columns(), 1);

        let batch = report(vec![Step::Image(1), Step::Fail], FailurePolicy::AbortBatch).await;
        session.record(batch);
        assert!(session.show_results());
        assert!(session.visible_results().is_empty());
    }

    #[tokio::test]
    async fn test_downloads_are_png_with_numbered_names() {
        let mut session = Session::new();
        session.record(
            report(
                vec![Step::Image(5), Step::Image(6), Step::Image(7)],
                FailurePolicy::KeepPartial,
            )
            .await,
        );
        assert_eq!(session.layout_columns(), 3);

        let downloads = session.downloads().unwrap();
        let names: Vec<&str> = downloads.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "generated_image_1.png",
                "generated_image_2.png",
                "generated_image_3.png"
            ]
        );
        for (d, width) in downloads.iter().zip([5, 6, 7]) {
            assert_eq!(d.mime_type, "image/png");
            assert_eq!(ImageFormat::from_magic_bytes(&d.data), Some(ImageFormat::Png));
            let decoded = ::image::load_from_memory(&d.data).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (width, 8));
        }
    }

    #[tokio::test]
    async fn test_save_all_writes_files() {
        let mut session = Session::new();
        let batch = report(vec![Step::Image(2), Step::Image(2)], FailurePolicy::KeepPartial).await;
        session.record(batch);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let paths = session.save_all(&out).unwrap();

        assert_eq!(paths.len(), 2);
        assert_eq!(paths[1], out.join("generated_image_2.png"));
        assert!(paths.iter().all(|p| p.exists()));
    }
}
