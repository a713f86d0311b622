//! Collect images produced by a finished prompt.

use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use indexmap::IndexMap;
use snap_comfyui::history::{ImageRef, NodeOutput};
use snap_core::job::OutputImage;

use crate::config::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Failed to read output image {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads output images from ComfyUI's directories and base64-encodes them.
///
/// `output` images stay on disk. `temp` images are deleted once encoded;
/// a failed deletion is logged and otherwise ignored.
#[derive(Clone)]
pub struct OutputCollector {
    output_dir: PathBuf,
    /// Searched in order for `temp` images.
    temp_dirs: [PathBuf; 2],
    remove: fn(&Path) -> io::Result<()>,
}

impl OutputCollector {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        volume_temp_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            temp_dirs: [volume_temp_dir.into(), temp_dir.into()],
            remove: |path| std::fs::remove_file(path),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            &config.output_dir,
            &config.volume_temp_dir,
            &config.temp_dir,
        )
    }

    /// Encode every image in `outputs`, in node order.
    pub fn collect(
        &self,
        outputs: &IndexMap<String, NodeOutput>,
    ) -> Result<Vec<OutputImage>, CollectError> {
        let mut images = Vec::new();

        for (node_id, output) in outputs {
            for image in &output.images {
                let path = self.source_path(image);
                let bytes = std::fs::read(&path).map_err(|source| CollectError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(
                    node_id,
                    path = %path.display(),
                    bytes = bytes.len(),
                    "Collected output image",
                );

                images.push(OutputImage {
                    filename: image.filename.clone(),
                    image_type: image.image_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                });

                if image.is_temp() {
                    self.delete_temp(image);
                }
            }
        }

        Ok(images)
    }

    fn relative_path(image: &ImageRef) -> PathBuf {
        Path::new(&image.subfolder).join(&image.filename)
    }

    /// First temp directory that currently holds the image.
    fn find_temp(&self, image: &ImageRef) -> Option<PathBuf> {
        let relative = Self::relative_path(image);
        self.temp_dirs
            .iter()
            .map(|dir| dir.join(&relative))
            .find(|path| path.exists())
    }

    fn source_path(&self, image: &ImageRef) -> PathBuf {
        if image.is_temp() {
            // Report the volume path when neither exists.
            self.find_temp(image)
                .unwrap_or_else(|| self.temp_dirs[0].join(Self::relative_path(image)))
        } else {
            self.output_dir.join(Self::relative_path(image))
        }
    }

    fn delete_temp(&self, image: &ImageRef) {
        let Some(path) = self.find_temp(image) else {
            tracing::debug!(filename = %image.filename, "Temp image already gone");
            return;
        };
        match (self.remove)(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Deleted temp image"),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to delete temp image",
            ),
        }
    }
}
