use super::DisplaySink;
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::{Path, PathBuf};

const JPEG_QUALITY: u8 = 85;

/// Presentation sink that keeps one JPEG on disk up to date.
///
/// Frames are encoded to a sibling temp file and renamed over the target, so
/// anything serving or watching the file always reads a complete image.
pub struct SnapshotSink {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl SnapshotSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut tmp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot.jpg".into());
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        Self { path, tmp_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DisplaySink for SnapshotSink {
    fn present(&mut self, frame: RgbImage) -> Result<()> {
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
            .encode_image(&frame)
            .context("Failed to encode snapshot JPEG")?;

        std::fs::write(&self.tmp_path, &encoded)
            .with_context(|| format!("Failed to write {}", self.tmp_path.display()))?;
        std::fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}
