//! Local image-directory frame source.
//!
//! Replays a directory of still images (JPEG/PNG) in file-name order, as if
//! they had been captured at `target_fps`. Timestamps follow that nominal
//! rate rather than the decode speed, so duration and grace limits behave
//! the same as on the original footage. End of stream after the last file.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Configuration for a local image directory.
#[derive(Clone, Debug)]
pub struct ImageDirConfig {
    pub dir: PathBuf,
    /// Nominal capture rate of the footage.
    pub target_fps: u32,
}

pub struct ImageDirSource {
    config: ImageDirConfig,
    files: Vec<PathBuf>,
    frame_count: u64,
    started: Option<(Instant, DateTime<Local>)>,
    last_error: Option<String>,
}

impl ImageDirSource {
    pub fn new(config: ImageDirConfig) -> Result<Self> {
        if config.target_fps == 0 {
            return Err(anyhow!("image directory source requires target_fps > 0"));
        }
        Ok(Self {
            config,
            files: Vec::new(),
            frame_count: 0,
            started: None,
            last_error: None,
        })
    }

    fn scan(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("read image directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        self.files = Self::scan(&self.config.dir)?;
        self.started = Some((Instant::now(), Local::now()));
        log::info!(
            "ImageDirSource: connected to {} ({} frames @ {} fps)",
            self.config.dir.display(),
            self.files.len(),
            self.config.target_fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let (base_instant, base_wall) = self
            .started
            .ok_or_else(|| anyhow!("image directory source not connected"))?;
        let Some(path) = self.files.get(self.frame_count as usize).cloned() else {
            return Ok(None);
        };
        let index = self.frame_count;
        self.frame_count += 1;

        let image = match image::open(&path) {
            Ok(image) => image.to_rgb8(),
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(anyhow!("decode {}: {}", path.display(), err));
            }
        };
        self.last_error = None;

        let offset = Duration::from_secs_f64(index as f64 / self.config.target_fps as f64);
        let wall_offset =
            chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero());
        Ok(Some(Frame::new(
            image,
            base_instant + offset,
            base_wall + wall_offset,
            self.frame_count,
        )))
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frame(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(32, 24, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .expect("write frame");
    }

    #[test]
    fn image_dir_source_replays_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_frame(dir.path(), "frame_002.png", 200);
        write_frame(dir.path(), "frame_001.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "not a frame")?;

        let mut source = ImageDirSource::new(ImageDirConfig {
            dir: dir.path().to_path_buf(),
            target_fps: 4,
        })?;
        source.connect()?;

        let first = source.next_frame()?.expect("first frame");
        let second = source.next_frame()?.expect("second frame");
        assert!(source.next_frame()?.is_none());

        assert_eq!(first.image().get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!(second.image().get_pixel(0, 0).0, [200, 200, 200]);
        assert_eq!(
            second.captured_at - first.captured_at,
            Duration::from_millis(250)
        );
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn corrupt_image_is_a_per_frame_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.png"), b"definitely not png")?;
        write_frame(dir.path(), "b.png", 50);

        let mut source = ImageDirSource::new(ImageDirConfig {
            dir: dir.path().to_path_buf(),
            target_fps: 10,
        })?;
        source.connect()?;
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        assert!(source.next_frame()?.is_some());
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn missing_directory_fails_to_connect() {
        let mut source = ImageDirSource::new(ImageDirConfig {
            dir: PathBuf::from("/definitely/not/here"),
            target_fps: 10,
        })
        .expect("config");
        assert!(source.connect().is_err());
    }
}
