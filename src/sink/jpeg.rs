//! JPEG-sequence recording sink.
//!
//! Layout: `<output_dir>/<session_id>/frame_000001.jpg ...` plus a
//! `manifest.json` written on close. Session directories are never reused,
//! so an existing directory makes `open` fail.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use super::{RecordingSink, RecordingSummary, SinkHandle};
use crate::frame::FrameDimensions;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Clone, Debug)]
pub struct JpegSequenceConfig {
    pub output_dir: PathBuf,
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

impl Default for JpegSequenceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            quality: 85,
        }
    }
}

struct OpenRecording {
    handle: SinkHandle,
    dir: PathBuf,
    dimensions: FrameDimensions,
    target_fps: u32,
    frames_written: u64,
    hasher: Sha256,
}

pub struct JpegSequenceSink {
    config: JpegSequenceConfig,
    open: Option<OpenRecording>,
    next_id: u64,
}

impl JpegSequenceSink {
    pub fn new(config: JpegSequenceConfig) -> Self {
        Self {
            config,
            open: None,
            next_id: 1,
        }
    }

    fn check_handle<'a>(
        open: &'a mut Option<OpenRecording>,
        handle: &SinkHandle,
    ) -> Result<&'a mut OpenRecording> {
        match open {
            Some(recording) if recording.handle == *handle => Ok(recording),
            _ => Err(anyhow!(
                "recording {} (handle {}) is not open",
                handle.session_id,
                handle.id
            )),
        }
    }
}

impl RecordingSink for JpegSequenceSink {
    fn open(
        &mut self,
        session_id: &str,
        dimensions: FrameDimensions,
        target_fps: u32,
    ) -> Result<SinkHandle> {
        if let Some(active) = &self.open {
            return Err(anyhow!(
                "recording {} is still open",
                active.handle.session_id
            ));
        }
        if session_id.is_empty() || session_id.contains(['/', '\\']) || session_id.starts_with('.')
        {
            return Err(anyhow!("invalid session id '{}'", session_id));
        }
        std::fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "create recordings directory {}",
                self.config.output_dir.display()
            )
        })?;
        let dir = self.config.output_dir.join(session_id);
        std::fs::create_dir(&dir)
            .with_context(|| format!("create session directory {}", dir.display()))?;

        let handle = SinkHandle {
            id: self.next_id,
            session_id: session_id.to_string(),
        };
        self.next_id += 1;
        self.open = Some(OpenRecording {
            handle: handle.clone(),
            dir,
            dimensions,
            target_fps,
            frames_written: 0,
            hasher: Sha256::new(),
        });
        Ok(handle)
    }

    fn has_recording(&self, session_id: &str) -> bool {
        self.config.output_dir.join(session_id).exists()
    }

    fn write(&mut self, handle: &SinkHandle, frame: &RgbImage) -> Result<()> {
        let quality = self.config.quality;
        let recording = Self::check_handle(&mut self.open, handle)?;
        let (width, height) = frame.dimensions();
        if FrameDimensions::new(width, height) != recording.dimensions {
            return Err(anyhow!(
                "frame is {}x{}, recording {} expects {}x{}",
                width,
                height,
                handle.session_id,
                recording.dimensions.width,
                recording.dimensions.height
            ));
        }

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, quality)
            .encode_image(frame)
            .context("encode jpeg frame")?;
        let path = recording
            .dir
            .join(format!("frame_{:06}.jpg", recording.frames_written + 1));
        std::fs::write(&path, &encoded).with_context(|| format!("write {}", path.display()))?;

        recording.hasher.update(&encoded);
        recording.frames_written += 1;
        Ok(())
    }

    fn close(&mut self, handle: &SinkHandle) -> Result<Option<RecordingSummary>> {
        let is_open = self
            .open
            .as_ref()
            .is_some_and(|recording| recording.handle == *handle);
        if !is_open {
            if handle.id < self.next_id {
                return Ok(None);
            }
            return Err(anyhow!("unknown recording handle {}", handle.id));
        }
        let Some(recording) = self.open.take() else {
            return Ok(None);
        };

        let summary = RecordingSummary {
            session_id: recording.handle.session_id.clone(),
            dimensions: recording.dimensions,
            target_fps: recording.target_fps,
            frames_written: recording.frames_written,
            location: Some(recording.dir.display().to_string()),
            sha256: Some(hex::encode(recording.hasher.finalize())),
        };
        let manifest = serde_json::to_vec_pretty(&summary)?;
        let manifest_path = recording.dir.join(MANIFEST_FILE);
        std::fs::write(&manifest_path, manifest)
            .with_context(|| format!("write {}", manifest_path.display()))?;
        Ok(Some(summary))
    }
}
