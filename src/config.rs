use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::CpuBackendConfig;
use crate::geometry::Roi;
use crate::notify::DEFAULT_QUEUE_CAPACITY;
use crate::state_machine::{RecordingLimits, DEFAULT_GRACE_PERIOD, DEFAULT_MAX_DURATION};

pub const CONFIG_ENV: &str = "ROI_RECORDER_CONFIG";

const DEFAULT_DB_PATH: &str = "roi_recorder.db";
const DEFAULT_PLACE: &str = "monitored room";
const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR: &str = "cpu";
const DEFAULT_OUTPUT_DIR: &str = "recordings";
const DEFAULT_RECORDING_FPS: u32 = 30;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_SNAPSHOT_EVERY: u64 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecorderConfigFile {
    db_path: Option<String>,
    place: Option<String>,
    roi: Option<RoiConfigFile>,
    limits: Option<LimitsConfigFile>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    recording: Option<RecordingConfigFile>,
    notifier: Option<NotifierConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize)]
struct RoiConfigFile {
    x: f32,
    y: f32,
    size: f32,
}

#[derive(Debug, Deserialize, Default)]
struct LimitsConfigFile {
    max_duration_secs: Option<u64>,
    grace_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    cell_size: Option<u32>,
    luma_threshold: Option<f32>,
    min_cells: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    output_dir: Option<PathBuf>,
    target_fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifierConfigFile {
    speech_command: Option<String>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    snapshot_path: Option<PathBuf>,
    snapshot_every: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub db_path: String,
    /// Human label for the monitored area, shown in status output.
    pub place: String,
    pub roi: Roi,
    pub limits: RecordingLimits,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub recording: RecordingSettings,
    pub notifier: NotifierSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Stop after this many frames (synthetic sources only).
    pub max_frames: Option<u64>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            target_fps: DEFAULT_SOURCE_FPS,
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
            max_frames: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub cpu: CpuBackendConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSettings {
    pub output_dir: PathBuf,
    pub target_fps: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifierSettings {
    /// External speech command; announcements go to the log when unset.
    pub speech_command: Option<String>,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from_file(RecorderConfigFile::default())
    }
}

impl RecorderConfig {
    /// Load from the file named by `ROI_RECORDER_CONFIG` (if any), then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, but an explicit path takes precedence over `ROI_RECORDER_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RecorderConfigFile) -> Self {
        let roi = file
            .roi
            .map(|roi| Roi::new(roi.x, roi.y, roi.size))
            .unwrap_or_default();
        let limits_file = file.limits.unwrap_or_default();
        let limits = RecordingLimits {
            max_duration: limits_file
                .max_duration_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MAX_DURATION),
            grace_period: limits_file
                .grace_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_GRACE_PERIOD),
        };

        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            max_frames: source_file.max_frames,
        };

        let detector_file = file.detector.unwrap_or_default();
        let cpu_defaults = CpuBackendConfig::default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            cpu: CpuBackendConfig {
                cell_size: detector_file.cell_size.unwrap_or(cpu_defaults.cell_size),
                luma_threshold: detector_file
                    .luma_threshold
                    .unwrap_or(cpu_defaults.luma_threshold),
                min_cells: detector_file.min_cells.unwrap_or(cpu_defaults.min_cells),
            },
        };

        let recording_file = file.recording.unwrap_or_default();
        let recording = RecordingSettings {
            output_dir: recording_file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            target_fps: recording_file.target_fps.unwrap_or(DEFAULT_RECORDING_FPS),
            jpeg_quality: recording_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let notifier_file = file.notifier.unwrap_or_default();
        let notifier = NotifierSettings {
            speech_command: notifier_file
                .speech_command
                .filter(|cmd| !cmd.trim().is_empty()),
            queue_capacity: notifier_file
                .queue_capacity
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            snapshot_path: display_file.snapshot_path,
            snapshot_every: display_file
                .snapshot_every
                .unwrap_or(DEFAULT_SNAPSHOT_EVERY),
        };

        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            place: file.place.unwrap_or_else(|| DEFAULT_PLACE.to_string()),
            roi,
            limits,
            source,
            detector,
            recording,
            notifier,
            display,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("ROI_RECORDER_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(roi) = env_nonempty("ROI_RECORDER_ROI") {
            self.roi = parse_roi(&roi)?;
        }
        if let Some(secs) = env_nonempty("ROI_RECORDER_MAX_DURATION_SECS") {
            self.limits.max_duration = Duration::from_secs(secs.parse().map_err(|_| {
                anyhow!("ROI_RECORDER_MAX_DURATION_SECS must be an integer number of seconds")
            })?);
        }
        if let Some(secs) = env_nonempty("ROI_RECORDER_GRACE_SECS") {
            self.limits.grace_period = Duration::from_secs(secs.parse().map_err(|_| {
                anyhow!("ROI_RECORDER_GRACE_SECS must be an integer number of seconds")
            })?);
        }
        if let Some(dir) = env_nonempty("ROI_RECORDER_OUTPUT_DIR") {
            self.recording.output_dir = PathBuf::from(dir);
        }
        if let Some(db_path) = env_nonempty("ROI_RECORDER_DB_PATH") {
            self.db_path = db_path;
        }
        if let Some(backend) = env_nonempty("ROI_RECORDER_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(command) = env_nonempty("ROI_RECORDER_SPEECH_COMMAND") {
            self.notifier.speech_command = Some(command);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(self.roi.size > 0.0) {
            return Err(anyhow!("roi size must be greater than zero"));
        }
        if self.roi.x < 0.0
            || self.roi.y < 0.0
            || self.roi.right() > self.source.width as f32
            || self.roi.bottom() > self.source.height as f32
        {
            return Err(anyhow!(
                "roi {},{},{} does not fit inside the {}x{} source frame",
                self.roi.x,
                self.roi.y,
                self.roi.size,
                self.source.width,
                self.source.height
            ));
        }
        if self.limits.max_duration.is_zero() {
            return Err(anyhow!("max duration must be greater than zero"));
        }
        if self.source.target_fps == 0 || self.recording.target_fps == 0 {
            return Err(anyhow!("target fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source frame size must be non-zero"));
        }
        if !(1..=100).contains(&self.recording.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if self.detector.backend.is_empty() {
            return Err(anyhow!("detector backend must not be empty"));
        }
        if self.notifier.queue_capacity == 0 {
            return Err(anyhow!("notifier queue capacity must be greater than zero"));
        }
        Ok(())
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<RecorderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse `"x,y,size"`.
pub fn parse_roi(value: &str) -> Result<Roi> {
    let parts = split_csv(value);
    let [x, y, size] = parts.as_slice() else {
        return Err(anyhow!("roi must be given as x,y,size (got '{}')", value));
    };
    let parse = |part: &str| -> Result<f32> {
        part.parse()
            .map_err(|_| anyhow!("roi component '{}' is not a number", part))
    };
    Ok(Roi::new(parse(x)?, parse(y)?, parse(size)?))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
