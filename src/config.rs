use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::counter::CountingLine;
use crate::detection::{DetectionFilter, Point};
use crate::error::ConfigError;
use crate::kalman_filter::MotionConfig;

/// When a tentative track becomes visible to counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
    /// After `min_hits` consecutive matched frames.
    #[default]
    HitStreak,
    /// As soon as the track is created.
    Immediate,
    /// Like `HitStreak`, but anything matched during the first `min_hits`
    /// frames of a run is confirmed straight away.
    Warmup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Frame rate of the annotated output video
    pub fps: f64,
    /// Output `[width, height]`; input size when absent
    pub size: Option<[u32; 2]>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Detector class id to track (0 = person for COCO models)
    pub target_class_id: i64,
    /// Detections below this confidence are ignored
    pub conf_threshold: f32,
    /// Minimum IoU for a track/detection pair to be accepted
    pub iou_threshold: f32,
    pub min_hits: u32,
    /// Unmatched frames a track survives before deletion
    pub max_age: u32,
    pub confirmation: ConfirmPolicy,
    /// Counting line endpoints `[[x, y], [x, y]]`
    pub line: [[f32; 2]; 2],
    pub motion: MotionConfig,
    pub output: OutputConfig,
    /// Frames buffered between the reader thread and the tracker
    pub reader_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_class_id: 0,
            conf_threshold: 0.5,
            iou_threshold: 0.3,
            min_hits: 3,
            max_age: 1,
            confirmation: ConfirmPolicy::HitStreak,
            line: [[369.0, 312.0], [800.0, 364.0]],
            motion: MotionConfig::default(),
            output: OutputConfig::default(),
            reader_queue: 8,
        }
    }
}

/// Subset of the configuration driving the track lifecycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub iou_threshold: f32,
    pub min_hits: u32,
    pub max_age: u32,
    pub confirmation: ConfirmPolicy,
    pub motion: MotionConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Config::default().tracker_config()
    }
}

fn check_unit(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { name, value })
    }
}

fn check_weight(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidMotionWeight { name, value })
    }
}

impl Config {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("conf_threshold", self.conf_threshold)?;
        check_unit("iou_threshold", self.iou_threshold)?;
        if self.min_hits == 0 {
            return Err(ConfigError::ZeroMinHits);
        }
        self.counting_line()?;
        check_weight("std_weight_position", self.motion.std_weight_position)?;
        check_weight("std_weight_velocity", self.motion.std_weight_velocity)?;
        check_weight("std_weight_measurement", self.motion.std_weight_measurement)?;
        if !(self.output.fps.is_finite() && self.output.fps > 0.0) {
            return Err(ConfigError::InvalidFps(self.output.fps));
        }
        if let Some([width, height]) = self.output.size {
            if width == 0 || height == 0 {
                return Err(ConfigError::InvalidOutputSize { width, height });
            }
        }
        if self.reader_queue == 0 {
            return Err(ConfigError::ZeroReaderQueue);
        }
        Ok(())
    }

    pub fn counting_line(&self) -> Result<CountingLine, ConfigError> {
        let [[px, py], [qx, qy]] = self.line;
        CountingLine::new(Point::new(px, py), Point::new(qx, qy))
    }

    pub fn detection_filter(&self) -> DetectionFilter {
        DetectionFilter::new(self.target_class_id, self.conf_threshold)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            iou_threshold: self.iou_threshold,
            min_hits: self.min_hits,
            max_age: self.max_age,
            confirmation: self.confirmation,
            motion: self.motion,
        }
    }
}
