pub mod config;
pub mod counter;
pub mod detection;
pub mod error;
pub mod kalman_filter;
pub mod matching;
pub mod pipeline;
pub mod report;
pub mod stream;
pub mod track;
pub mod tracker;
pub mod utils;
#[cfg(feature = "video")]
pub mod visualization;

// Re-export main types
pub use crate::config::{Config, ConfirmPolicy};
pub use crate::counter::{CountingLine, CrossingEvent, LineCounter};
pub use crate::detection::{BBox, Detection, DetectionLog, Detector, Point, RawDetection};
pub use crate::error::{ConfigError, DetectionError, PipelineError};
pub use crate::pipeline::{
    CancelToken, CountingEngine, FrameReport, FrameSink, FrameSource, Pipeline, RunState,
    RunSummary,
};
pub use crate::report::FootfallRecord;
pub use crate::track::{Track, TrackSnapshot, TrackStatus};
pub use crate::tracker::Tracker;
