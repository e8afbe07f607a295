use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Rejected configuration. Raised before any frame is processed.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("counting line endpoints must differ, got ({x}, {y}) twice")]
    DegenerateLine { x: f32, y: f32 },
    #[error("counting line endpoints must be finite")]
    NonFiniteLine,
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },
    #[error("min_hits must be at least 1")]
    ZeroMinHits,
    #[error("motion weight {name} must be positive and finite, got {value}")]
    InvalidMotionWeight { name: &'static str, value: f32 },
    #[error("output fps must be positive, got {0}")]
    InvalidFps(f64),
    #[error("output size must be non-zero, got {width}x{height}")]
    InvalidOutputSize { width: u32, height: u32 },
    #[error("reader queue must hold at least one frame")]
    ZeroReaderQueue,
}

/// A raw detector row that cannot be turned into a [`crate::Detection`].
#[derive(Debug, Error, PartialEq)]
pub enum DetectionError {
    #[error("bounding box has non-finite coordinates")]
    NonFiniteBox,
    #[error("bounding box must satisfy x1 < x2 and y1 < y2, got [{x1}, {y1}, {x2}, {y2}]")]
    InvertedBox { x1: f32, y1: f32, x2: f32, y2: f32 },
    #[error("confidence must be within [0, 1], got {0}")]
    ConfidenceOutOfRange(f32),
    #[error("class id {0} is not an integer")]
    InvalidClass(f32),
}

/// Fatal run failure. `frame` is the index of the frame being handled.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read frame {frame}")]
    Source {
        frame: u64,
        #[source]
        source: BoxError,
    },
    #[error("detector failed on frame {frame}")]
    Detector {
        frame: u64,
        #[source]
        source: BoxError,
    },
    #[error("failed to write frame {frame}")]
    Sink {
        frame: u64,
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    /// Index of the frame that failed, if the error is tied to one.
    pub fn frame(&self) -> Option<u64> {
        match self {
            PipelineError::Config(_) => None,
            PipelineError::Source { frame, .. }
            | PipelineError::Detector { frame, .. }
            | PipelineError::Sink { frame, .. } => Some(*frame),
        }
    }
}
