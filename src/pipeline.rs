use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::counter::{CrossingEvent, LineCounter};
use crate::detection::{DetectionFilter, Detector, RawDetection};
use crate::error::{ConfigError, PipelineError};
use crate::track::TrackSnapshot;
use crate::tracker::Tracker;

/// Produces frames in order. `Ok(None)` means the stream is exhausted.
pub trait FrameSource {
    type Frame;

    fn next_frame(&mut self) -> anyhow::Result<Option<Self::Frame>>;
}

/// Consumes every processed frame together with its report.
pub trait FrameSink<F> {
    fn write_frame(&mut self, frame: &F, report: &FrameReport) -> anyhow::Result<()>;

    /// Flush and close. Called once after the last frame of a clean run.
    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<F, K: FrameSink<F>> FrameSink<F> for Option<K> {
    fn write_frame(&mut self, frame: &F, report: &FrameReport) -> anyhow::Result<()> {
        match self {
            Some(sink) => sink.write_frame(frame, report),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        match self {
            Some(sink) => sink.finish(),
            None => Ok(()),
        }
    }
}

/// Feeds both sinks, first then second.
impl<F, A: FrameSink<F>, B: FrameSink<F>> FrameSink<F> for (A, B) {
    fn write_frame(&mut self, frame: &F, report: &FrameReport) -> anyhow::Result<()> {
        self.0.write_frame(frame, report)?;
        self.1.write_frame(frame, report)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.0.finish()?;
        self.1.finish()
    }
}

/// Outcome of one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    /// 0-based frame index within the run
    pub frame: u64,
    /// Running count after this frame
    pub count: u64,
    pub crossings: Vec<CrossingEvent>,
    /// Confirmed live tracks
    pub tracks: Vec<TrackSnapshot>,
}

/// Detection filter, tracker and line counter for one camera.
///
/// Frames must be fed strictly in order; all state lives here.
#[derive(Debug, Clone)]
pub struct CountingEngine {
    filter: DetectionFilter,
    tracker: Tracker,
    counter: LineCounter,
    frame_index: u64,
}

impl CountingEngine {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            filter: config.detection_filter(),
            tracker: Tracker::new(config.tracker_config()),
            counter: LineCounter::new(config.counting_line()?),
            frame_index: 0,
        })
    }

    /// Run one frame of raw detector output through filter, tracker and counter.
    pub fn process(&mut self, raw: &[RawDetection]) -> FrameReport {
        let detections = self.filter.apply(raw);
        let tracks = self.tracker.update(&detections);
        let crossings = self.counter.observe(&tracks);

        let report = FrameReport {
            frame: self.frame_index,
            count: self.counter.count(),
            crossings,
            tracks,
        };
        self.frame_index += 1;
        report
    }

    pub fn count(&self) -> u64 {
        self.counter.count()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
        self.counter.reset();
        self.frame_index = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initialized,
    Running,
    Finished,
    Failed,
}

/// Asks a running [`Pipeline`] to stop before its next frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub count: u64,
    /// Stopped by a cancel request or the frame limit before the source ran dry
    pub cancelled: bool,
}

/// Drives frames from a source through a detector and the counting engine
/// into a sink.
pub struct Pipeline<S, D, K> {
    source: S,
    detector: D,
    sink: K,
    engine: CountingEngine,
    state: RunState,
    cancel: CancelToken,
    max_frames: Option<u64>,
}

impl<S, D, K> Pipeline<S, D, K>
where
    S: FrameSource,
    D: Detector<S::Frame>,
    K: FrameSink<S::Frame>,
{
    pub fn new(config: &Config, source: S, detector: D, sink: K) -> Result<Self, ConfigError> {
        Ok(Self {
            source,
            detector,
            sink,
            engine: CountingEngine::new(config)?,
            state: RunState::Initialized,
            cancel: CancelToken::new(),
            max_frames: None,
        })
    }

    /// Stop after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.max_frames = Some(limit);
        self
    }

    /// Share an existing token, e.g. one wired to a signal handler.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn count(&self) -> u64 {
        self.engine.count()
    }

    pub fn engine(&self) -> &CountingEngine {
        &self.engine
    }

    pub fn into_parts(self) -> (S, D, K) {
        (self.source, self.detector, self.sink)
    }

    /// Process frames until the source is exhausted, the run is cancelled or
    /// a stage fails. Every run starts from a fresh engine.
    pub fn run(&mut self) -> Result<RunSummary, PipelineError> {
        self.engine.reset();
        self.state = RunState::Running;
        info!("run started");

        let mut cancelled = false;
        loop {
            let index = self.engine.frames_processed();
            if self.cancel.is_cancelled() || self.max_frames.is_some_and(|max| index >= max) {
                debug!("stopping before frame {}", index);
                cancelled = true;
                break;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    return Err(self.fail(PipelineError::Source {
                        frame: index,
                        source: err.into(),
                    }))
                }
            };

            let raw = match self.detector.detect(index, &frame) {
                Ok(raw) => raw,
                Err(err) => {
                    return Err(self.fail(PipelineError::Detector {
                        frame: index,
                        source: err.into(),
                    }))
                }
            };

            let report = self.engine.process(&raw);
            if let Err(err) = self.sink.write_frame(&frame, &report) {
                return Err(self.fail(PipelineError::Sink {
                    frame: index,
                    source: err.into(),
                }));
            }
        }

        let frames = self.engine.frames_processed();
        if let Err(err) = self.sink.finish() {
            return Err(self.fail(PipelineError::Sink {
                frame: frames,
                source: err.into(),
            }));
        }

        self.state = RunState::Finished;
        let summary = RunSummary {
            frames,
            count: self.engine.count(),
            cancelled,
        };
        info!(
            "run finished: {} frames, count = {}{}",
            summary.frames,
            summary.count,
            if cancelled { " (stopped early)" } else { "" }
        );
        Ok(summary)
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        self.state = RunState::Failed;
        warn!("run failed with count = {}: {}", self.engine.count(), err);
        err
    }
}
