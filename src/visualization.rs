use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use opencv::{
    core::{Point, Rect, Scalar, Size},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use tracing::{debug, info};

use crate::config::OutputConfig;
use crate::counter::CountingLine;
use crate::detection;
use crate::pipeline::{FrameReport, FrameSink, FrameSource};
use crate::track::TrackSnapshot;

const COLORS: &[Scalar] = &[
    Scalar::new(255.0, 0.0, 0.0, 0.0),    // Blue
    Scalar::new(0.0, 255.0, 0.0, 0.0),    // Green
    Scalar::new(0.0, 0.0, 255.0, 0.0),    // Red
    Scalar::new(255.0, 255.0, 0.0, 0.0),  // Cyan
    Scalar::new(255.0, 0.0, 255.0, 0.0),  // Magenta
    Scalar::new(0.0, 255.0, 255.0, 0.0),  // Yellow
];

const LINE_COLOR: Scalar = Scalar::new(0.0, 255.0, 255.0, 0.0);

fn to_cv(p: detection::Point) -> Point {
    Point::new(p.x.round() as i32, p.y.round() as i32)
}

fn track_color(id: u64) -> Scalar {
    COLORS[(id as usize) % COLORS.len()]
}

/// Frames decoded from a video file with OpenCV.
pub struct VideoSource {
    capture: VideoCapture,
    path: PathBuf,
}

impl VideoSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let capture = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)
            .with_context(|| format!("failed to open video {}", path.display()))?;
        if !capture.is_opened()? {
            bail!("failed to open video {}", path.display());
        }
        let source = Self {
            capture,
            path: path.to_path_buf(),
        };
        let size = source.frame_size()?;
        info!(
            "opened {}: {}x{} @ {:.2} fps",
            path.display(),
            size.width,
            size.height,
            source.fps()?
        );
        Ok(source)
    }

    pub fn fps(&self) -> Result<f64> {
        Ok(self.capture.get(videoio::CAP_PROP_FPS)?)
    }

    pub fn frame_size(&self) -> Result<Size> {
        let width = self.capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        Ok(Size::new(width, height))
    }
}

impl FrameSource for VideoSource {
    type Frame = Mat;

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .with_context(|| format!("failed to decode frame from {}", self.path.display()))?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

/// Draw the counting line.
pub fn draw_line(frame: &mut Mat, line: &CountingLine) -> opencv::Result<()> {
    imgproc::line(
        frame,
        to_cv(line.start),
        to_cv(line.end),
        LINE_COLOR,
        3,
        imgproc::LINE_8,
        0,
    )
}

/// Draw a track box with its id.
pub fn draw_track(frame: &mut Mat, track: &TrackSnapshot) -> opencv::Result<()> {
    let color = track_color(track.id);
    let tl = Point::new(track.bbox.x1 as i32, track.bbox.y1 as i32);
    let br = Point::new(track.bbox.x2 as i32, track.bbox.y2 as i32);
    let rect = Rect::new(tl.x, tl.y, br.x - tl.x, br.y - tl.y);
    imgproc::rectangle(frame, rect, color, 2, imgproc::LINE_8, 0)?;

    imgproc::put_text(
        frame,
        &track.id.to_string(),
        Point::new(tl.x, tl.y - 5),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        color,
        2,
        imgproc::LINE_8,
        false,
    )
}

/// Draw the running count in the top left corner.
pub fn draw_count(frame: &mut Mat, count: u64) -> opencv::Result<()> {
    let text = count.to_string();
    let origin = Point::new(50, 120);
    // Black outline under the text
    imgproc::put_text(
        frame,
        &text,
        origin,
        imgproc::FONT_HERSHEY_DUPLEX,
        4.0,
        Scalar::new(0.0, 0.0, 0.0, 0.0),
        14,
        imgproc::LINE_8,
        false,
    )?;
    imgproc::put_text(
        frame,
        &text,
        origin,
        imgproc::FONT_HERSHEY_DUPLEX,
        4.0,
        Scalar::new(0.0, 255.0, 255.0, 0.0),
        8,
        imgproc::LINE_8,
        false,
    )
}

/// Writes frames annotated with tracks, motion segments, the counting line
/// and the running count to an mp4 file.
///
/// The writer is opened on the first frame, using the configured size or the
/// frame's own size.
pub struct AnnotatedVideoSink {
    path: PathBuf,
    line: CountingLine,
    output: OutputConfig,
    writer: Option<VideoWriter>,
    size: Size,
    /// Last drawn centroid per track id
    last_centroid: HashMap<u64, detection::Point>,
}

impl AnnotatedVideoSink {
    pub fn new(path: impl Into<PathBuf>, line: CountingLine, output: OutputConfig) -> Self {
        Self {
            path: path.into(),
            line,
            output,
            writer: None,
            size: Size::default(),
            last_centroid: HashMap::new(),
        }
    }

    fn open(&mut self, frame: &Mat) -> Result<()> {
        self.size = match self.output.size {
            Some([w, h]) => Size::new(w as i32, h as i32),
            None => frame.size()?,
        };
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            &self.path.to_string_lossy(),
            fourcc,
            self.output.fps,
            self.size,
            true,
        )
        .with_context(|| format!("failed to create video writer {}", self.path.display()))?;
        if !writer.is_opened()? {
            bail!("failed to open video writer {}", self.path.display());
        }
        info!(
            "writing annotated video to {} ({}x{} @ {} fps)",
            self.path.display(),
            self.size.width,
            self.size.height,
            self.output.fps
        );
        self.writer = Some(writer);
        Ok(())
    }

    /// Draw a report onto a copy of `frame`.
    pub fn annotate(&mut self, frame: &Mat, report: &FrameReport) -> Result<Mat> {
        let mut canvas = frame.try_clone()?;
        let mut seen = HashMap::with_capacity(report.tracks.len());

        for track in &report.tracks {
            draw_track(&mut canvas, track)?;
            let centroid = track.centroid();
            if let Some(prior) = self.last_centroid.get(&track.id) {
                imgproc::line(
                    &mut canvas,
                    to_cv(*prior),
                    to_cv(centroid),
                    track_color(track.id),
                    3,
                    imgproc::LINE_8,
                    0,
                )?;
            }
            seen.insert(track.id, centroid);
        }
        self.last_centroid = seen;

        draw_line(&mut canvas, &self.line)?;
        draw_count(&mut canvas, report.count)?;
        Ok(canvas)
    }
}

impl FrameSink<Mat> for AnnotatedVideoSink {
    fn write_frame(&mut self, frame: &Mat, report: &FrameReport) -> Result<()> {
        if self.writer.is_none() {
            self.open(frame)?;
        }
        let mut canvas = self.annotate(frame, report)?;
        if canvas.size()? != self.size {
            let mut resized = Mat::default();
            imgproc::resize(&canvas, &mut resized, self.size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
            canvas = resized;
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&canvas)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.release()?;
            debug!("closed {}", self.path.display());
        }
        Ok(())
    }
}
