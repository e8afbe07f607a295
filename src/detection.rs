use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use num_traits::cast::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DetectionError;

/// A point in frame (pixel) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned box in left-top-right-bottom format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from center-x, center-y, width, height.
    pub fn from_cxcywh(cxcywh: [f32; 4]) -> Self {
        let [cx, cy, w, h] = cxcywh;
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn to_cxcywh(&self) -> [f32; 4] {
        let c = self.centroid();
        [c.x, c.y, self.width(), self.height()]
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn centroid(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// Detector output before validation.
///
/// Deserializes from either `{"bbox": [x1, y1, x2, y2], "confidence": c, "class_id": k}`
/// or the detector-native row `[x1, y1, x2, y2, confidence, class]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRecord")]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Row([f32; 6]),
    Record {
        bbox: [f32; 4],
        confidence: f32,
        class_id: f32,
    },
}

impl From<RawRecord> for RawDetection {
    fn from(record: RawRecord) -> Self {
        match record {
            RawRecord::Row([x1, y1, x2, y2, confidence, class_id]) => RawDetection {
                bbox: [x1, y1, x2, y2],
                confidence,
                class_id,
            },
            RawRecord::Record {
                bbox,
                confidence,
                class_id,
            } => RawDetection {
                bbox,
                confidence,
                class_id,
            },
        }
    }
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], confidence: f32, class_id: i64) -> Self {
        Self {
            bbox,
            confidence,
            class_id: class_id as f32,
        }
    }
}

/// A validated detection, consumed within one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: i64,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class_id: i64) -> Result<Self, DetectionError> {
        if !bbox.is_finite() {
            return Err(DetectionError::NonFiniteBox);
        }
        if bbox.x1 >= bbox.x2 || bbox.y1 >= bbox.y2 {
            return Err(DetectionError::InvertedBox {
                x1: bbox.x1,
                y1: bbox.y1,
                x2: bbox.x2,
                y2: bbox.y2,
            });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DetectionError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            bbox,
            confidence,
            class_id,
        })
    }
}

impl TryFrom<&RawDetection> for Detection {
    type Error = DetectionError;

    fn try_from(raw: &RawDetection) -> Result<Self, Self::Error> {
        // YOLO-style rows carry the class as a float.
        if raw.class_id.fract() != 0.0 {
            return Err(DetectionError::InvalidClass(raw.class_id));
        }
        let class_id = raw
            .class_id
            .to_i64()
            .ok_or(DetectionError::InvalidClass(raw.class_id))?;
        let [x1, y1, x2, y2] = raw.bbox;
        Detection::new(BBox::new(x1, y1, x2, y2), raw.confidence, class_id)
    }
}

/// Keeps only valid detections of the target class at or above the confidence floor.
#[derive(Debug, Clone, Copy)]
pub struct DetectionFilter {
    pub class_id: i64,
    pub conf_threshold: f32,
}

impl DetectionFilter {
    pub fn new(class_id: i64, conf_threshold: f32) -> Self {
        Self {
            class_id,
            conf_threshold,
        }
    }

    pub fn apply(&self, raw: &[RawDetection]) -> Vec<Detection> {
        let mut kept = Vec::with_capacity(raw.len());
        for row in raw {
            match Detection::try_from(row) {
                Ok(det) => {
                    if det.class_id == self.class_id && det.confidence >= self.conf_threshold {
                        kept.push(det);
                    }
                }
                Err(err) => warn!("dropping malformed detection {:?}: {}", row, err),
            }
        }
        debug!("{} of {} detections kept", kept.len(), raw.len());
        kept
    }
}

/// The external object detector, seen from the tracking core.
pub trait Detector<F> {
    /// Detections for frame number `index` (0-based).
    fn detect(&mut self, index: u64, frame: &F) -> Result<Vec<RawDetection>>;
}

#[derive(Debug, Deserialize)]
struct FrameDetections {
    #[serde(default)]
    frame: Option<u64>,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

/// Pre-computed detector output replayed frame by frame.
///
/// One JSON object per line: `{"frame": 12, "detections": [[x1, y1, x2, y2, conf, cls], ...]}`.
/// Lines without `frame` follow the previous line. Frames missing from the log
/// have no detections.
#[derive(Debug, Default, Clone)]
pub struct DetectionLog {
    frames: BTreeMap<u64, Vec<RawDetection>>,
    frame_count: u64,
}

impl DetectionLog {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open detection log {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse detection log {}", path.display()))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut log = DetectionLog::default();
        let mut next_index = 0u64;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: FrameDetections = serde_json::from_str(&line)
                .with_context(|| format!("invalid record on line {}", line_no + 1))?;
            let index = record.frame.unwrap_or(next_index);
            log.frames
                .entry(index)
                .or_default()
                .extend(record.detections);
            next_index = index
                .checked_add(1)
                .with_context(|| format!("frame index too large on line {}", line_no + 1))?;
            log.frame_count = log.frame_count.max(next_index);
        }
        Ok(log)
    }

    /// Number of frames covered, i.e. highest frame index + 1.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn detections(&self, index: u64) -> &[RawDetection] {
        self.frames.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl<F> Detector<F> for DetectionLog {
    fn detect(&mut self, index: u64, _frame: &F) -> Result<Vec<RawDetection>> {
        Ok(self.detections(index).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bbox_centroid_and_conversion() {
        let bbox = BBox::new(80.0, 60.0, 120.0, 140.0);
        let c = bbox.centroid();
        assert_relative_eq!(c.x, 100.0);
        assert_relative_eq!(c.y, 100.0);

        let back = BBox::from_cxcywh(bbox.to_cxcywh());
        assert_relative_eq!(back.x1, bbox.x1);
        assert_relative_eq!(back.y2, bbox.y2);
        assert_relative_eq!(bbox.area(), 3200.0);
    }

    #[test]
    fn test_detection_validation() {
        let ok = RawDetection::new([0.0, 0.0, 10.0, 20.0], 0.9, 0);
        assert!(Detection::try_from(&ok).is_ok());

        let inverted = RawDetection::new([10.0, 0.0, 5.0, 20.0], 0.9, 0);
        assert!(matches!(
            Detection::try_from(&inverted),
            Err(DetectionError::InvertedBox { .. })
        ));

        let nan = RawDetection::new([f32::NAN, 0.0, 5.0, 20.0], 0.9, 0);
        assert_eq!(Detection::try_from(&nan), Err(DetectionError::NonFiniteBox));

        let conf = RawDetection::new([0.0, 0.0, 5.0, 20.0], 1.5, 0);
        assert_eq!(
            Detection::try_from(&conf),
            Err(DetectionError::ConfidenceOutOfRange(1.5))
        );

        let class = RawDetection {
            bbox: [0.0, 0.0, 5.0, 20.0],
            confidence: 0.7,
            class_id: 0.5,
        };
        assert_eq!(
            Detection::try_from(&class),
            Err(DetectionError::InvalidClass(0.5))
        );
    }

    #[test]
    fn test_filter_class_and_confidence() {
        let filter = DetectionFilter::new(0, 0.5);
        let raw = vec![
            RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.9, 0),
            RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.5, 0),
            RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.49, 0),
            RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.95, 2),
            RawDetection::new([10.0, 0.0, 0.0, 10.0], 0.95, 0),
        ];
        let kept = filter.apply(&raw);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|d| d.class_id == 0 && d.confidence >= 0.5));

        assert!(filter.apply(&[]).is_empty());
    }

    #[test]
    fn test_raw_detection_formats() {
        let row: RawDetection = serde_json::from_str("[1, 2, 3, 4, 0.8, 0]").unwrap();
        assert_eq!(row, RawDetection::new([1.0, 2.0, 3.0, 4.0], 0.8, 0));

        let record: RawDetection =
            serde_json::from_str(r#"{"bbox": [1, 2, 3, 4], "confidence": 0.8, "class_id": 0}"#)
                .unwrap();
        assert_eq!(record, row);
    }

    #[test]
    fn test_detection_log_replay() {
        let data = "\
{\"frame\": 0, \"detections\": [[0, 0, 10, 10, 0.9, 0]]}
{\"detections\": []}

{\"frame\": 4, \"detections\": [[5, 5, 15, 15, 0.8, 0], [20, 20, 30, 30, 0.7, 1]]}
";
        let mut log = DetectionLog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(log.frame_count(), 5);
        assert_eq!(log.detections(0).len(), 1);
        assert!(log.detections(1).is_empty());
        assert!(log.detections(3).is_empty());
        assert_eq!(log.detect(4, &()).unwrap().len(), 2);
        assert!(log.detect(99, &()).unwrap().is_empty());
    }

    #[test]
    fn test_detection_log_rejects_last_frame_index() {
        let data = format!("{{\"frame\": {}, \"detections\": []}}\n", u64::MAX);
        let err = DetectionLog::from_reader(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("frame index too large on line 1"));

        let data = format!("{{\"frame\": {}, \"detections\": []}}\n", u64::MAX - 1);
        let log = DetectionLog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(log.frame_count(), u64::MAX);
    }

    #[test]
    fn test_detection_log_rejects_garbage() {
        let data = "{\"frame\": 0, \"detections\": [[0, 0]]}\n";
        assert!(DetectionLog::from_reader(data.as_bytes()).is_err());
    }
}
