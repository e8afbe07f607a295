use serde::Serialize;

use crate::detection::{BBox, Detection, Point};
use crate::kalman_filter::{KalmanFilter, Measurement, StateCovariance, StateVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Tentative,
    Confirmed,
    Deleted,
}

/// One identity hypothesis followed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique for the run, never reused
    pub id: u64,
    mean: StateVector,
    covariance: StateCovariance,
    /// Frames since creation
    pub age: u32,
    /// Matched detections, including the one that created the track
    pub hits: u32,
    /// Consecutive frames with a match
    pub hit_streak: u32,
    /// Frames since the last match
    pub time_since_update: u32,
    pub status: TrackStatus,
    /// Confidence of the last matched detection
    pub confidence: f32,
    pub class_id: i64,
}

fn measurement_of(bbox: &BBox) -> Measurement {
    Measurement::from(bbox.to_cxcywh())
}

impl Track {
    /// Seed a tentative track from an unmatched detection.
    pub fn new(id: u64, detection: &Detection, kalman: &KalmanFilter) -> Self {
        let (mean, covariance) = kalman.initiate(&measurement_of(&detection.bbox));
        Track {
            id,
            mean,
            covariance,
            age: 0,
            hits: 1,
            hit_streak: 1,
            time_since_update: 0,
            status: TrackStatus::Tentative,
            confidence: detection.confidence,
            class_id: detection.class_id,
        }
    }

    /// Advance the state one frame without any observation.
    pub fn predict(&mut self, kalman: &KalmanFilter) {
        let (mean, covariance) = kalman.predict(&self.mean, &self.covariance);
        self.mean = mean;
        self.covariance = covariance;
        self.age += 1;
        self.time_since_update += 1;
    }

    /// Correct the predicted state with the matched detection.
    pub fn update(&mut self, kalman: &KalmanFilter, detection: &Detection) {
        let (mean, covariance) =
            kalman.update(&self.mean, &self.covariance, &measurement_of(&detection.bbox));
        self.mean = mean;
        self.covariance = covariance;
        self.time_since_update = 0;
        self.hits += 1;
        self.hit_streak += 1;
        self.confidence = detection.confidence;
        self.class_id = detection.class_id;
    }

    /// No detection this frame. Deletes the track once it has gone
    /// unmatched for more than `max_age` frames.
    pub fn mark_missed(&mut self, max_age: u32) {
        self.hit_streak = 0;
        if self.time_since_update > max_age {
            self.status = TrackStatus::Deleted;
        }
    }

    pub fn confirm(&mut self) {
        if self.status == TrackStatus::Tentative {
            self.status = TrackStatus::Confirmed;
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TrackStatus::Confirmed
    }

    pub fn is_deleted(&self) -> bool {
        self.status == TrackStatus::Deleted
    }

    /// Current box estimate.
    pub fn bbox(&self) -> BBox {
        BBox::from_cxcywh([self.mean[0], self.mean[1], self.mean[2], self.mean[3]])
    }

    pub fn centroid(&self) -> Point {
        Point::new(self.mean[0], self.mean[1])
    }

    pub fn is_finite(&self) -> bool {
        self.mean.iter().all(|v| v.is_finite())
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            bbox: self.bbox(),
            confidence: self.confidence,
            age: self.age,
            hit_streak: self.hit_streak,
            matched: self.time_since_update == 0,
        }
    }
}

/// What the tracker exposes about a confirmed track after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub id: u64,
    pub bbox: BBox,
    pub confidence: f32,
    pub age: u32,
    pub hit_streak: u32,
    /// Observed this frame; `false` while coasting on prediction
    pub matched: bool,
}

impl TrackSnapshot {
    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const MAX_AGE: u32 = 3;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(BBox::new(x1, y1, x2, y2), 0.9, 0).unwrap()
    }

    #[test]
    fn test_track_initialization() {
        let kf = KalmanFilter::default();
        let track = Track::new(1, &det(100.0, 100.0, 150.0, 150.0), &kf);

        assert_eq!(track.id, 1);
        assert_eq!(track.time_since_update, 0);
        assert_eq!(track.hits, 1);
        assert_eq!(track.hit_streak, 1);
        assert_eq!(track.status, TrackStatus::Tentative);

        let bbox = track.bbox();
        assert_relative_eq!(bbox.x1, 100.0);
        assert_relative_eq!(bbox.y2, 150.0);
    }

    #[test]
    fn test_track_predict() {
        let kf = KalmanFilter::default();
        let mut track = Track::new(1, &det(100.0, 100.0, 150.0, 150.0), &kf);

        // Zero velocity: position stays put
        track.predict(&kf);
        assert_relative_eq!(track.bbox().x1, 100.0);
        assert_eq!(track.age, 1);
        assert_eq!(track.time_since_update, 1);
    }

    #[test]
    fn test_track_update() {
        let kf = KalmanFilter::default();
        let mut track = Track::new(1, &det(100.0, 100.0, 150.0, 150.0), &kf);

        track.predict(&kf);
        track.update(&kf, &det(110.0, 105.0, 160.0, 155.0));

        assert_eq!(track.time_since_update, 0);
        assert_eq!(track.hits, 2);
        assert_eq!(track.hit_streak, 2);
        let c = track.centroid();
        assert!(c.x > 125.0 && c.x <= 135.0);
        assert!(track.snapshot().matched);

        // Picked up rightward motion: the next prediction moves on
        track.predict(&kf);
        assert!(track.centroid().x > c.x);
    }

    #[test]
    fn test_track_mark_missed() {
        let kf = KalmanFilter::default();
        let mut track = Track::new(1, &det(100.0, 100.0, 150.0, 150.0), &kf);

        for i in 1..=MAX_AGE {
            track.predict(&kf);
            track.mark_missed(MAX_AGE);
            assert_eq!(track.time_since_update, i);
            assert_eq!(track.hit_streak, 0);
            assert!(!track.is_deleted());
            assert!(!track.snapshot().matched);
        }

        // One more miss deletes the track
        track.predict(&kf);
        track.mark_missed(MAX_AGE);
        assert!(track.is_deleted());
    }

    #[test]
    fn test_track_confirm_is_sticky() {
        let kf = KalmanFilter::default();
        let mut track = Track::new(7, &det(0.0, 0.0, 10.0, 10.0), &kf);
        assert!(!track.is_confirmed());

        track.confirm();
        assert!(track.is_confirmed());

        track.predict(&kf);
        track.mark_missed(MAX_AGE);
        assert!(track.is_confirmed());
    }
}
