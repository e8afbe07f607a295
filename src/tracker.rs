use tracing::{debug, warn};

use crate::config::{ConfirmPolicy, TrackerConfig};
use crate::detection::{BBox, Detection};
use crate::kalman_filter::KalmanFilter;
use crate::matching::associate;
use crate::track::{Track, TrackSnapshot};

/// Multi-object tracker using a Kalman filter and IoU matching.
///
/// Owns the live track set and the id counter. Only confirmed tracks are
/// visible through [`Tracker::update`].
#[derive(Debug, Clone)]
pub struct Tracker {
    /// Kalman filter for state estimation
    kalman: KalmanFilter,
    config: TrackerConfig,
    /// Live tracks, ordered by creation
    tracks: Vec<Track>,
    /// Next id to hand out
    next_id: u64,
    /// Frames seen since the last reset
    frame_count: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Tracker {
            kalman: KalmanFilter::new(config.motion),
            config,
            tracks: Vec::new(),
            next_id: 1,
            frame_count: 0,
        }
    }

    /// All live tracks, confirmed or not.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn live_ids(&self) -> Vec<u64> {
        self.tracks.iter().map(|t| t.id).collect()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Back to an empty track set with ids starting again at 1.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
        self.frame_count = 0;
    }

    /// Advance one frame with this frame's detections and return the
    /// confirmed tracks.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackSnapshot> {
        self.frame_count += 1;

        // Predict locations
        for track in self.tracks.iter_mut() {
            track.predict(&self.kalman);
        }
        self.tracks.retain(|t| {
            let ok = t.is_finite();
            if !ok {
                warn!("dropping track {} with diverged state", t.id);
            }
            ok
        });

        let predicted: Vec<BBox> = self.tracks.iter().map(Track::bbox).collect();
        let boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
        let assignment = associate(&predicted, &boxes, self.config.iou_threshold);

        for &(track_idx, det_idx) in &assignment.matches {
            self.tracks[track_idx].update(&self.kalman, &detections[det_idx]);
        }
        for &track_idx in &assignment.unmatched_tracks {
            self.tracks[track_idx].mark_missed(self.config.max_age);
        }
        for &det_idx in &assignment.unmatched_detections {
            let id = self.next_id;
            self.next_id += 1;
            debug!("new track {} at {:?}", id, detections[det_idx].bbox);
            self.tracks
                .push(Track::new(id, &detections[det_idx], &self.kalman));
        }

        let frame_count = self.frame_count;
        let config = self.config;
        for track in self.tracks.iter_mut() {
            if track.time_since_update == 0
                && !track.is_confirmed()
                && Self::ready(&config, frame_count, track)
            {
                track.confirm();
                debug!("track {} confirmed", track.id);
            }
        }

        self.tracks.retain(|t| {
            if t.is_deleted() {
                debug!("track {} deleted after {} missed frames", t.id, t.time_since_update);
            }
            !t.is_deleted()
        });

        debug!(
            "frame {}: {} matched, {} live tracks",
            self.frame_count,
            assignment.matches.len(),
            self.tracks.len()
        );

        self.tracks
            .iter()
            .filter(|t| t.is_confirmed())
            .map(Track::snapshot)
            .collect()
    }

    fn ready(config: &TrackerConfig, frame_count: u64, track: &Track) -> bool {
        match config.confirmation {
            ConfirmPolicy::HitStreak => track.hit_streak >= config.min_hits,
            ConfirmPolicy::Immediate => true,
            ConfirmPolicy::Warmup => {
                track.hit_streak >= config.min_hits || frame_count <= u64::from(config.min_hits)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32) -> Detection {
        Detection::new(BBox::new(x1, y1, x1 + 40.0, y1 + 80.0), 0.9, 0).unwrap()
    }

    fn config(min_hits: u32, max_age: u32) -> TrackerConfig {
        TrackerConfig {
            min_hits,
            max_age,
            ..TrackerConfig::default()
        }
    }

    #[test]
    fn test_tracks_created_and_confirmed() {
        let mut tracker = Tracker::new(config(3, 1));

        let out = tracker.update(&[det(100.0, 100.0), det(300.0, 100.0)]);
        assert!(out.is_empty());
        assert_eq!(tracker.live_ids(), vec![1, 2]);

        assert!(tracker.update(&[det(102.0, 104.0), det(303.0, 101.0)]).is_empty());

        let out = tracker.update(&[det(104.0, 108.0), det(306.0, 102.0)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, 1);
        assert_eq!(out[1].id, 2);
        assert!(out.iter().all(|t| t.matched));
        assert_eq!(tracker.live_ids(), vec![1, 2]);
    }

    #[test]
    fn test_immediate_policy() {
        let mut tracker = Tracker::new(TrackerConfig {
            confirmation: ConfirmPolicy::Immediate,
            ..config(3, 1)
        });
        let out = tracker.update(&[det(100.0, 100.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);
    }

    #[test]
    fn test_warmup_policy() {
        let mut tracker = Tracker::new(TrackerConfig {
            confirmation: ConfirmPolicy::Warmup,
            ..config(3, 1)
        });
        // Frames 1..=3 trust new tracks
        assert_eq!(tracker.update(&[det(100.0, 100.0)]).len(), 1);

        tracker.update(&[det(100.0, 100.0)]);
        tracker.update(&[det(100.0, 100.0)]);

        // After warm-up a newcomer must earn its streak
        let out = tracker.update(&[det(100.0, 100.0), det(500.0, 500.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);
        assert_eq!(tracker.live_ids(), vec![1, 2]);
    }

    #[test]
    fn test_single_frame_false_positive_never_confirmed() {
        let mut tracker = Tracker::new(config(3, 1));
        for frame in 0..10 {
            let dets = if frame == 4 {
                vec![det(400.0, 400.0)]
            } else {
                Vec::new()
            };
            assert!(tracker.update(&dets).is_empty());
        }
        // The spurious track has aged out entirely
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn test_gap_within_max_age_keeps_id() {
        let max_age = 3;
        let mut tracker = Tracker::new(config(1, max_age));
        tracker.update(&[det(200.0, 200.0)]);
        tracker.update(&[det(200.0, 200.0)]);

        for _ in 0..max_age {
            let out = tracker.update(&[]);
            assert_eq!(out.len(), 1);
            assert!(!out[0].matched);
        }

        let out = tracker.update(&[det(201.0, 200.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 1);
        assert!(out[0].matched);
    }

    #[test]
    fn test_gap_beyond_max_age_gets_new_id() {
        let max_age = 3;
        let mut tracker = Tracker::new(config(1, max_age));
        tracker.update(&[det(200.0, 200.0)]);
        tracker.update(&[det(200.0, 200.0)]);

        for _ in 0..=max_age {
            tracker.update(&[]);
        }
        // Deleted track is unreachable
        assert!(tracker.live_ids().is_empty());

        let out = tracker.update(&[det(200.0, 200.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 2);
    }

    #[test]
    fn test_exit_and_entry_same_frame() {
        let mut tracker = Tracker::new(config(1, 1));
        tracker.update(&[det(10.0, 300.0)]);
        tracker.update(&[det(12.0, 300.0)]);

        // Object 1 leaves on the left while another appears on the right
        let out = tracker.update(&[det(700.0, 300.0)]);
        let ids: Vec<u64> = out.iter().filter(|t| t.matched).map(|t| t.id).collect();
        assert_eq!(ids, vec![2]);

        let mut all_ids = tracker.live_ids();
        all_ids.sort_unstable();
        assert_eq!(all_ids, vec![1, 2]);
    }

    #[test]
    fn test_zero_iou_threshold_never_teleports() {
        let mut tracker = Tracker::new(TrackerConfig {
            iou_threshold: 0.0,
            ..config(1, 1)
        });
        tracker.update(&[det(80.0, 60.0)]);
        tracker.update(&[det(80.0, 60.0)]);

        // Someone else appears far away while the first person is lost
        let out = tracker.update(&[det(680.0, 460.0)]);
        let matched: Vec<u64> = out.iter().filter(|t| t.matched).map(|t| t.id).collect();
        assert_eq!(matched, vec![2]);
    }

    #[test]
    fn test_no_detections_ages_tracks() {
        let mut tracker = Tracker::new(config(1, 5));
        tracker.update(&[det(0.0, 0.0)]);
        tracker.update(&[]);
        tracker.update(&[]);
        assert_eq!(tracker.tracks()[0].time_since_update, 2);
        assert_eq!(tracker.tracks()[0].hit_streak, 0);
        assert_eq!(tracker.frame_count(), 3);
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut tracker = Tracker::new(config(1, 1));
        tracker.update(&[det(0.0, 0.0), det(200.0, 0.0)]);
        tracker.reset();
        assert!(tracker.tracks().is_empty());
        assert_eq!(tracker.frame_count(), 0);

        let out = tracker.update(&[det(0.0, 0.0)]);
        assert_eq!(out[0].id, 1);
    }
}
