use pathfinding::kuhn_munkres::kuhn_munkres_min;
use pathfinding::matrix::Matrix;
use tracing::debug;

use crate::detection::BBox;
use crate::utils::compute_iou;

/// Integer scale applied to `1 - IoU` costs before solving.
const COST_SCALE: f32 = 1_000_000.0;

/// Result of associating predicted track boxes with detections.
/// Indices refer to the input slices and each list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// (track index, detection index)
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

impl Assignment {
    fn unmatched(tracks: usize, detections: usize) -> Self {
        Assignment {
            matches: Vec::new(),
            unmatched_tracks: (0..tracks).collect(),
            unmatched_detections: (0..detections).collect(),
        }
    }
}

/// IoU of every track box (rows) against every detection box (columns).
pub fn iou_matrix(tracks: &[BBox], detections: &[BBox]) -> Matrix<f32> {
    let mut ious = Matrix::new(tracks.len(), detections.len(), 0.0f32);
    for (i, track) in tracks.iter().enumerate() {
        for (j, det) in detections.iter().enumerate() {
            ious[(i, j)] = compute_iou(track, det);
        }
    }
    ious
}

/// Minimum-cost one-to-one assignment over a `1 - IoU` cost matrix.
///
/// Pairs whose IoU is below `min_iou` are rejected after solving and both
/// sides are reported unmatched. Pairs without any overlap are always
/// rejected, whatever `min_iou` is.
pub fn associate(tracks: &[BBox], detections: &[BBox], min_iou: f32) -> Assignment {
    if tracks.is_empty() || detections.is_empty() {
        return Assignment::unmatched(tracks.len(), detections.len());
    }

    let ious = iou_matrix(tracks, detections);
    let pairs = solve_min_cost(&ious);

    let mut track_matched = vec![false; tracks.len()];
    let mut det_matched = vec![false; detections.len()];
    let mut matches = Vec::with_capacity(pairs.len());
    for (t, d) in pairs {
        let iou = ious[(t, d)];
        if iou <= 0.0 || iou < min_iou {
            debug!("rejecting track {} / detection {} pair, iou {:.3}", t, d, iou);
            continue;
        }
        track_matched[t] = true;
        det_matched[d] = true;
        matches.push((t, d));
    }
    matches.sort_unstable();

    Assignment {
        matches,
        unmatched_tracks: (0..tracks.len()).filter(|&t| !track_matched[t]).collect(),
        unmatched_detections: (0..detections.len()).filter(|&d| !det_matched[d]).collect(),
    }
}

/// Run Kuhn-Munkres on the IoU matrix, returning (track, detection) pairs.
///
/// The solver needs rows <= columns, so the matrix is transposed when there
/// are more tracks than detections.
fn solve_min_cost(ious: &Matrix<f32>) -> Vec<(usize, usize)> {
    let (n_tracks, n_dets) = (ious.rows, ious.columns);
    let transpose = n_tracks > n_dets;
    let (rows, cols) = if transpose {
        (n_dets, n_tracks)
    } else {
        (n_tracks, n_dets)
    };

    let mut costs = Matrix::new(rows, cols, 0i64);
    for r in 0..rows {
        for c in 0..cols {
            let iou = if transpose { ious[(c, r)] } else { ious[(r, c)] };
            costs[(r, c)] = ((1.0 - iou).clamp(0.0, 1.0) * COST_SCALE).round() as i64;
        }
    }

    let (_total, assigned) = kuhn_munkres_min(&costs);
    assigned
        .into_iter()
        .enumerate()
        .map(|(r, c)| if transpose { (c, r) } else { (r, c) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x: f32, y: f32) -> BBox {
        BBox::new(x, y, x + 40.0, y + 80.0)
    }

    #[test]
    fn test_empty_inputs() {
        let a = associate(&[], &[bx(0.0, 0.0)], 0.3);
        assert!(a.matches.is_empty());
        assert!(a.unmatched_tracks.is_empty());
        assert_eq!(a.unmatched_detections, vec![0]);

        let a = associate(&[bx(0.0, 0.0), bx(100.0, 0.0)], &[], 0.3);
        assert_eq!(a.unmatched_tracks, vec![0, 1]);
        assert!(a.unmatched_detections.is_empty());

        assert_eq!(associate(&[], &[], 0.3), Assignment::default());
    }

    #[test]
    fn test_identical_boxes_match() {
        let tracks = [bx(0.0, 0.0), bx(200.0, 0.0)];
        let dets = [bx(200.0, 0.0), bx(0.0, 0.0)];
        let a = associate(&tracks, &dets, 0.3);
        assert_eq!(a.matches, vec![(0, 1), (1, 0)]);
        assert!(a.unmatched_tracks.is_empty());
        assert!(a.unmatched_detections.is_empty());
    }

    #[test]
    fn test_identical_box_wins_over_partial_overlap() {
        // Both tracks overlap the detection; the exact one must win.
        let tracks = [bx(10.0, 0.0), bx(0.0, 0.0)];
        let dets = [bx(0.0, 0.0)];
        let a = associate(&tracks, &dets, 0.3);
        assert_eq!(a.matches, vec![(1, 0)]);
        assert_eq!(a.unmatched_tracks, vec![0]);
    }

    #[test]
    fn test_disjoint_boxes_never_match() {
        let tracks = [bx(0.0, 0.0)];
        let dets = [bx(500.0, 500.0)];
        let ious = iou_matrix(&tracks, &dets);
        assert_eq!(ious[(0, 0)], 0.0);

        let a = associate(&tracks, &dets, 0.3);
        assert!(a.matches.is_empty());
        assert_eq!(a.unmatched_tracks, vec![0]);
        assert_eq!(a.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_disjoint_boxes_rejected_with_zero_threshold() {
        let tracks = [bx(100.0, 100.0)];
        let dets = [bx(700.0, 500.0)];
        let a = associate(&tracks, &dets, 0.0);
        assert!(a.matches.is_empty());
        assert_eq!(a.unmatched_tracks, vec![0]);
        assert_eq!(a.unmatched_detections, vec![0]);

        // Any real overlap still passes a zero threshold
        let a = associate(&tracks, &[bx(135.0, 100.0)], 0.0);
        assert_eq!(a.matches, vec![(0, 0)]);
    }

    #[test]
    fn test_low_overlap_pair_is_rejected() {
        // 40 px wide boxes shifted by 35 px: IoU = 5 / 75
        let tracks = [bx(0.0, 0.0)];
        let dets = [bx(35.0, 0.0)];
        let a = associate(&tracks, &dets, 0.3);
        assert!(a.matches.is_empty());
        assert_eq!(a.unmatched_tracks, vec![0]);
        assert_eq!(a.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_more_tracks_than_detections() {
        let tracks = [bx(0.0, 0.0), bx(100.0, 0.0), bx(200.0, 0.0)];
        let dets = [bx(205.0, 0.0), bx(2.0, 0.0)];
        let a = associate(&tracks, &dets, 0.3);
        assert_eq!(a.matches, vec![(0, 1), (2, 0)]);
        assert_eq!(a.unmatched_tracks, vec![1]);
        assert!(a.unmatched_detections.is_empty());
    }

    #[test]
    fn test_global_optimum_beats_greedy() {
        // Greedy on track 0 would take detection 0 and push track 1 onto a
        // weak pair; the optimum is 0-1 and 1-0.
        let tracks = [bx(0.0, 0.0), bx(12.0, 0.0)];
        let dets = [bx(6.0, 0.0), bx(-8.0, 0.0)];
        let a = associate(&tracks, &dets, 0.3);
        assert_eq!(a.matches, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_deterministic() {
        let tracks = [bx(0.0, 0.0), bx(0.0, 0.0)];
        let dets = [bx(0.0, 0.0), bx(0.0, 0.0)];
        let first = associate(&tracks, &dets, 0.3);
        for _ in 0..10 {
            assert_eq!(associate(&tracks, &dets, 0.3), first);
        }
        assert_eq!(first.matches.len(), 2);
    }
}
