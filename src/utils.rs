use crate::detection::BBox;

/// Intersection-over-union of two boxes in ltrb format.
///
/// Degenerate boxes (zero union) have IoU 0.
pub fn compute_iou(a: &BBox, b: &BBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter_area;

    if !(union > 0.0) {
        return 0.0;
    }

    (inter_area / union).clamp(0.0, 1.0)
}

/// Assignment cost of pairing two boxes: 0 for identical, 1 for disjoint.
#[inline]
pub fn iou_cost(a: &BBox, b: &BBox) -> f32 {
    1.0 - compute_iou(a, b)
}
