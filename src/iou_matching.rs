use ndarray::Array2;

use crate::detection::Detection;
use crate::linear_assignment::INFEASIBLE_COST;
use crate::track::Track;

/// Cost matrix `1 - IoU` between track boxes and detection boxes.
///
/// Only tracks seen on the previous frame carry a usable box here; anything
/// staler is infeasible for this stage and must go through the appearance
/// cascade instead.
pub fn iou_cost(
    tracks: &[Track],
    detections: &[Detection],
    track_indices: &[usize],
    detection_indices: &[usize],
) -> Array2<f32> {
    let mut cost = Array2::zeros((track_indices.len(), detection_indices.len()));

    for (row, &t) in track_indices.iter().enumerate() {
        let track = &tracks[t];

        if track.time_since_update > 1 {
            cost.row_mut(row).fill(INFEASIBLE_COST);
            continue;
        }

        let bbox = track.bbox();
        for (col, &d) in detection_indices.iter().enumerate() {
            cost[[row, col]] = 1.0 - bbox.iou(&detections[d].bbox);
        }
    }

    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    use crate::bbox::BBox;
    use crate::kalman::KalmanFilter;

    fn detection_at(left: f32, top: f32) -> Detection {
        Detection::new(BBox::ltwh(left, top, 50.0, 100.0), 0.9, None)
    }

    #[test]
    fn overlap_cheap_disjoint_expensive() {
        let kf = KalmanFilter::new();
        let mut track = Track::new(&kf, &detection_at(10.0, 10.0), 1, 3, 30, 8);
        track.predict(&kf);

        let tracks = vec![track];
        let detections = vec![detection_at(10.0, 10.0), detection_at(500.0, 500.0)];

        let cost = iou_cost(&tracks, &detections, &[0], &[0, 1]);

        assert_abs_diff_eq!(cost[[0, 0]], 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(cost[[0, 1]], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn stale_track_is_infeasible() {
        let kf = KalmanFilter::new();
        let mut track = Track::new(&kf, &detection_at(10.0, 10.0), 1, 3, 30, 8);
        track.predict(&kf);
        track.predict(&kf);

        let tracks = vec![track];
        let detections = vec![detection_at(10.0, 10.0)];

        let cost = iou_cost(&tracks, &detections, &[0], &[0]);
        assert_eq!(cost[[0, 0]], INFEASIBLE_COST);
    }
}
