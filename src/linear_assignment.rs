use munkres::{solve_assignment, Position, WeightMatrix};
use ndarray::Array2;
use tracing::warn;

use crate::detection::Detection;
use crate::kalman::{self, KalmanFilter};
use crate::track::Track;

/// Sentinel strictly above every rejection threshold; gated-out pairs carry
/// this cost and can never be selected.
pub const INFEASIBLE_COST: f32 = 1e5;

/// Outcome of one assignment round over index sets into the frame's
/// track and detection slices.
#[derive(Debug, Default)]
pub struct Matching {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Solves minimum-cost bipartite matching on the cost submatrix produced by
/// `metric` over `track_indices` x `detection_indices`, rejecting any pairing
/// whose cost exceeds `max_distance`.
pub fn min_cost_matching<F>(
    metric: F,
    max_distance: f32,
    tracks: &[Track],
    detections: &[Detection],
    track_indices: Vec<usize>,
    detection_indices: Vec<usize>,
) -> Matching
where
    F: Fn(&[Track], &[Detection], &[usize], &[usize]) -> Array2<f32>,
{
    if track_indices.is_empty() || detection_indices.is_empty() {
        return Matching {
            matches: Vec::new(),
            unmatched_tracks: track_indices,
            unmatched_detections: detection_indices,
        };
    }

    let cost = metric(tracks, detections, &track_indices, &detection_indices);
    let (rows, cols) = cost.dim();

    // Pad the matrix square with the clamp value so dummy assignments do not
    // distort the optimum among real entries.
    let clamp = max_distance + 1e-5;
    let n = rows.max(cols);

    let mut weights = WeightMatrix::from_fn(n, |(r, c)| {
        if r < rows && c < cols {
            cost[[r, c]].min(clamp)
        } else {
            clamp
        }
    });

    let positions = match solve_assignment(&mut weights) {
        Ok(positions) => positions,
        Err(_) => {
            warn!("assignment could not be solved, leaving all unmatched");
            Vec::new()
        }
    };

    let mut matches = Vec::new();
    let mut matched_rows = vec![false; rows];
    let mut matched_cols = vec![false; cols];

    for Position { row, column } in positions {
        if row < rows && column < cols && cost[[row, column]] <= max_distance {
            matched_rows[row] = true;
            matched_cols[column] = true;
            matches.push((track_indices[row], detection_indices[column]));
        }
    }

    let unmatched_tracks = track_indices
        .iter()
        .enumerate()
        .filter(|&(r, _)| !matched_rows[r])
        .map(|(_, &t)| t)
        .collect();
    let unmatched_detections = detection_indices
        .iter()
        .enumerate()
        .filter(|&(c, _)| !matched_cols[c])
        .map(|(_, &d)| d)
        .collect();

    Matching {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}

/// Cascaded assignment over staleness buckets: tracks missed fewer frames
/// get matching priority against all currently unmatched detections. An
/// explicit loop so each bucket's partial matching stays auditable.
pub fn matching_cascade<F>(
    metric: F,
    max_distance: f32,
    cascade_depth: u32,
    tracks: &[Track],
    detections: &[Detection],
    track_indices: Vec<usize>,
    detection_indices: Vec<usize>,
) -> Matching
where
    F: Fn(&[Track], &[Detection], &[usize], &[usize]) -> Array2<f32>,
{
    let mut matches = Vec::new();
    let mut unmatched_detections = detection_indices;

    for level in 0..cascade_depth {
        if unmatched_detections.is_empty() {
            break;
        }

        // after predict(), a track matched `level` frames ago has
        // time_since_update == 1 + level
        let level_tracks: Vec<usize> = track_indices
            .iter()
            .copied()
            .filter(|&t| tracks[t].time_since_update == 1 + level)
            .collect();

        if level_tracks.is_empty() {
            continue;
        }

        let round = min_cost_matching(
            &metric,
            max_distance,
            tracks,
            detections,
            level_tracks,
            unmatched_detections,
        );

        matches.extend(round.matches);
        unmatched_detections = round.unmatched_detections;
    }

    let unmatched_tracks = track_indices
        .into_iter()
        .filter(|&t| !matches.iter().any(|&(m, _)| m == t))
        .collect();

    Matching {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}

/// Applies the motion gate to a cost matrix: pairs whose squared Mahalanobis
/// distance exceeds the chi-squared threshold become infeasible. With
/// `motion_weight` > 0 the feasible entries blend the normalized motion
/// distance into the ranking cost; at 0 motion acts as a pure gate.
pub fn gate_cost_matrix(
    kf: &KalmanFilter,
    cost_matrix: &mut Array2<f32>,
    tracks: &[Track],
    detections: &[Detection],
    track_indices: &[usize],
    detection_indices: &[usize],
    motion_weight: f32,
) {
    let threshold = kalman::gating_threshold();

    for (row, &t) in track_indices.iter().enumerate() {
        let track = &tracks[t];

        for (col, &d) in detection_indices.iter().enumerate() {
            let measurement = detections[d].bbox.as_xyah().to_vector();

            match kf.gating_distance(track.mean(), track.covariance(), &measurement) {
                Some(dist) if dist <= threshold => {
                    if motion_weight > 0.0 {
                        cost_matrix[[row, col]] = motion_weight * (dist / threshold)
                            + (1.0 - motion_weight) * cost_matrix[[row, col]];
                    }
                }
                // over the gate, or degenerate covariance
                _ => cost_matrix[[row, col]] = INFEASIBLE_COST,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    use crate::bbox::BBox;
    use crate::kalman::KalmanFilter;

    fn detection_at(left: f32, top: f32) -> Detection {
        Detection::new(BBox::ltwh(left, top, 50.0, 100.0), 0.9, None)
    }

    fn track_at(kf: &KalmanFilter, left: f32, top: f32, id: u32) -> Track {
        Track::new(kf, &detection_at(left, top), id, 3, 30, 8)
    }

    #[test]
    fn picks_globally_cheapest_assignment() {
        let kf = KalmanFilter::new();
        let tracks = vec![track_at(&kf, 0.0, 0.0, 1), track_at(&kf, 200.0, 0.0, 2)];
        let detections = vec![detection_at(0.0, 0.0), detection_at(200.0, 0.0)];

        let metric = |_: &[Track], _: &[Detection], _: &[usize], _: &[usize]| {
            array![[0.1, 0.9], [0.9, 0.1]]
        };

        let result = min_cost_matching(metric, 1.0, &tracks, &detections, vec![0, 1], vec![0, 1]);

        assert_eq!(result.matches.len(), 2);
        assert!(result.matches.contains(&(0, 0)));
        assert!(result.matches.contains(&(1, 1)));
        assert!(result.unmatched_tracks.is_empty());
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn rejects_pairings_over_max_distance() {
        let kf = KalmanFilter::new();
        let tracks = vec![track_at(&kf, 0.0, 0.0, 1)];
        let detections = vec![detection_at(0.0, 0.0)];

        let metric =
            |_: &[Track], _: &[Detection], _: &[usize], _: &[usize]| array![[0.5_f32]];

        let result = min_cost_matching(metric, 0.3, &tracks, &detections, vec![0], vec![0]);

        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn empty_inputs_short_circuit() {
        let metric = |_: &[Track], _: &[Detection], _: &[usize], _: &[usize]| {
            unreachable!("metric must not run on empty index sets")
        };

        let result = min_cost_matching(metric, 1.0, &[], &[], vec![], vec![0, 1]);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_detections, vec![0, 1]);
    }

    #[test]
    fn cascade_prefers_fresher_track() {
        let kf = KalmanFilter::new();
        let mut stale = track_at(&kf, 0.0, 0.0, 1);
        let mut fresh = track_at(&kf, 0.0, 0.0, 2);

        stale.predict(&kf);
        stale.predict(&kf);
        fresh.predict(&kf);
        assert_eq!(stale.time_since_update, 2);
        assert_eq!(fresh.time_since_update, 1);

        let tracks = vec![stale, fresh];
        let detections = vec![detection_at(0.0, 0.0)];

        // both tracks equally compatible with the only detection
        let metric = |_: &[Track], _: &[Detection], ti: &[usize], di: &[usize]| {
            Array2::zeros((ti.len(), di.len()))
        };

        let result =
            matching_cascade(metric, 1.0, 30, &tracks, &detections, vec![0, 1], vec![0]);

        assert_eq!(result.matches, vec![(1, 0)]);
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn gate_marks_distant_pairs_infeasible() {
        let kf = KalmanFilter::new();
        let mut track = track_at(&kf, 10.0, 10.0, 1);
        track.predict(&kf);

        let tracks = vec![track];
        let detections = vec![detection_at(10.0, 10.0), detection_at(2000.0, 2000.0)];

        let mut cost = array![[0.05_f32, 0.05]];
        gate_cost_matrix(&kf, &mut cost, &tracks, &detections, &[0], &[0, 1], 0.0);

        assert!(cost[[0, 0]] < 1.0);
        assert_eq!(cost[[0, 1]], INFEASIBLE_COST);
    }

    #[test]
    fn gate_blends_motion_cost_when_weighted() {
        let kf = KalmanFilter::new();
        let mut track = track_at(&kf, 10.0, 10.0, 1);
        track.predict(&kf);

        let tracks = vec![track];
        let detections = vec![detection_at(10.0, 10.0)];

        let mut gated_only = array![[0.1_f32]];
        gate_cost_matrix(&kf, &mut gated_only, &tracks, &detections, &[0], &[0], 0.0);
        assert_eq!(gated_only[[0, 0]], 0.1);

        let mut blended = array![[0.1_f32]];
        gate_cost_matrix(&kf, &mut blended, &tracks, &detections, &[0], &[0], 0.5);
        // half appearance, half (near-zero) normalized motion distance
        assert!(blended[[0, 0]] < 0.1);
    }
}
