use ndarray::Array2;
use tracing::{debug, warn};

use crate::detection::Detection;
use crate::error::Error;
use crate::iou_matching;
use crate::kalman::KalmanFilter;
use crate::linear_assignment::{gate_cost_matrix, matching_cascade, min_cost_matching};
use crate::nn_matching;
use crate::track::{Track, TrackOutput};

/// Tracker tuning knobs, validated once at construction.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Frames a confirmed track survives without a match before deletion.
    pub max_age: u32,
    /// Consecutive hits required to promote a tentative track.
    pub n_init: u32,
    /// Rejection threshold for the appearance (cosine) cost.
    pub max_appearance_distance: f32,
    /// Rejection threshold for the IoU association stage.
    pub max_iou_distance: f32,
    /// Appearance descriptors retained per track.
    pub gallery_capacity: usize,
    /// Blend factor for the normalized motion distance; 0 means motion acts
    /// as a pure gate and appearance alone ranks candidates.
    pub motion_weight: f32,
    /// Hard cap on live tracks, bounding memory under detection spam.
    pub max_tracks: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            n_init: 3,
            max_appearance_distance: 0.2,
            max_iou_distance: 0.7,
            gallery_capacity: 100,
            motion_weight: 0.0,
            max_tracks: 512,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_age < 1 {
            return Err(Error::InvalidConfig("max_age must be at least 1"));
        }
        if self.n_init < 1 {
            return Err(Error::InvalidConfig("n_init must be at least 1"));
        }
        if !(self.max_appearance_distance > 0.0 && self.max_appearance_distance.is_finite()) {
            return Err(Error::InvalidConfig(
                "max_appearance_distance must be positive and finite",
            ));
        }
        if !(self.max_iou_distance > 0.0 && self.max_iou_distance <= 1.0) {
            return Err(Error::InvalidConfig(
                "max_iou_distance must be within (0, 1]",
            ));
        }
        if self.gallery_capacity < 1 {
            return Err(Error::InvalidConfig("gallery_capacity must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.motion_weight) {
            return Err(Error::InvalidConfig("motion_weight must be within [0, 1]"));
        }
        if self.max_tracks < 1 {
            return Err(Error::InvalidConfig("max_tracks must be at least 1"));
        }

        Ok(())
    }
}

/// Lifecycle notification emitted by [`Tracker::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    Created(u32),
    Confirmed(u32),
    Deleted(u32),
}

/// The track lifecycle manager: owns the live track set, drives per-frame
/// prediction, association and pruning. One instance per tracker session;
/// independent instances share no state.
pub struct Tracker {
    config: TrackerConfig,
    kf: KalmanFilter,
    tracks: Vec<Track>,
    next_id: u32,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            config,
            kf: KalmanFilter::new(),
            tracks: Vec::new(),
            next_id: 1,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Advances every live track one frame forward. Call once per frame,
    /// before [`Tracker::update`].
    pub fn predict(&mut self) {
        for track in &mut self.tracks {
            track.predict(&self.kf);
        }
    }

    /// Ingests one frame's detections: associates them with live tracks,
    /// applies match/miss outcomes, spawns tentative tracks for the
    /// leftovers and prunes dead tracks. Returns the frame's lifecycle
    /// events. A malformed detection is logged and skipped without
    /// affecting the rest of the frame.
    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackEvent> {
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|det| {
                if det.is_valid() {
                    true
                } else {
                    warn!(bbox = ?det.bbox, "skipping malformed detection");
                    false
                }
            })
            .collect();

        let (matches, unmatched_tracks, unmatched_detections) = self.associate(&detections);

        let mut events = Vec::new();

        for (t, d) in matches {
            let kf = &self.kf;
            if self.tracks[t].update(kf, &detections[d]) {
                let track_id = self.tracks[t].track_id;
                debug!(track_id, "track confirmed");
                events.push(TrackEvent::Confirmed(track_id));
            }
        }

        for t in unmatched_tracks {
            let track = &mut self.tracks[t];
            track.mark_missed();

            if track.is_deleted() {
                debug!(track_id = track.track_id, "track deleted");
                events.push(TrackEvent::Deleted(track.track_id));
            }
        }

        // prune before spawning so freed slots count toward max_tracks
        self.tracks.retain(|track| !track.is_deleted());

        for d in unmatched_detections {
            if self.tracks.len() >= self.config.max_tracks {
                warn!(
                    max_tracks = self.config.max_tracks,
                    "track capacity reached, dropping unmatched detection"
                );
                continue;
            }

            let track_id = self.next_id;
            self.next_id += 1;

            self.tracks.push(Track::new(
                &self.kf,
                &detections[d],
                track_id,
                self.config.n_init,
                self.config.max_age,
                self.config.gallery_capacity,
            ));

            debug!(track_id, "track created");
            events.push(TrackEvent::Created(track_id));
        }

        events
    }

    /// Two-stage association over a read-only snapshot of the track set:
    /// an appearance cascade over confirmed tracks (motion-gated, freshest
    /// first), then an IoU round for tentative tracks and confirmed tracks
    /// missed exactly once.
    fn associate(&self, detections: &[Detection]) -> (Vec<(usize, usize)>, Vec<usize>, Vec<usize>) {
        let mut confirmed = Vec::new();
        let mut unconfirmed = Vec::new();
        for (idx, track) in self.tracks.iter().enumerate() {
            if track.is_confirmed() {
                confirmed.push(idx);
            } else {
                unconfirmed.push(idx);
            }
        }

        let kf = &self.kf;
        let max_appearance_distance = self.config.max_appearance_distance;
        let motion_weight = self.config.motion_weight;

        let gated_metric =
            |tracks: &[Track], dets: &[Detection], ti: &[usize], di: &[usize]| {
                let mut cost = Array2::zeros((ti.len(), di.len()));

                for (row, &t) in ti.iter().enumerate() {
                    for (col, &d) in di.iter().enumerate() {
                        cost[[row, col]] = nn_matching::appearance_cost(
                            tracks[t].gallery(),
                            &dets[d],
                            max_appearance_distance,
                        );
                    }
                }

                gate_cost_matrix(kf, &mut cost, tracks, dets, ti, di, motion_weight);
                cost
            };

        let cascade = matching_cascade(
            gated_metric,
            max_appearance_distance,
            self.config.max_age,
            &self.tracks,
            detections,
            confirmed,
            (0..detections.len()).collect(),
        );

        let mut iou_candidates = unconfirmed;
        let mut unmatched_tracks = Vec::new();
        for t in cascade.unmatched_tracks {
            if self.tracks[t].time_since_update == 1 {
                iou_candidates.push(t);
            } else {
                unmatched_tracks.push(t);
            }
        }

        let iou_round = min_cost_matching(
            iou_matching::iou_cost,
            self.config.max_iou_distance,
            &self.tracks,
            detections,
            iou_candidates,
            cascade.unmatched_detections,
        );

        unmatched_tracks.extend(iou_round.unmatched_tracks);

        let matches = cascade
            .matches
            .into_iter()
            .chain(iou_round.matches)
            .collect();

        (matches, unmatched_tracks, iou_round.unmatched_detections)
    }

    /// The externally visible result: confirmed tracks only, tentative
    /// tracks are never exposed. Coasting confirmed tracks report their
    /// predicted box until deletion.
    pub fn tracks(&self) -> Vec<TrackOutput> {
        self.tracks
            .iter()
            .filter(|track| track.is_confirmed())
            .map(Into::into)
            .collect()
    }
}
