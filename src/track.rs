use serde_derive::Serialize;
use tracing::warn;

use crate::bbox::{BBox, Ltwh};
use crate::detection::Detection;
use crate::kalman::{KalmanFilter, StateCov, StateMean};
use crate::nn_matching::FeatureGallery;

/// Lifecycle state of a single track. Newly created tracks are `Tentative`
/// until enough consecutive hits have been collected, then `Confirmed`.
/// `Deleted` tracks are removed from the active set at the end of the frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Deleted,
}

/// A single tracked object: Kalman state over `(x, y, a, h)` plus
/// velocities, hit/miss bookkeeping and a bounded appearance gallery.
/// The track exclusively owns its estimator state and gallery; only the
/// `Tracker` drives transitions.
pub struct Track {
    pub track_id: u32,
    pub hits: u32,
    pub age: u32,
    pub time_since_update: u32,
    pub confidence: f32,

    state: TrackState,
    mean: StateMean,
    covariance: StateCov,
    gallery: FeatureGallery,
    n_init: u32,
    max_age: u32,
}

impl Track {
    pub fn new(
        kf: &KalmanFilter,
        detection: &Detection,
        track_id: u32,
        n_init: u32,
        max_age: u32,
        gallery_capacity: usize,
    ) -> Self {
        let measurement = detection.bbox.as_xyah().to_vector();
        let (mean, covariance) = kf.initiate(&measurement);

        let mut gallery = FeatureGallery::new(gallery_capacity);
        if let Some(feature) = &detection.feature {
            gallery.push(feature.clone());
        }

        Self {
            track_id,
            hits: 1,
            age: 1,
            time_since_update: 0,
            confidence: detection.confidence,
            state: TrackState::Tentative,
            mean,
            covariance,
            gallery,
            n_init,
            max_age,
        }
    }

    /// Current position estimate as a left-top-width-height box.
    #[inline]
    pub fn bbox(&self) -> BBox<Ltwh> {
        BBox::xyah(self.mean[0], self.mean[1], self.mean[2], self.mean[3]).as_ltwh()
    }

    #[inline]
    pub fn state(&self) -> TrackState {
        self.state
    }

    #[inline]
    pub fn gallery(&self) -> &FeatureGallery {
        &self.gallery
    }

    #[inline]
    pub(crate) fn mean(&self) -> &StateMean {
        &self.mean
    }

    #[inline]
    pub(crate) fn covariance(&self) -> &StateCov {
        &self.covariance
    }

    /// Advances the state one frame forward. Ages the track: a subsequent
    /// `update` resets `time_since_update`, a miss leaves it incremented.
    pub fn predict(&mut self, kf: &KalmanFilter) {
        let (mean, covariance) = kf.predict(&self.mean, &self.covariance);

        self.mean = mean;
        self.covariance = covariance;
        self.age += 1;
        self.time_since_update += 1;
    }

    /// Applies a matched detection: Kalman correction, gallery append,
    /// hit bookkeeping. Returns `true` when the hit promoted the track from
    /// `Tentative` to `Confirmed`.
    pub fn update(&mut self, kf: &KalmanFilter, detection: &Detection) -> bool {
        let measurement = detection.bbox.as_xyah().to_vector();

        match kf.update(&self.mean, &self.covariance, &measurement) {
            Some((mean, covariance)) => {
                self.mean = mean;
                self.covariance = covariance;
            }
            None => {
                // Degenerate innovation covariance: keep the predicted mean
                // and recover with a fresh covariance at initiation scale.
                warn!(
                    track_id = self.track_id,
                    "covariance degenerated, resetting to initiation scale"
                );
                self.covariance = kf.initiation_covariance(self.mean[3]);
            }
        }

        if let Some(feature) = &detection.feature {
            self.gallery.push(feature.clone());
        }

        self.confidence = detection.confidence;
        self.hits += 1;
        self.time_since_update = 0;

        if self.state == TrackState::Tentative && self.hits >= self.n_init {
            self.state = TrackState::Confirmed;
            return true;
        }

        false
    }

    /// No association at the current frame: a tentative track dies on its
    /// first miss, a confirmed track once it outlives `max_age` misses.
    pub fn mark_missed(&mut self) {
        if self.state == TrackState::Tentative {
            self.state = TrackState::Deleted;
        } else if self.time_since_update > self.max_age {
            self.state = TrackState::Deleted;
        }
    }

    #[inline]
    pub fn is_tentative(&self) -> bool {
        self.state == TrackState::Tentative
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.state == TrackState::Deleted
    }
}

/// Externally visible per-frame snapshot of a confirmed track.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrackOutput {
    pub track_id: u32,
    pub bbox: BBox<Ltwh>,
    pub confidence: f32,
    pub time_since_update: u32,
}

impl From<&Track> for TrackOutput {
    fn from(track: &Track) -> Self {
        Self {
            track_id: track.track_id,
            bbox: track.bbox(),
            confidence: track.confidence,
            time_since_update: track.time_since_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn detection() -> Detection {
        Detection::new(BBox::ltwh(10.0, 10.0, 50.0, 100.0), 0.9, None)
    }

    fn track(n_init: u32, max_age: u32) -> (KalmanFilter, Track) {
        let kf = KalmanFilter::new();
        let track = Track::new(&kf, &detection(), 1, n_init, max_age, 8);
        (kf, track)
    }

    #[test]
    fn starts_tentative_at_detection_box() {
        let (_, track) = track(3, 30);

        assert_eq!(track.state(), TrackState::Tentative);
        assert_eq!(track.hits, 1);
        assert_eq!(track.time_since_update, 0);

        let bbox = track.bbox();
        assert_abs_diff_eq!(bbox.left(), 10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(bbox.top(), 10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(bbox.width(), 50.0, epsilon = 1e-4);
        assert_abs_diff_eq!(bbox.height(), 100.0, epsilon = 1e-4);
    }

    #[test]
    fn confirmed_after_n_init_hits() {
        let (kf, mut track) = track(3, 30);

        track.predict(&kf);
        assert!(!track.update(&kf, &detection()));
        assert!(track.is_tentative());

        track.predict(&kf);
        assert!(track.update(&kf, &detection()));
        assert!(track.is_confirmed());
    }

    #[test]
    fn n_init_one_still_starts_tentative() {
        let (kf, mut track) = track(1, 30);
        assert!(track.is_tentative());

        // promotion only happens on a measurement update
        track.predict(&kf);
        assert!(track.update(&kf, &detection()));
        assert!(track.is_confirmed());
    }

    #[test]
    fn tentative_deleted_on_first_miss() {
        let (kf, mut track) = track(3, 30);

        track.predict(&kf);
        track.mark_missed();
        assert!(track.is_deleted());
    }

    #[test]
    fn confirmed_survives_until_max_age() {
        let max_age = 3;
        let (kf, mut track) = track(1, max_age);

        track.predict(&kf);
        track.update(&kf, &detection());
        assert!(track.is_confirmed());

        for _ in 0..max_age {
            track.predict(&kf);
            track.mark_missed();
            assert!(track.is_confirmed());
        }

        track.predict(&kf);
        track.mark_missed();
        assert!(track.is_deleted());
    }

    #[test]
    fn time_since_update_resets_on_match() {
        let (kf, mut track) = track(3, 30);

        track.predict(&kf);
        assert_eq!(track.time_since_update, 1);
        track.predict(&kf);
        assert_eq!(track.time_since_update, 2);

        track.update(&kf, &detection());
        assert_eq!(track.time_since_update, 0);
    }
}
