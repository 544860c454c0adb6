use ndarray::Array1;
use tracing::warn;

use crate::circular_queue::CircularQueue;
use crate::detection::Detection;

/// Bounded history of appearance descriptors for one track. Descriptors are
/// L2-normalized on insert so the cosine distance reduces to a dot product;
/// the oldest entry is evicted once the capacity is reached.
pub struct FeatureGallery {
    features: CircularQueue<Array1<f32>>,
}

impl FeatureGallery {
    pub fn new(capacity: usize) -> Self {
        Self {
            features: CircularQueue::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, feature: Array1<f32>) {
        let norm = feature.dot(&feature).sqrt();

        if !norm.is_finite() || norm <= f32::EPSILON {
            warn!(norm, "dropping degenerate appearance descriptor");
            return;
        }

        self.features.push(feature / norm);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.features.capacity()
    }

    /// Minimum cosine distance between `feature` and any stored descriptor.
    /// `None` when the gallery is empty or the dimensions disagree.
    pub fn min_cosine_distance(&self, feature: &Array1<f32>) -> Option<f32> {
        let norm = feature.dot(feature).sqrt();

        if !norm.is_finite() || norm <= f32::EPSILON {
            return None;
        }

        self.features
            .iter()
            .filter(|stored| stored.len() == feature.len())
            .map(|stored| 1.0 - stored.dot(feature) / norm)
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// Appearance cost of associating `detection` with a track owning `gallery`.
///
/// A detection without a descriptor (or a track with an empty gallery) gets
/// a neutral cost of half the rejection threshold: it stays matchable
/// through the motion gate but never outranks a genuine appearance match.
pub fn appearance_cost(
    gallery: &FeatureGallery,
    detection: &Detection,
    max_distance: f32,
) -> f32 {
    let neutral = max_distance * 0.5;

    match &detection.feature {
        Some(feature) => gallery.min_cosine_distance(feature).unwrap_or(neutral),
        None => neutral,
    }
}
