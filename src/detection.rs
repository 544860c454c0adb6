use ndarray::Array1;

use crate::bbox::{BBox, Ltwh};

/// One frame's observation of an object: bounding box, detector confidence
/// and an optional appearance descriptor produced by an external embedder.
/// Detections without a descriptor are still trackable; they are matched
/// through the motion gate alone.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox<Ltwh>,
    pub confidence: f32,
    pub feature: Option<Array1<f32>>,
}

impl Detection {
    pub fn new(bbox: BBox<Ltwh>, confidence: f32, feature: Option<Array1<f32>>) -> Self {
        Self {
            bbox,
            confidence,
            feature,
        }
    }

    /// A box with non-positive extent or non-finite coordinates cannot enter
    /// cost computation.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.bbox.width() > 0.0
            && self.bbox.height() > 0.0
            && self.bbox.as_slice().iter().all(|v| v.is_finite())
    }
}
