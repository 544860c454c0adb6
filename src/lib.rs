pub mod bbox;
pub mod detection;
pub mod error;
pub mod iou_matching;
pub mod kalman;
pub mod linear_assignment;
pub mod nn_matching;
pub mod tracker;

mod circular_queue;
mod track;

pub use detection::Detection;
pub use error::Error;
pub use track::{Track, TrackOutput, TrackState};
pub use tracker::{TrackEvent, Tracker, TrackerConfig};
