use nalgebra as na;

pub type StateMean = na::SVector<f32, 8>;
pub type StateCov = na::SMatrix<f32, 8, 8>;
pub type Measurement = na::Vector4<f32>;
pub type MeasurementCov = na::Matrix4<f32>;

/// 0.95 quantile of the chi-square distribution for 1..=9 degrees of freedom.
/// Mahalanobis distances above the 4-dof entry are infeasible associations.
pub const CHI2INV95: [f32; 9] = [
    3.8415, 5.9915, 7.8147, 9.4877, 11.070, 12.592, 14.067, 15.507, 16.919,
];

#[inline]
pub fn gating_threshold() -> f32 {
    CHI2INV95[3]
}

/// Constant-velocity Kalman filter over the state
/// `(x, y, a, h, vx, vy, va, vh)` where `(x, y)` is the box center,
/// `a` the aspect ratio and `h` the height. Observations are `(x, y, a, h)`.
///
/// Process and measurement noise scale with the current height: larger
/// objects move more pixels per frame for the same physical motion.
pub struct KalmanFilter {
    motion_mat: na::SMatrix<f32, 8, 8>,
    update_mat: na::SMatrix<f32, 4, 8>,
    std_weight_position: f32,
    std_weight_velocity: f32,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut motion_mat = na::SMatrix::<f32, 8, 8>::identity();
        for i in 0..4 {
            motion_mat[(i, i + 4)] = 1.0;
        }

        let mut update_mat = na::SMatrix::<f32, 4, 8>::zeros();
        for i in 0..4 {
            update_mat[(i, i)] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Creates a track state from an unassociated measurement: velocities
    /// start at zero with high covariance.
    pub fn initiate(&self, measurement: &Measurement) -> (StateMean, StateCov) {
        let mut mean = StateMean::zeros();
        mean.fixed_rows_mut::<4>(0).copy_from(measurement);

        (mean, self.initiation_covariance(measurement[3]))
    }

    /// Covariance of a freshly initiated state; also used to recover a track
    /// whose covariance has degenerated.
    pub fn initiation_covariance(&self, height: f32) -> StateCov {
        let wp = self.std_weight_position;
        let wv = self.std_weight_velocity;

        let std = na::SVector::<f32, 8>::from_column_slice(&[
            2.0 * wp * height,
            2.0 * wp * height,
            1e-2,
            2.0 * wp * height,
            10.0 * wv * height,
            10.0 * wv * height,
            1e-5,
            10.0 * wv * height,
        ]);

        StateCov::from_diagonal(&std.component_mul(&std))
    }

    /// Prediction step: advances the state one frame under constant velocity
    /// and inflates the covariance by height-scaled process noise.
    pub fn predict(&self, mean: &StateMean, covariance: &StateCov) -> (StateMean, StateCov) {
        let wp = self.std_weight_position;
        let wv = self.std_weight_velocity;
        let height = mean[3];

        let std = na::SVector::<f32, 8>::from_column_slice(&[
            wp * height,
            wp * height,
            1e-2,
            wp * height,
            wv * height,
            wv * height,
            1e-5,
            wv * height,
        ]);
        let process_noise = StateCov::from_diagonal(&std.component_mul(&std));

        let mean = self.motion_mat * mean;
        let covariance =
            self.motion_mat * covariance * self.motion_mat.transpose() + process_noise;

        (mean, symmetrize(covariance))
    }

    /// Projects the state distribution into measurement space.
    pub fn project(
        &self,
        mean: &StateMean,
        covariance: &StateCov,
    ) -> (Measurement, MeasurementCov) {
        let wp = self.std_weight_position;
        let height = mean[3];

        let std = na::Vector4::new(wp * height, wp * height, 1e-1, wp * height);
        let measurement_noise = MeasurementCov::from_diagonal(&std.component_mul(&std));

        let mean = self.update_mat * mean;
        let covariance =
            self.update_mat * covariance * self.update_mat.transpose() + measurement_noise;

        (mean, covariance)
    }

    /// Correction step: fuses the prediction with an observed box through the
    /// Kalman gain. Returns `None` when the innovation covariance cannot be
    /// factorized; the caller keeps the predicted state in that case.
    pub fn update(
        &self,
        mean: &StateMean,
        covariance: &StateCov,
        measurement: &Measurement,
    ) -> Option<(StateMean, StateCov)> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        let chol = projected_cov.cholesky()?;
        let kalman_gain = chol.solve(&(self.update_mat * covariance)).transpose();

        let innovation = measurement - projected_mean;

        let new_mean = mean + kalman_gain * innovation;
        let new_cov = covariance - kalman_gain * projected_cov * kalman_gain.transpose();

        Some((new_mean, symmetrize(new_cov)))
    }

    /// Squared Mahalanobis distance between the state distribution and a
    /// measurement. `None` means the projected covariance is degenerate and
    /// the pair must be treated as infeasible.
    pub fn gating_distance(
        &self,
        mean: &StateMean,
        covariance: &StateCov,
        measurement: &Measurement,
    ) -> Option<f32> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        let chol = projected_cov.cholesky()?;
        let d = measurement - projected_mean;

        Some(d.dot(&chol.solve(&d)))
    }
}

#[inline]
fn symmetrize(cov: StateCov) -> StateCov {
    (cov + cov.transpose()) * 0.5
}
