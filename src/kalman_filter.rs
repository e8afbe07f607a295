use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// State vector: center x, center y, width, height and their velocities.
pub type StateVector = SVector<f32, 8>;
pub type StateCovariance = SMatrix<f32, 8, 8>;
/// Measurement vector: center x, center y, width, height.
pub type Measurement = SVector<f32, 4>;

/// Box extents below this (in pixels) are clamped before scaling noise, so
/// covariances stay invertible for degenerate boxes.
const MIN_EXTENT: f32 = 1.0;

/// Noise weights of the motion model. Standard deviations are the weight
/// times the matching box extent. Raising `std_weight_measurement` trusts
/// detections less and predictions more.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub std_weight_position: f32,
    pub std_weight_velocity: f32,
    pub std_weight_measurement: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
            std_weight_measurement: 1.0 / 20.0,
        }
    }
}

/// Constant-velocity Kalman filter over box center and extents.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: SMatrix<f32, 8, 8>, // 8×8 transition matrix
    update_mat: SMatrix<f32, 4, 8>, // 4×8 observation matrix
    std_weight_position: f32,
    std_weight_velocity: f32,
    std_weight_measurement: f32,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

impl KalmanFilter {
    pub fn new(config: MotionConfig) -> Self {
        let ndim = 4;
        let dt = 1.0;
        let mut motion_mat = SMatrix::<f32, 8, 8>::identity();
        for i in 0..ndim {
            motion_mat[(i, ndim + i)] = dt;
        }
        KalmanFilter {
            motion_mat,
            update_mat: SMatrix::<f32, 4, 8>::identity(),
            std_weight_position: config.std_weight_position,
            std_weight_velocity: config.std_weight_velocity,
            std_weight_measurement: config.std_weight_measurement,
        }
    }

    /// Per-axis extent used to scale noise: width for x terms, height for y terms.
    fn extents(state: &[f32]) -> [f32; 4] {
        let w = state[2].abs().max(MIN_EXTENT);
        let h = state[3].abs().max(MIN_EXTENT);
        [w, h, w, h]
    }

    fn diagonal<const D: usize>(std: [f32; D]) -> SMatrix<f32, D, D> {
        let v = SVector::<f32, D>::from_iterator(std.iter().map(|s| s * s));
        SMatrix::<f32, D, D>::from_diagonal(&v)
    }

    /// Create a track state from its first measurement. Velocities start at zero.
    pub fn initiate(&self, measurement: &Measurement) -> (StateVector, StateCovariance) {
        let mut mean = StateVector::zeros();
        mean.fixed_rows_mut::<4>(0).copy_from(measurement);

        let [ew, eh, _, _] = Self::extents(measurement.as_slice());
        let p = 2.0 * self.std_weight_position;
        let v = 10.0 * self.std_weight_velocity;
        let covariance = Self::diagonal([
            p * ew,
            p * eh,
            p * ew,
            p * eh,
            v * ew,
            v * eh,
            v * ew,
            v * eh,
        ]);
        (mean, covariance)
    }

    /// Predict step: x' = F x, P' = F P F^T + Q
    pub fn predict(
        &self,
        mean: &StateVector,
        covariance: &StateCovariance,
    ) -> (StateVector, StateCovariance) {
        let mut mean = *mean;
        // Never let an extent collapse through zero.
        for i in 2..4 {
            if mean[i] + mean[i + 4] <= 0.0 {
                mean[i + 4] = 0.0;
            }
        }

        let [ew, eh, _, _] = Self::extents(mean.as_slice());
        let p = self.std_weight_position;
        let v = self.std_weight_velocity;
        let q = Self::diagonal([
            p * ew,
            p * eh,
            p * ew,
            p * eh,
            v * ew,
            v * eh,
            v * ew,
            v * eh,
        ]);

        let new_mean = self.motion_mat * mean;
        let new_cov = self.motion_mat * covariance * self.motion_mat.transpose() + q;
        (new_mean, new_cov)
    }

    /// Measurement noise R for the given state.
    fn measurement_noise(&self, mean: &StateVector) -> SMatrix<f32, 4, 4> {
        let [ew, eh, _, _] = Self::extents(mean.as_slice());
        let m = self.std_weight_measurement;
        Self::diagonal([m * ew, m * eh, m * ew, m * eh])
    }

    /// Project state to measurement space: z = Hx, S = H P H^T + R
    pub fn project(
        &self,
        mean: &StateVector,
        covariance: &StateCovariance,
    ) -> (Measurement, SMatrix<f32, 4, 4>) {
        let z = self.update_mat * mean;
        let s = self.update_mat * covariance * self.update_mat.transpose()
            + self.measurement_noise(mean);
        (z, s)
    }

    /// Correction step with the matched measurement.
    pub fn update(
        &self,
        mean: &StateVector,
        covariance: &StateCovariance,
        measurement: &Measurement,
    ) -> (StateVector, StateCovariance) {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        let s_inv = match projected_cov.cholesky() {
            Some(chol) => chol.inverse(),
            None => match projected_cov.try_inverse() {
                Some(inv) => inv,
                None => {
                    warn!("innovation covariance is singular, skipping correction");
                    return (*mean, *covariance);
                }
            },
        };

        // K = P H^T S^-1
        let gain = covariance * self.update_mat.transpose() * s_inv;
        let innovation = measurement - projected_mean;
        let new_mean = mean + gain * innovation;

        // Joseph form keeps the covariance symmetric positive definite.
        let i_kh = StateCovariance::identity() - gain * self.update_mat;
        let r = self.measurement_noise(mean);
        let new_cov = i_kh * covariance * i_kh.transpose() + gain * r * gain.transpose();

        (new_mean, new_cov)
    }
}
