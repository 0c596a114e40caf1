use crate::error::TrackError;
use nalgebra::SMatrix;

/* -----------------------------------------------------------------------------
 * Type aliases
 * ----------------------------------------------------------------------------- */
// 1x4 measurement (cx, cy, a, h)
pub(crate) type DetectBox = SMatrix<f32, 1, 4>;
// 1x8 state (cx, cy, a, h, vx, vy, va, vh)
pub(crate) type StateMean = SMatrix<f32, 1, 8>;
// 8x8
pub(crate) type StateCov = SMatrix<f32, 8, 8>;
// 1x4
pub(crate) type StateHMean = SMatrix<f32, 1, 4>;
// 4x4
pub(crate) type StateHCov = SMatrix<f32, 4, 4>;

/* -----------------------------------------------------------------------------
 * Kalman Filter
 * ----------------------------------------------------------------------------- */

/// Discrete constant-velocity filter on (cx, cy, a, h) and derivatives.
///
/// Process and measurement noise scale with the box height, weighted by
/// `std_weight_position` and `std_weight_velocity` (1/20 and 1/160 in the
/// SORT formulation).
#[derive(Debug, Clone)]
pub(crate) struct KalmanFilter {
    std_weight_position: f32,
    std_weight_velocity: f32,
    motion_mat: SMatrix<f32, 8, 8>,
    update_mat: SMatrix<f32, 4, 8>,
}

impl KalmanFilter {
    pub(crate) fn new(
        std_weight_position: f32,
        std_weight_velocity: f32,
    ) -> Self {
        let ndim = 4;
        let dt = 1.0;

        // Identity plus dt velocity coupling on the position block.
        let mut motion_mat = SMatrix::<f32, 8, 8>::identity();
        for i in 0..ndim {
            motion_mat[(i, i + ndim)] = dt;
        }

        // Observation picks the first four state components.
        let mut update_mat = SMatrix::<f32, 4, 8>::zeros();
        for i in 0..ndim {
            update_mat[(i, i)] = 1.0;
        }

        Self {
            std_weight_position,
            std_weight_velocity,
            motion_mat,
            update_mat,
        }
    }

    /// Initialise state from a first measurement: zero velocities, diagonal
    /// covariance from the height-scaled noise.
    pub(crate) fn initiate(
        &self,
        measurement: &DetectBox,
    ) -> (StateMean, StateCov) {
        let mut mean = StateMean::zeros();
        mean
            .as_mut_slice()[0..4]
            .copy_from_slice(measurement.as_slice());

        let h = measurement[(0, 3)];
        let std = SMatrix::<f32, 1, 8>::from_iterator([
            2.0 * self.std_weight_position * h,
            2.0 * self.std_weight_position * h,
            1e-2,
            2.0 * self.std_weight_position * h,
            10.0 * self.std_weight_velocity * h,
            10.0 * self.std_weight_velocity * h,
            1e-5,
            10.0 * self.std_weight_velocity * h,
        ]);
        let var = std.component_mul(&std);
        let covariance = StateCov::from_diagonal(&var.transpose());
        (mean, covariance)
    }

    /// Advance mean and covariance by one step of the motion model.
    pub(crate) fn predict(
        &self,
        mean: &mut StateMean,
        covariance: &mut StateCov,
    ) {
        let h = mean[(0, 3)];
        let std = SMatrix::<f32, 1, 8>::from_iterator([
            self.std_weight_position * h,
            self.std_weight_position * h,
            1e-2,
            self.std_weight_position * h,
            self.std_weight_velocity * h,
            self.std_weight_velocity * h,
            1e-5,
            self.std_weight_velocity * h,
        ]);
        let var = std.component_mul(&std);
        let motion_cov = StateCov::from_diagonal(&var.transpose());

        *mean = (self.motion_mat * mean.transpose()).transpose();
        *covariance = self.motion_mat * *covariance
            * self.motion_mat.transpose()
            + motion_cov;
        // F P F^T is only symmetric up to round-off.
        *covariance = (*covariance + covariance.transpose()) * 0.5;
    }

    /// Kalman correction against a measurement.
    pub(crate) fn update(
        &self,
        mean: &mut StateMean,
        covariance: &mut StateCov,
        measurement: &DetectBox,
    ) -> Result<(), TrackError> {
        let (projected_mean, projected_cov) =
            self.project(mean, covariance);

        // kalman_gain solved via Cholesky: S K = (P H^T)^T
        let b = (*covariance * self.update_mat.transpose()).transpose();
        let cholesky = projected_cov.cholesky().ok_or_else(|| {
            TrackError::Filter(
                "projected covariance is not positive definite".into(),
            )
        })?;
        let kalman_gain = cholesky.solve(&b);

        let innovation = measurement - projected_mean;
        *mean += innovation * kalman_gain;
        *covariance -=
            kalman_gain.transpose() * projected_cov * kalman_gain;
        *covariance = (*covariance + covariance.transpose()) * 0.5;
        Ok(())
    }

    /// Project state into measurement space and add the innovation noise.
    pub(crate) fn project(
        &self,
        mean: &StateMean,
        covariance: &StateCov,
    ) -> (StateHMean, StateHCov) {
        let h = mean[(0, 3)];
        let std = SMatrix::<f32, 1, 4>::from_iterator([
            self.std_weight_position * h,
            self.std_weight_position * h,
            1e-1,
            self.std_weight_position * h,
        ]);
        let var = std.component_mul(&std);
        let innovation_cov = StateHCov::from_diagonal(&var.transpose());

        let projected_mean = mean * self.update_mat.transpose();
        let projected_cov = self.update_mat * covariance
            * self.update_mat.transpose()
            + innovation_cov;
        (projected_mean, projected_cov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearly_eq::assert_nearly_eq;

    fn assert_matrix_nearly_eq<const R: usize, const C: usize>(
        actual: &SMatrix<f32, R, C>,
        expected: &SMatrix<f32, R, C>,
        eps: f32,
    ) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_nearly_eq!(a, e, eps);
        }
    }

    #[test]
    fn test_initiate() {
        let kf = KalmanFilter::new(1.0 / 20.0, 1.0 / 160.0);
        let measurement =
            DetectBox::from_iterator([1.0, 2.0, 3.0, 4.0]);

        let (mean, covariance) = kf.initiate(&measurement);

        let expected_mean = StateMean::from_iterator([
            1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0,
        ]);
        assert_eq!(mean, expected_mean);

        #[rustfmt::skip]
        let expected_cov = StateCov::from_iterator([
            0.16, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.16, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 1.0e-4, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.16, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 6.25e-2, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 6.25e-2, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1e-10, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 6.25e-2,
        ]);
        assert_matrix_nearly_eq(&covariance, &expected_cov, 1e-4);
    }

    #[test]
    fn test_predict() {
        let kf = KalmanFilter::new(1.0 / 20.0, 1.0 / 160.0);
        let mut mean = StateMean::from_iterator([
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0,
        ]);
        #[rustfmt::skip]
        let mut covariance = StateCov::from_iterator([
            0.2, 0.0, 0.0,  0.0, 0.0, 0.0, 0.0,      0.0,
            0.0, 0.2, 0.0,  0.0, 0.0, 0.0, 0.0,      0.0,
            0.0, 0.0, 0.01, 0.0, 0.0, 0.0, 0.0,      0.0,
            0.0, 0.0, 0.0,  0.2, 0.0, 0.0, 0.0,      0.0,
            0.0, 0.0, 0.0,  0.0, 4.0, 0.0, 0.0,      0.0,
            0.0, 0.0, 0.0,  0.0, 0.0, 4.0, 0.0,      0.0,
            0.0, 0.0, 0.0,  0.0, 0.0, 0.0, 0.000001, 0.0,
            0.0, 0.0, 0.0,  0.0, 0.0, 0.0, 0.0,      4.0,
        ]);

        kf.predict(&mut mean, &mut covariance);

        assert_eq!(
            mean,
            StateMean::from_iterator([
                6.0, 8.0, 10.0, 12.0, 5.0, 6.0, 7.0, 8.0
            ])
        );
        #[rustfmt::skip]
        let expected = StateCov::from_iterator([
            4.24, 0.0,  0.0,     0.0,  4.0,      0.0,      0.0,    0.0,
            0.0,  4.24, 0.0,     0.0,  0.0,      4.0,      0.0,    0.0,
            0.0,  0.0,  1.01e-2, 0.0,  0.0,      0.0,      1.0e-6, 0.0,
            0.0,  0.0,  0.0,     4.24, 0.0,      0.0,      0.0,    4.0,
            4.0,  0.0,  0.0,     0.0,  4.000625, 0.0,      0.0,    0.0,
            0.0,  4.0,  0.0,     0.0,  0.0,      4.000625, 0.0,    0.0,
            0.0,  0.0,  1.0e-6,  0.0,  0.0,      0.0,      1.0e-6, 0.0,
            0.0,  0.0,  0.0,     4.0,  0.0,      0.0,      0.0,    4.000625,
        ]);
        assert_matrix_nearly_eq(&covariance, &expected, 1e-4);
    }

    #[test]
    fn test_project() {
        let kf = KalmanFilter::new(1.0 / 20.0, 1.0 / 160.0);
        let mean = StateMean::from_iterator([
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0,
        ]);
        #[rustfmt::skip]
        let covariance = StateCov::from_iterator([
            4.24, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0,
            0.0, 4.24, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0,
            0.0, 0.0, 1.01e-2, 0.0, 0.0, 0.0, 1.0e-6, 0.0,
            0.0, 0.0, 0.0, 4.24, 0.0, 0.0, 0.0, 4.0,
            4.0, 0.0, 0.0, 0.0, 4.000625, 0.0, 0.0, 0.0,
            0.0, 4.0, 0.0, 0.0, 0.0, 4.000625, 0.0, 0.0,
            0.0, 0.0, 1.0e-6, 0.0, 0.0, 0.0, 1.0e-6, 0.0,
            0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 4.000625,
        ]);

        let (projected_mean, projected_cov) =
            kf.project(&mean, &covariance);

        assert_eq!(
            projected_mean,
            StateHMean::from_iterator([1.0, 2.0, 3.0, 4.0])
        );
        #[rustfmt::skip]
        let expected = StateHCov::from_iterator([
            4.28, 0.0,  0.0,    0.0,
            0.0,  4.28, 0.0,    0.0,
            0.0,  0.0,  0.0201, 0.0,
            0.0,  0.0,  0.0,    4.28,
        ]);
        assert_matrix_nearly_eq(&projected_cov, &expected, 1e-4);
    }

    #[test]
    fn test_update_on_consistent_measurement() {
        let kf = KalmanFilter::new(1.0 / 20.0, 1.0 / 160.0);
        let measurement =
            DetectBox::from_iterator([1.0, 2.0, 3.0, 4.0]);
        let mut mean = StateMean::from_iterator([
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0,
        ]);
        #[rustfmt::skip]
        let mut covariance = StateCov::from_iterator([
            4.24, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0,
            0.0, 4.24, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0,
            0.0, 0.0, 1.01e-2, 0.0, 0.0, 0.0, 1.0e-6, 0.0,
            0.0, 0.0, 0.0, 4.24, 0.0, 0.0, 0.0, 4.0,
            4.0, 0.0, 0.0, 0.0, 4.000625, 0.0, 0.0, 0.0,
            0.0, 4.0, 0.0, 0.0, 0.0, 4.000625, 0.0, 0.0,
            0.0, 0.0, 1.0e-6, 0.0, 0.0, 0.0, 1.0e-6, 0.0,
            0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 4.000625,
        ]);

        kf.update(&mut mean, &mut covariance, &measurement).unwrap();

        // Measurement equals the predicted position, so the mean is fixed.
        assert_eq!(
            mean,
            StateMean::from_iterator([
                1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0
            ])
        );
        #[rustfmt::skip]
        let expected = StateCov::from_iterator([
            3.96261682e-02, 0.0, 0.0, 0.0, 3.73831776e-02, 0.0, 0.0, 0.0,
            0.0, 3.96261682e-02, 0.0, 0.0, 0.0, 3.73831776e-02, 0.0, 0.0,
            0.0, 0.0, 5.02487562e-03, 0.0, 0.0, 0.0, 4.97512438e-07, 0.0,
            0.0, 0.0, 0.0, 3.96261682e-02, 0.0, 0.0, 0.0, 3.73831776e-02,
            3.73831776e-02, 0.0, 0.0, 0.0, 2.62307243e-01, 0.0, 0.0, 0.0,
            0.0, 3.73831776e-02, 0.0, 0.0, 0.0, 2.62307243e-01, 0.0, 0.0,
            0.0, 0.0, 4.97512438e-07, 0.0, 0.0, 0.0, 9.99950249e-07, 0.0,
            0.0, 0.0, 0.0, 3.73831776e-02, 0.0, 0.0, 0.0, 2.62307243e-01,
        ]);
        assert_matrix_nearly_eq(&covariance, &expected, 1e-4);
    }

    #[test]
    fn test_covariance_stays_symmetric() {
        let kf = KalmanFilter::new(1.0 / 20.0, 1.0 / 160.0);
        let measurement =
            DetectBox::from_iterator([320.0, 240.0, 0.5, 120.0]);
        let (mut mean, mut covariance) = kf.initiate(&measurement);

        for step in 0..20 {
            kf.predict(&mut mean, &mut covariance);
            let moved = DetectBox::from_iterator([
                320.0 + step as f32 * 3.0,
                240.0,
                0.5,
                120.0,
            ]);
            kf.update(&mut mean, &mut covariance, &moved).unwrap();
        }

        for i in 0..8 {
            for j in 0..8 {
                assert_nearly_eq!(
                    covariance[(i, j)],
                    covariance[(j, i)],
                    1e-6
                );
            }
        }
    }
}
