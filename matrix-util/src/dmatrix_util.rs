use crate::traits::{MatOps, SampleOps};
pub use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

impl SampleOps for DMatrix<f32> {
    type Mat = DMatrix<f32>;

    fn runif(dd: usize, nn: usize, seed: u64) -> Self::Mat {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        DMatrix::from_fn(dd, nn, |_, _| rng.random::<f32>())
    }

    fn rnorm(dd: usize, nn: usize, seed: u64) -> Self::Mat {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        DMatrix::from_fn(dd, nn, |_, _| rng.sample::<f32, _>(StandardNormal))
    }
}

impl MatOps for DMatrix<f32> {
    type Mat = DMatrix<f32>;
    type Scalar = f32;

    fn column_means(&self) -> Vec<f32> {
        let nn = self.nrows().max(1) as f32;
        self.column_iter().map(|x_j| x_j.sum() / nn).collect()
    }

    fn centre_columns_inplace(&mut self) {
        let means = self.column_means();
        for (mut x_j, mu) in self.column_iter_mut().zip(means) {
            x_j.add_scalar_mut(-mu);
        }
    }

    fn scale_columns_inplace(&mut self, clip: Option<f32>) {
        let nn = self.nrows();
        for mut x_j in self.column_iter_mut() {
            let mu = x_j.sum() / nn.max(1) as f32;
            x_j.add_scalar_mut(-mu);
            let sd = if nn > 1 {
                (x_j.norm_squared() / (nn - 1) as f32).sqrt()
            } else {
                0.0
            };
            if sd > 0.0 {
                x_j /= sd;
                if let Some(c) = clip {
                    x_j.apply(|x| *x = x.clamp(-c, c));
                }
            } else {
                x_j.fill(0.0);
            }
        }
    }

    fn scale_columns(&self, clip: Option<f32>) -> Self::Mat {
        let mut ret = self.clone();
        ret.scale_columns_inplace(clip);
        ret
    }

    fn normalize_rows_inplace(&mut self) {
        for mut x_i in self.row_iter_mut() {
            let denom = x_i.norm();
            if denom > 0.0 {
                x_i /= denom;
            }
        }
    }
}

/// Estimated heap size of a dense `f32` matrix
pub fn dense_bytes(nrows: usize, ncols: usize) -> u64 {
    (nrows as u64)
        .saturating_mul(ncols as u64)
        .saturating_mul(std::mem::size_of::<f32>() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn scaled_columns_have_unit_variance() {
        let xx = DMatrix::<f32>::runif(50, 4, 7);
        let yy = xx.scale_columns(None);
        for y_j in yy.column_iter() {
            assert_abs_diff_eq!(y_j.sum(), 0.0, epsilon = 1e-4);
            assert_abs_diff_eq!(y_j.norm_squared() / 49.0, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn constant_columns_become_zero() {
        let mut xx = DMatrix::<f32>::from_element(5, 2, 3.0);
        xx.scale_columns_inplace(Some(10.0));
        assert_eq!(xx, DMatrix::<f32>::zeros(5, 2));
    }

    #[test]
    fn normalized_rows() {
        let mut xx = DMatrix::<f32>::rnorm(10, 3, 11);
        xx.row_mut(0).fill(0.0);
        xx.normalize_rows_inplace();
        assert_eq!(xx.row(0).norm(), 0.0);
        for i in 1..10 {
            assert_abs_diff_eq!(xx.row(i).norm(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        assert_eq!(DMatrix::<f32>::rnorm(3, 3, 1), DMatrix::<f32>::rnorm(3, 3, 1));
    }
}
