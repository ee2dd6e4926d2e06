use matrix_util::dmatrix_rsvd::RandomizedSVD;
use matrix_util::dmatrix_util::*;
use matrix_util::traits::SampleOps;
use serde::{Deserialize, Serialize};

type Mat = DMatrix<f32>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectionMethod {
    /// singular vectors of the cross-product of the two batches
    Cca,
    /// a shared Gaussian random basis
    Random,
}

/// Embeds two batches (cells x shared features, each scaled) into one
/// low-dimensional space where cells of the two batches can be
/// compared directly.
pub trait SharedProjection: Sync {
    /// Returns the embeddings of `xa` and `xb` with the same number of
    /// columns
    fn project(&self, xa: &Mat, xb: &Mat) -> anyhow::Result<(Mat, Mat)>;

    /// Shape of the largest dense matrix `project` allocates
    fn workspace_dims(&self, na: usize, nb: usize, nfeatures: usize) -> (usize, usize);
}

/// Canonical correlation stand-in: `X_a X_bᵀ ≈ U D Vᵀ` gives `U` for
/// the cells of A and `V` for the cells of B
pub struct CanonicalCorrelation {
    pub num_components: usize,
    pub seed: u64,
}

impl SharedProjection for CanonicalCorrelation {
    fn project(&self, xa: &Mat, xb: &Mat) -> anyhow::Result<(Mat, Mat)> {
        if xa.ncols() != xb.ncols() {
            anyhow::bail!("feature mismatch: {} vs {}", xa.ncols(), xb.ncols());
        }
        let cross = xa * xb.transpose();
        let mut svd = RandomizedSVD::new(self.num_components.max(1), 5).with_seed(self.seed);
        svd.compute(&cross)?;
        Ok((svd.matrix_u().clone(), svd.matrix_v().clone()))
    }

    fn workspace_dims(&self, na: usize, nb: usize, _nfeatures: usize) -> (usize, usize) {
        (na, nb)
    }
}

/// Both batches multiplied by the same `features x components` Gaussian
/// matrix
pub struct RandomProjection {
    pub num_components: usize,
    pub seed: u64,
}

impl SharedProjection for RandomProjection {
    fn project(&self, xa: &Mat, xb: &Mat) -> anyhow::Result<(Mat, Mat)> {
        if xa.ncols() != xb.ncols() {
            anyhow::bail!("feature mismatch: {} vs {}", xa.ncols(), xb.ncols());
        }
        let kk = self.num_components.max(1);
        let basis = Mat::rnorm(xa.ncols(), kk, self.seed) / (kk as f32).sqrt();
        Ok((xa * &basis, xb * &basis))
    }

    fn workspace_dims(&self, na: usize, nb: usize, nfeatures: usize) -> (usize, usize) {
        (na.max(nb).max(nfeatures), self.num_components.max(1))
    }
}

pub fn shared_projection(
    method: ProjectionMethod,
    num_components: usize,
    seed: u64,
) -> Box<dyn SharedProjection> {
    match method {
        ProjectionMethod::Cca => Box::new(CanonicalCorrelation {
            num_components,
            seed,
        }),
        ProjectionMethod::Random => Box::new(RandomProjection {
            num_components,
            seed,
        }),
    }
}
