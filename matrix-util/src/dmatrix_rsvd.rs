use crate::traits::{RandomizedAlgs, SampleOps};
use log::debug;
use nalgebra::{DMatrix, DVector};

type Mat = DMatrix<f32>;
type DVec = DVector<f32>;

const DEFAULT_POWER_ITER: usize = 5;
const DEFAULT_OVERSAMPLE: usize = 5;

impl RandomizedAlgs for Mat {
    type Mat = Mat;
    type DVec = DVec;

    fn rsvd(&self, max_rank: usize, seed: u64) -> anyhow::Result<(Mat, DVec, Mat)> {
        let mut rsvd = RandomizedSVD::new(max_rank, DEFAULT_POWER_ITER).with_seed(seed);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Alg 4.4 of Halko et al. (2009) with QR re-orthonormalization after
/// every half step of the subspace iteration.
///
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    seed: u64,
    u_vectors: Mat,
    singular_values: DVec,
    v_vectors: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize) -> Self {
        Self {
            max_rank,
            iter,
            seed: 42,
            u_vectors: Mat::zeros(0, 0),
            singular_values: DVec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &DVec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();

        if nr == 0 || nc == 0 {
            anyhow::bail!("empty matrix [{} x {}]", nr, nc);
        }

        let full_rank = nr.min(nc);
        let rank = if self.max_rank > 0 {
            self.max_rank.min(full_rank)
        } else {
            full_rank
        };
        let sketch = (rank + DEFAULT_OVERSAMPLE).min(full_rank);

        let qq = self.rand_subspace_iteration(xx, sketch);

        let bb = qq.transpose() * xx;
        debug!("final svd on [{} x {}]", bb.nrows(), bb.ncols());

        let svd = bb.svd(true, true);

        if let (Some(svd_u), Some(svd_vt)) = (svd.u, svd.v_t) {
            let rank = rank.min(svd.singular_values.len());
            self.u_vectors = qq * svd_u.columns(0, rank);
            self.v_vectors = svd_vt.rows(0, rank).transpose();
            self.singular_values = svd.singular_values.rows(0, rank).into_owned();
        } else {
            anyhow::bail!("SVD failed");
        }
        Ok(())
    }

    // Find an orthonormal matrix qq whose range approximates the range of xx
    fn rand_subspace_iteration(&self, xx: &Mat, sketch: usize) -> Mat {
        let omega = Mat::rnorm(xx.ncols(), sketch, self.seed);
        let mut qq = (xx * omega).qr().q();

        for i in 0..self.iter {
            let zz = (xx.transpose() * &qq).qr().q();
            qq = (xx * zz).qr().q();
            debug!("power iteration {:>3}: Q [{} x {}]", i + 1, qq.nrows(), qq.ncols());
        }
        qq
    }
}
