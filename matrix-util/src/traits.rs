/// Normalize, centre or scale a matrix whose rows are samples (cells)
/// and columns are variables (features)
pub trait MatOps {
    type Mat;
    type Scalar;

    /// Column-wise means
    fn column_means(&self) -> Vec<Self::Scalar>;

    /// `X[,j] = X[,j] - mean(X[,j])`
    fn centre_columns_inplace(&mut self);

    /// Standardize each column to zero mean and unit variance. Values
    /// are clipped at `±clip` afterwards if given. Constant columns
    /// become zero.
    fn scale_columns_inplace(&mut self, clip: Option<Self::Scalar>);

    fn scale_columns(&self, clip: Option<Self::Scalar>) -> Self::Mat;

    /// `X[i,] = X[i,] / norm(X[i,])`, leaving zero rows untouched
    fn normalize_rows_inplace(&mut self);
}

/// Operations to sample random matrices from a fixed seed
pub trait SampleOps {
    type Mat;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif(dd: usize, nn: usize, seed: u64) -> Self::Mat;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm(dd: usize, nn: usize, seed: u64) -> Self::Mat;
}

/// some linear algebra routines
pub trait RandomizedAlgs {
    type Mat;
    type DVec;

    /// Randomized truncated SVD `X ≈ U diag(d) Vᵀ`
    fn rsvd(&self, max_rank: usize, seed: u64) -> anyhow::Result<(Self::Mat, Self::DVec, Self::Mat)>;
}
