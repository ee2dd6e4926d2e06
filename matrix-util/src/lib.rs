pub mod common_io; // gzip-aware buffered text input/output
pub mod dmatrix_rsvd; // randomized SVD for nalgebra matrices
pub mod dmatrix_util; // dense matrix operations and sampling
pub mod knn_match; // k-nearest neighbour dictionaries
pub mod mtx_io; // MatrixMarket triplets
pub mod sparse_util; // CSR helpers
pub mod traits;
pub mod utils;
