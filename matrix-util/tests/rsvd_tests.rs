use approx::assert_abs_diff_eq;
use matrix_util::traits::{RandomizedAlgs, SampleOps};
use nalgebra::DMatrix;

#[test]
fn dmatrix_rsvd_identity() -> anyhow::Result<()> {
    let xx = DMatrix::<f32>::identity(8, 8);
    let (u, d, v) = xx.rsvd(3, 1)?;

    assert_eq!(u.shape(), (8, 3));
    assert_eq!(v.shape(), (8, 3));
    assert_eq!(d.len(), 3);

    assert_abs_diff_eq!(u.transpose() * &u, DMatrix::identity(3, 3), epsilon = 1e-4);
    assert_abs_diff_eq!(v.transpose() * &v, DMatrix::identity(3, 3), epsilon = 1e-4);
    Ok(())
}

#[test]
fn dmatrix_rsvd_recovers_low_rank() -> anyhow::Result<()> {
    let aa = DMatrix::<f32>::rnorm(40, 3, 1);
    let bb = DMatrix::<f32>::rnorm(3, 25, 2);
    let xx = &aa * &bb;

    let (u, d, v) = xx.rsvd(3, 3)?;
    let xx_hat = &u * DMatrix::from_diagonal(&d) * v.transpose();

    assert_abs_diff_eq!(xx_hat, xx, epsilon = 1e-2);
    assert!(d[0] >= d[1] && d[1] >= d[2]);
    Ok(())
}

#[test]
fn rank_is_capped_by_shape() -> anyhow::Result<()> {
    let xx = DMatrix::<f32>::runif(4, 6, 5);
    let (u, d, v) = xx.rsvd(30, 0)?;
    assert_eq!(u.shape(), (4, 4));
    assert_eq!(d.len(), 4);
    assert_eq!(v.shape(), (6, 4));

    assert!(DMatrix::<f32>::zeros(0, 3).rsvd(2, 0).is_err());
    Ok(())
}
