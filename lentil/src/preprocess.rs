use crate::cancel::CancelToken;
use crate::config::PreprocessConfig;
use crate::dataset::Dataset;

use indicatif::ParallelProgressIterator;
use log::{debug, info};
use matrix_util::sparse_util::*;
use nalgebra_sparse::CscMatrix;
use rayon::prelude::*;

/// Normalized counts of one batch with its ranked variable features
#[derive(Clone, Debug)]
pub struct NormalizedBatch {
    pub label: Box<str>,
    /// rows of this batch's cells in the dataset
    pub rows: Vec<usize>,
    /// cells x all features
    pub data: CsrMat,
    /// most variable features, most variable first
    pub variable_features: Vec<Box<str>>,
    pub scores: Vec<f32>,
}

impl NormalizedBatch {
    pub fn num_cells(&self) -> usize {
        self.rows.len()
    }
}

/// `ln(1 + x / total * scale)` for each row; empty rows stay empty
pub fn normalize_counts(counts: &CsrMat, scale_factor: f32) -> anyhow::Result<CsrMat> {
    let rows = (0..counts.nrows())
        .into_par_iter()
        .map(|i| {
            let row = counts.row(i);
            let total = row.values().iter().sum::<f32>();
            if total <= 0.0 {
                return vec![];
            }
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &x)| (j, (x / total * scale_factor).ln_1p()))
                .collect()
        })
        .collect::<Vec<Vec<(usize, f32)>>>();
    csr_from_rows(counts.ncols(), rows)
}

/// Smooth `y` (ordered by `x`) with a centred moving average over
/// `window` neighbours
fn local_trend(x: &[f32], y: &[f32], window: usize) -> Vec<f32> {
    let n = x.len();
    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]).then(a.cmp(&b)));

    let half = window / 2;
    let mut cumsum = vec![0_f64; n + 1];
    for (r, &i) in order.iter().enumerate() {
        cumsum[r + 1] = cumsum[r] + y[i] as f64;
    }

    let mut trend = vec![0_f32; n];
    for (r, &i) in order.iter().enumerate() {
        let lb = r.saturating_sub(half);
        let ub = (r + half + 1).min(n);
        trend[i] = ((cumsum[ub] - cumsum[lb]) / (ub - lb) as f64) as f32;
    }
    trend
}

/// Variance-stabilized dispersion of each feature (column) of a
/// cells x features count matrix.
///
/// The expected variance at a given mean comes from a local trend of
/// log10(variance) on log10(mean). Counts are standardized by the
/// expected standard deviation and clipped at √n before the variance
/// is taken. Features with zero mean or zero variance score 0.
pub fn variable_feature_scores(counts: &CsrMat) -> Vec<f32> {
    let nn = counts.nrows();
    let mm = counts.ncols();
    if nn < 2 || mm == 0 {
        return vec![0.0; mm];
    }

    let csc = CscMatrix::from(counts);
    let nf = nn as f64;

    let moments = (0..mm)
        .into_par_iter()
        .map(|j| {
            let col = csc.col(j);
            let s1 = col.values().iter().map(|&x| x as f64).sum::<f64>();
            let s2 = col.values().iter().map(|&x| (x as f64).powi(2)).sum::<f64>();
            let mu = s1 / nf;
            let var = ((s2 - nf * mu * mu) / (nf - 1.0)).max(0.0);
            (mu, var)
        })
        .collect::<Vec<_>>();

    let valid = moments
        .iter()
        .enumerate()
        .filter(|(_, m)| m.0 > 0.0 && m.1 > 0.0)
        .map(|(j, _)| j)
        .collect::<Vec<_>>();

    let mut scores = vec![0_f32; mm];
    if valid.is_empty() {
        return scores;
    }

    let log_mean = valid
        .iter()
        .map(|&j| moments[j].0.log10() as f32)
        .collect::<Vec<_>>();
    let log_var = valid
        .iter()
        .map(|&j| moments[j].1.log10() as f32)
        .collect::<Vec<_>>();

    let window = (valid.len() / 10).max(10);
    let trend = local_trend(&log_mean, &log_var, window);
    let clip = nf.sqrt();

    let valid_scores = valid
        .par_iter()
        .zip(trend.par_iter())
        .map(|(&j, &t)| {
            let (mu, _) = moments[j];
            let sd = 10_f64.powf(t as f64).sqrt();
            let col = csc.col(j);
            let nnz = col.values().len();

            let mut s1 = 0_f64;
            let mut s2 = 0_f64;
            for &x in col.values() {
                let z = ((x as f64 - mu) / sd).min(clip);
                s1 += z;
                s2 += z * z;
            }
            // zeros not stored in the sparse column
            let z0 = (-mu / sd).min(clip);
            let nzero = (nn - nnz) as f64;
            s1 += nzero * z0;
            s2 += nzero * z0 * z0;

            let zbar = s1 / nf;
            ((s2 - nf * zbar * zbar) / (nf - 1.0)).max(0.0) as f32
        })
        .collect::<Vec<_>>();

    for (&j, s) in valid.iter().zip(valid_scores) {
        scores[j] = s;
    }
    scores
}

/// Indices of the `k` highest positive scores, best first; ties go to
/// the lower index
pub fn top_variable_features(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order = (0..scores.len())
        .filter(|&j| scores[j] > 0.0)
        .collect::<Vec<_>>();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order.truncate(k);
    order
}

/// Normalize one batch and rank its variable features
///
/// * `label` - batch label
/// * `rows` - the batch's rows in `data`
pub fn preprocess_batch(
    data: &Dataset,
    label: &str,
    rows: &[usize],
    config: &PreprocessConfig,
) -> anyhow::Result<NormalizedBatch> {
    if rows.len() < 2 {
        anyhow::bail!(
            "batch `{}` has {} cell(s) left; at least 2 are needed",
            label,
            rows.len()
        );
    }

    let counts = select_csr_rows(&data.counts, rows)?;
    let normalized = normalize_counts(&counts, config.scale_factor)?;
    let all_scores = variable_feature_scores(&counts);
    let top = top_variable_features(&all_scores, config.num_variable_features);

    debug!(
        "batch {}: {} variable features out of {}",
        label,
        top.len(),
        data.num_features()
    );

    Ok(NormalizedBatch {
        label: label.into(),
        rows: rows.to_vec(),
        data: normalized,
        variable_features: top.iter().map(|&j| data.features[j].clone()).collect(),
        scores: top.iter().map(|&j| all_scores[j]).collect(),
    })
}

/// Split the dataset by batch and preprocess each batch in parallel.
/// Batches come out in arrival order.
pub fn preprocess_batches(
    data: &Dataset,
    config: &PreprocessConfig,
    cancel: &CancelToken,
) -> anyhow::Result<Vec<NormalizedBatch>> {
    let partitions = data.batch_partitions();
    let nbatch = partitions.len();

    let ret = partitions
        .par_iter()
        .progress_count(nbatch as u64)
        .map(|(label, rows)| {
            cancel.check("preprocess")?;
            preprocess_batch(data, label, rows, config)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    for b in ret.iter() {
        info!(
            "batch {}: {} cells, top variable features: {}",
            b.label,
            b.num_cells(),
            b.variable_features
                .iter()
                .take(5)
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(ret)
}
