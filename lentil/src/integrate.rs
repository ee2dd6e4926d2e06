use crate::anchors::{feature_column_map, shared_feature_block, Anchor, AnchorSet, PairAnchors};
use crate::cancel::CancelToken;
use crate::config::{IntegrateConfig, MemoryBudget};
use crate::preprocess::NormalizedBatch;

use indicatif::ParallelProgressIterator;
use log::{info, warn};
use matrix_util::dmatrix_util::*;
use matrix_util::knn_match::{ColumnDict, MakeVecPoint};
use matrix_util::sparse_util::*;
use matrix_util::traits::{MatOps, RandomizedAlgs};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Which batch the others are aligned to
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReferencePolicy {
    /// the batch with the most cells; ties go to the earliest
    Largest,
    /// a batch named by its label
    Batch(Box<str>),
}

/// Index of the reference batch
pub fn choose_reference(
    batches: &[NormalizedBatch],
    policy: &ReferencePolicy,
) -> anyhow::Result<usize> {
    match policy {
        ReferencePolicy::Batch(label) => batches
            .iter()
            .position(|b| b.label == *label)
            .ok_or_else(|| anyhow::anyhow!("unknown reference batch `{}`", label)),
        ReferencePolicy::Largest => batches
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, usize)>, (i, b)| match best {
                Some((_, n)) if n >= b.num_cells() => best,
                _ => Some((i, b.num_cells())),
            })
            .map(|(i, _)| i)
            .ok_or_else(|| anyhow::anyhow!("no batch to integrate")),
    }
}

/// Fitted anchor-weighted correction of one query batch towards the
/// reference. Dense blocks are stored row by row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CorrectionTransform {
    pub batch: Box<str>,
    pub reference: Box<str>,
    pub features: Vec<Box<str>>,
    /// query feature means subtracted before embedding
    pub means: Vec<f32>,
    /// features x components
    pub basis: Vec<Vec<f32>>,
    /// anchors x components, the query side of each anchor
    pub anchor_points: Vec<Vec<f32>>,
    pub anchor_scores: Vec<f32>,
    /// anchors x features, reference minus query
    pub corrections: Vec<Vec<f32>>,
    pub knn_weight: usize,
    pub sd_weight: f32,
}

fn dense_rows(x: &DMatrix<f32>) -> Vec<Vec<f32>> {
    x.row_iter().map(|r| r.iter().copied().collect()).collect()
}

impl CorrectionTransform {
    /// Fit from the shared-feature blocks of both batches and the
    /// anchors oriented towards the reference (`cell_a` in the
    /// reference, `cell_b` in the query)
    pub fn fit(
        batch: &str,
        reference: &str,
        features: &[Box<str>],
        x_ref: &DMatrix<f32>,
        x_query: &DMatrix<f32>,
        anchors: &[Anchor],
        config: &IntegrateConfig,
    ) -> anyhow::Result<Self> {
        if anchors.is_empty() {
            anyhow::bail!("no anchor between `{}` and `{}`", batch, reference);
        }
        if anchors.len() < config.knn_weight {
            warn!(
                "{} vs {}: {} anchors for {} weighting neighbours; \
                 cells away from every anchor stay uncorrected",
                batch,
                reference,
                anchors.len(),
                config.knn_weight
            );
        }

        let corrections = anchors
            .iter()
            .map(|a| {
                x_ref
                    .row(a.cell_a)
                    .iter()
                    .zip(x_query.row(a.cell_b).iter())
                    .map(|(r, q)| r - q)
                    .collect::<Vec<f32>>()
            })
            .collect::<Vec<_>>();

        let means = x_query.column_means();
        let mut centred = x_query.clone();
        centred.centre_columns_inplace();

        let (_, _, vv) = centred.rsvd(config.num_components, config.seed)?;
        let embedded = &centred * &vv;

        let anchor_points = anchors
            .iter()
            .map(|a| embedded.row(a.cell_b).iter().copied().collect())
            .collect();

        Ok(Self {
            batch: batch.into(),
            reference: reference.into(),
            features: features.to_vec(),
            means,
            basis: dense_rows(&vv),
            anchor_points,
            anchor_scores: anchors.iter().map(|a| a.score).collect(),
            corrections,
            knn_weight: config.knn_weight,
            sd_weight: config.sd_weight,
        })
    }

    pub fn num_anchors(&self) -> usize {
        self.anchor_scores.len()
    }

    fn anchor_dict(&self) -> ColumnDict<usize> {
        let points = self.anchor_points.iter().map(|x| x.to_vp()).collect();
        ColumnDict::from_points(points, (0..self.num_anchors()).collect())
    }

    fn embed(&self, x: &[f32]) -> Vec<f32> {
        let ncomp = self.basis.first().map(|b| b.len()).unwrap_or(0);
        let mut z = vec![0_f32; ncomp];
        for ((&xj, mu), b) in x.iter().zip(self.means.iter()).zip(self.basis.iter()) {
            let c = xj - mu;
            z.iter_mut().zip(b.iter()).for_each(|(zk, bk)| *zk += c * bk);
        }
        z
    }

    /// Normalized anchor weights of a query point in the embedding;
    /// all zero when no anchor carries weight
    fn weights(&self, dict: &ColumnDict<usize>, z: &[f32]) -> Vec<(usize, f32)> {
        let knn = self.knn_weight.min(self.num_anchors()).max(1);
        let (nbrs, dists) = dict.search_by_query(&z.to_vp(), knn);
        let d_k = dists.last().copied().unwrap_or(0.0);
        let denom = (2.0 / self.sd_weight).powi(2);

        let mut w = nbrs
            .into_iter()
            .zip(dists)
            .map(|(a, d)| {
                let dist_w = if d_k > 0.0 { 1.0 - d / d_k } else { 1.0 };
                let raw = dist_w * self.anchor_scores[a];
                (a, 1.0 - (-raw / denom).exp())
            })
            .collect::<Vec<_>>();

        let total = w.iter().map(|(_, x)| x).sum::<f32>();
        if total > 0.0 {
            w.iter_mut().for_each(|(_, x)| *x /= total);
        } else {
            w.clear();
        }
        w
    }

    fn correct_with(&self, dict: &ColumnDict<usize>, x: &[f32]) -> Vec<f32> {
        let z = self.embed(x);
        let mut ret = x.to_vec();
        for (a, w) in self.weights(dict, &z) {
            ret.iter_mut()
                .zip(self.corrections[a].iter())
                .for_each(|(r, c)| *r += w * c);
        }
        ret
    }

    /// Correct one query cell given on the shared features
    pub fn apply(&self, x: &[f32]) -> anyhow::Result<Vec<f32>> {
        if x.len() != self.features.len() {
            anyhow::bail!("{} values for {} features", x.len(), self.features.len());
        }
        Ok(self.correct_with(&self.anchor_dict(), x))
    }

    /// Correct every row (cell) of a cells x shared features block
    pub fn apply_rows(&self, x: &DMatrix<f32>) -> anyhow::Result<DMatrix<f32>> {
        if x.ncols() != self.features.len() {
            anyhow::bail!("{} columns for {} features", x.ncols(), self.features.len());
        }
        let dict = self.anchor_dict();
        let nn = x.nrows();
        let rows = (0..nn)
            .into_par_iter()
            .progress_count(nn as u64)
            .map(|i| {
                let xi = x.row(i).iter().copied().collect::<Vec<_>>();
                self.correct_with(&dict, &xi)
            })
            .collect::<Vec<_>>();
        Ok(DMatrix::from_fn(nn, x.ncols(), |i, j| rows[i][j]))
    }
}

/// Batches merged into one corrected expression space
#[derive(Clone, Debug, PartialEq)]
pub struct IntegratedData {
    /// cells x all features, dataset cell order
    pub values: CsrMat,
    /// shared features holding corrected values
    pub features: Vec<Box<str>>,
    pub reference: Box<str>,
    pub transforms: Vec<CorrectionTransform>,
    pub anchors: Vec<PairAnchors>,
}

/// Align every non-reference batch to the reference in parallel.
///
/// * `batches` - preprocessed batches in arrival order
/// * `all_features` - dataset feature names
/// * `anchors` - anchors of every batch pair on the shared features
pub fn integrate_batches(
    batches: &[NormalizedBatch],
    all_features: &[Box<str>],
    anchors: &AnchorSet,
    config: &IntegrateConfig,
    budget: &MemoryBudget,
    cancel: &CancelToken,
) -> anyhow::Result<IntegratedData> {
    let r = choose_reference(batches, &config.reference)?;
    let reference = &batches[r];
    info!(
        "reference batch: {} ({} cells)",
        reference.label,
        reference.num_cells()
    );

    let features = &anchors.features;
    let nfeatures = features.len();
    let column_map = feature_column_map(all_features, features)?;

    budget.check_dense(
        "integrate",
        || format!("shared features of reference `{}`", reference.label),
        reference.num_cells(),
        nfeatures,
    )?;
    let x_ref = shared_feature_block(reference, &column_map, nfeatures);

    let corrected = batches
        .par_iter()
        .enumerate()
        .filter(|&(i, _)| i != r)
        .map(|(i, query)| {
            cancel.check("integrate")?;

            let pair = anchors.pair(&reference.label, &query.label).ok_or_else(|| {
                anyhow::anyhow!("no anchors for `{}` and `{}`", reference.label, query.label)
            })?;
            let oriented = pair
                .oriented_towards(&reference.label)
                .unwrap_or_default();

            budget.check_dense(
                "integrate",
                || format!("shared features of `{}`", query.label),
                query.num_cells(),
                nfeatures,
            )?;
            budget.check_dense(
                "integrate",
                || format!("corrections of `{}`", query.label),
                oriented.len(),
                nfeatures,
            )?;

            let x_query = shared_feature_block(query, &column_map, nfeatures);
            let transform = CorrectionTransform::fit(
                &query.label,
                &reference.label,
                features,
                &x_ref,
                &x_query,
                &oriented,
                config,
            )?;
            let x_corrected = transform.apply_rows(&x_query)?;

            info!(
                "batch {}: corrected {} cells with {} anchors",
                query.label,
                query.num_cells(),
                transform.num_anchors()
            );
            Ok((i, transform, x_corrected))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let ncells = batches.iter().map(|b| b.num_cells()).sum::<usize>();
    let mut rows: Vec<Vec<(usize, f32)>> = vec![vec![]; ncells];

    // normalized values everywhere first
    for b in batches.iter() {
        for (local, &row) in b.rows.iter().enumerate() {
            if row >= ncells {
                anyhow::bail!("row {} of batch `{}` out of range {}", row, b.label, ncells);
            }
            let x = b.data.row(local);
            rows[row] = x
                .col_indices()
                .iter()
                .copied()
                .zip(x.values().iter().copied())
                .collect();
        }
    }

    // then shared columns of the query batches
    let shared_columns = column_map
        .iter()
        .enumerate()
        .filter_map(|(j, k)| k.map(|k| (k, j)))
        .collect::<Vec<_>>();

    let mut transforms = Vec::with_capacity(corrected.len());
    for (i, transform, x_corrected) in corrected {
        let b = &batches[i];
        for (local, &row) in b.rows.iter().enumerate() {
            let mut entries = rows[row]
                .iter()
                .copied()
                .filter(|(j, _)| column_map[*j].is_none())
                .collect::<Vec<_>>();
            entries.extend(
                shared_columns
                    .iter()
                    .map(|&(k, j)| (j, x_corrected[(local, k)])),
            );
            rows[row] = entries;
        }
        transforms.push(transform);
    }

    let values = csr_from_rows(all_features.len(), rows)?;

    Ok(IntegratedData {
        values,
        features: features.clone(),
        reference: reference.label.clone(),
        transforms,
        anchors: anchors.pairs.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_anchor_transform() -> CorrectionTransform {
        CorrectionTransform {
            batch: "query".into(),
            reference: "ref".into(),
            features: vec!["f1".into(), "f2".into()],
            means: vec![0.0, 0.0],
            basis: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            anchor_points: vec![vec![1.0, 0.0]],
            anchor_scores: vec![1.0],
            corrections: vec![vec![5.0, 5.0]],
            knn_weight: 100,
            sd_weight: 1.0,
        }
    }

    #[test]
    fn a_single_anchor_corrects_only_its_own_position() -> anyhow::Result<()> {
        let tr = one_anchor_transform();
        assert_eq!(tr.apply(&[1.0, 0.0])?, vec![6.0, 5.0]);
        // the only neighbour is also the farthest one
        assert_eq!(tr.apply(&[3.0, 0.0])?, vec![3.0, 0.0]);
        assert!(tr.apply(&[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn the_farthest_anchor_carries_no_weight() -> anyhow::Result<()> {
        let tr = CorrectionTransform {
            anchor_points: vec![vec![1.0, 0.0], vec![3.0, 0.0]],
            anchor_scores: vec![1.0, 1.0],
            corrections: vec![vec![5.0, 5.0], vec![1.0, 1.0]],
            ..one_anchor_transform()
        };
        assert_eq!(tr.apply(&[1.0, 0.0])?, vec![6.0, 5.0]);
        Ok(())
    }
}
