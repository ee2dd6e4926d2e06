use crate::cancel::CancelToken;
use crate::config::{AnchorConfig, MemoryBudget};
use crate::errors::PipelineError;
use crate::preprocess::NormalizedBatch;
use crate::projection::{shared_projection, SharedProjection};

use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use indicatif::ParallelProgressIterator;
use log::{debug, info};
use matrix_util::dmatrix_util::*;
use matrix_util::knn_match::ColumnDict;
use matrix_util::sparse_util::dense_rows_on_columns;
use matrix_util::traits::MatOps;
use matrix_util::utils::{quantile, unordered_pairs};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Scaled values are clipped at this absolute value before projection
pub const SCALE_CLIP: f32 = 10.0;

/// A pair of mutually nearest cells; indices are local to each batch
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub cell_a: usize,
    pub cell_b: usize,
    pub score: f32,
}

/// Anchors between two batches, stored once per unordered pair
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PairAnchors {
    pub batch_a: Box<str>,
    pub batch_b: Box<str>,
    /// mutual nearest neighbours before scoring and filtering
    pub found: usize,
    pub anchors: Vec<Anchor>,
}

impl PairAnchors {
    pub fn retained(&self) -> usize {
        self.anchors.len()
    }

    pub fn involves(&self, batch: &str) -> bool {
        &*self.batch_a == batch || &*self.batch_b == batch
    }

    /// Anchors with `cell_a` in `batch` and `cell_b` in the other one
    pub fn oriented_towards(&self, batch: &str) -> Option<Vec<Anchor>> {
        if &*self.batch_a == batch {
            Some(self.anchors.clone())
        } else if &*self.batch_b == batch {
            Some(
                self.anchors
                    .iter()
                    .map(|a| Anchor {
                        cell_a: a.cell_b,
                        cell_b: a.cell_a,
                        score: a.score,
                    })
                    .collect(),
            )
        } else {
            None
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnchorSet {
    /// features the anchors were found on
    pub features: Vec<Box<str>>,
    pub pairs: Vec<PairAnchors>,
}

impl AnchorSet {
    /// The anchors between `a` and `b` in either orientation
    pub fn pair(&self, a: &str, b: &str) -> Option<&PairAnchors> {
        self.pairs.iter().find(|p| p.involves(a) && p.involves(b) && a != b)
    }

    /// Per-pair found/retained counts
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "features": self.features.len(),
            "pairs": self.pairs.iter().map(|p| serde_json::json!({
                "batch_a": p.batch_a,
                "batch_b": p.batch_b,
                "found": p.found,
                "retained": p.retained(),
            })).collect::<Vec<_>>(),
        })
    }
}

/// Map each dataset column to its position among `features`
pub fn feature_column_map(
    all_features: &[Box<str>],
    features: &[Box<str>],
) -> anyhow::Result<Vec<Option<usize>>> {
    let position: HashMap<&str, usize> = features
        .iter()
        .enumerate()
        .map(|(k, f)| (&**f, k))
        .collect();

    let map = all_features
        .iter()
        .map(|f| position.get(&**f).copied())
        .collect::<Vec<_>>();

    let found = map.iter().filter(|x| x.is_some()).count();
    if found != features.len() {
        anyhow::bail!(
            "{} of {} shared features are not in the dataset",
            features.len() - found,
            features.len()
        );
    }
    Ok(map)
}

/// All cells of a batch restricted to the shared features (dense)
pub fn shared_feature_block(
    batch: &NormalizedBatch,
    column_map: &[Option<usize>],
    nfeatures: usize,
) -> DMatrix<f32> {
    let rows = (0..batch.num_cells()).collect::<Vec<_>>();
    dense_rows_on_columns(&batch.data, &rows, column_map, nfeatures)
}

/// Pairs `(a, b)` such that `b` is among the `knn` nearest rows of `yb`
/// to row `a` of `ya` and vice versa, sorted by `a` then by distance
pub fn mutual_nearest_neighbours(
    dict_a: &ColumnDict<usize>,
    dict_b: &ColumnDict<usize>,
    knn: usize,
) -> Vec<(usize, usize)> {
    let a_to_b = dict_a.match_all_against(knn, dict_b);
    let b_to_a = dict_b
        .match_all_against(knn, dict_a)
        .into_iter()
        .map(|(names, _)| names.into_iter().collect::<HashSet<usize>>())
        .collect::<Vec<_>>();

    a_to_b
        .into_iter()
        .enumerate()
        .flat_map(|(a, (names, _))| {
            names
                .into_iter()
                .filter(|b| b_to_a[*b].contains(&a))
                .map(|b| (a, b))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Neighbourhood of every cell of `dict` in the combined index space
/// where cells of A come first and cells of B are shifted by `na`
fn neighbourhoods(
    dict: &ColumnDict<usize>,
    dict_a: &ColumnDict<usize>,
    dict_b: &ColumnDict<usize>,
    knn: usize,
) -> Vec<HashSet<usize>> {
    let na = dict_a.len();
    let within_a = dict.match_all_against(knn, dict_a);
    let within_b = dict.match_all_against(knn, dict_b);
    within_a
        .into_iter()
        .zip(within_b)
        .map(|((aa, _), (bb, _))| {
            aa.into_iter()
                .chain(bb.into_iter().map(|b| b + na))
                .collect()
        })
        .collect()
}

/// Shared-neighbourhood score of each anchor:
/// `|N(a) ∩ N(b)| / (2 k)` where `N(x)` holds the `k` nearest cells of
/// `x` in each batch, itself included
pub fn score_anchors(
    dict_a: &ColumnDict<usize>,
    dict_b: &ColumnDict<usize>,
    pairs: &[(usize, usize)],
    knn: usize,
) -> Vec<f32> {
    let kk = knn.min(dict_a.len()).min(dict_b.len()).max(1);
    let nbr_a = neighbourhoods(dict_a, dict_a, dict_b, kk);
    let nbr_b = neighbourhoods(dict_b, dict_a, dict_b, kk);
    let denom = (2 * kk) as f32;

    pairs
        .par_iter()
        .map(|&(a, b)| nbr_a[a].intersection(&nbr_b[b]).count() as f32 / denom)
        .collect()
}

/// Rescale between the `lo` and `hi` quantiles and clamp to [0, 1]
pub fn rescale_scores(scores: &mut [f32], quantiles: Option<(f32, f32)>) {
    if let Some((lo, hi)) = quantiles {
        if let (Some(qlo), Some(qhi)) = (quantile(scores, lo), quantile(scores, hi)) {
            if qhi > qlo {
                scores.iter_mut().for_each(|s| *s = (*s - qlo) / (qhi - qlo));
            }
        }
    }
    scores.iter_mut().for_each(|s| *s = s.clamp(0.0, 1.0));
}

/// Scale each shared feature within the batch and check the dense size
fn scaled_block(
    batch: &NormalizedBatch,
    column_map: &[Option<usize>],
    nfeatures: usize,
    budget: &MemoryBudget,
) -> anyhow::Result<DMatrix<f32>> {
    budget.check_dense(
        "anchors",
        || format!("shared features of batch `{}`", batch.label),
        batch.num_cells(),
        nfeatures,
    )?;
    let mut x = shared_feature_block(batch, column_map, nfeatures);
    x.scale_columns_inplace(Some(SCALE_CLIP));
    Ok(x)
}

/// Anchors between two preprocessed batches
///
/// * `column_map` - dataset column to shared feature position
/// * `nfeatures` - number of shared features
/// * `projection` - how both batches are embedded jointly
pub fn find_pair_anchors(
    batch_a: &NormalizedBatch,
    batch_b: &NormalizedBatch,
    column_map: &[Option<usize>],
    nfeatures: usize,
    projection: &dyn SharedProjection,
    config: &AnchorConfig,
    budget: &MemoryBudget,
) -> anyhow::Result<PairAnchors> {
    let na = batch_a.num_cells();
    let nb = batch_b.num_cells();
    let knn = config.knn_anchor.max(1);

    let insufficient = |found: usize, retained: usize, reason: String| -> anyhow::Error {
        PipelineError::InsufficientAnchors {
            batch_a: batch_a.label.clone(),
            batch_b: batch_b.label.clone(),
            found,
            retained,
            reason,
        }
        .into()
    };

    if na < knn || nb < knn {
        return Err(insufficient(
            0,
            0,
            format!(
                "{} and {} cells, but {} neighbours are needed on each side",
                na, nb, knn
            ),
        ));
    }

    let (wr, wc) = projection.workspace_dims(na, nb, nfeatures);
    budget.check_dense(
        "anchors",
        || format!("projection of `{}` and `{}`", batch_a.label, batch_b.label),
        wr,
        wc,
    )?;

    let xa = scaled_block(batch_a, column_map, nfeatures, budget)?;
    let xb = scaled_block(batch_b, column_map, nfeatures, budget)?;

    let (mut ya, mut yb) = projection.project(&xa, &xb)?;
    ya.normalize_rows_inplace();
    yb.normalize_rows_inplace();
    debug!(
        "{} vs {}: embedded in {} dimensions",
        batch_a.label,
        batch_b.label,
        ya.ncols()
    );

    let dict_a = ColumnDict::from_dmatrix_rows(&ya, (0..na).collect());
    let dict_b = ColumnDict::from_dmatrix_rows(&yb, (0..nb).collect());

    let mnn = mutual_nearest_neighbours(&dict_a, &dict_b, knn);
    let found = mnn.len();
    if found == 0 {
        return Err(insufficient(0, 0, "no mutual nearest neighbours".into()));
    }

    let mut scores = score_anchors(&dict_a, &dict_b, &mnn, config.knn_score);
    rescale_scores(&mut scores, config.score_quantiles);

    let anchors = mnn
        .into_iter()
        .zip(scores)
        .filter(|&(_, s)| s >= config.score_floor)
        .map(|((cell_a, cell_b), score)| Anchor {
            cell_a,
            cell_b,
            score,
        })
        .collect::<Vec<_>>();

    info!(
        "anchors {} vs {}: {} found, {} retained",
        batch_a.label,
        batch_b.label,
        found,
        anchors.len()
    );

    if anchors.is_empty() {
        return Err(insufficient(
            found,
            0,
            format!("no anchor scores at least {}", config.score_floor),
        ));
    }

    Ok(PairAnchors {
        batch_a: batch_a.label.clone(),
        batch_b: batch_b.label.clone(),
        found,
        anchors,
    })
}

/// Find anchors for every unordered pair of batches in parallel
///
/// * `batches` - preprocessed batches in arrival order
/// * `all_features` - dataset feature names (columns of each batch)
/// * `features` - shared integration features
pub fn find_anchors(
    batches: &[NormalizedBatch],
    all_features: &[Box<str>],
    features: &[Box<str>],
    config: &AnchorConfig,
    budget: &MemoryBudget,
    cancel: &CancelToken,
) -> anyhow::Result<AnchorSet> {
    let column_map = feature_column_map(all_features, features)?;
    let nfeatures = features.len();
    let projection = shared_projection(config.projection, config.num_components, config.seed);

    let pairs = unordered_pairs(batches.len());
    let npairs = pairs.len();
    let pairs = pairs
        .into_par_iter()
        .progress_count(npairs as u64)
        .map(|(i, j)| {
            cancel.check("anchors")?;
            find_pair_anchors(
                &batches[i],
                &batches[j],
                &column_map,
                nfeatures,
                projection.as_ref(),
                config,
                budget,
            )
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(AnchorSet {
        features: features.to_vec(),
        pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescaling_stays_in_unit_interval() {
        let mut scores = vec![0.0, 0.1, 0.2, 0.5, 1.0];
        rescale_scores(&mut scores, Some((0.0, 0.5)));
        assert!(scores.iter().all(|&s| (0.0..=1.0).contains(&s)));
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[4], 1.0);

        let mut flat = vec![0.3; 4];
        rescale_scores(&mut flat, Some((0.01, 0.9)));
        assert_eq!(flat, vec![0.3; 4]);
    }

    #[test]
    fn orientation_swaps_cells() {
        let pair = PairAnchors {
            batch_a: "a".into(),
            batch_b: "b".into(),
            found: 1,
            anchors: vec![Anchor {
                cell_a: 3,
                cell_b: 7,
                score: 0.5,
            }],
        };
        let towards_b = pair.oriented_towards("b").unwrap_or_default();
        assert_eq!(towards_b[0].cell_a, 7);
        assert_eq!(towards_b[0].cell_b, 3);
        assert!(pair.oriented_towards("c").is_none());
    }
}
