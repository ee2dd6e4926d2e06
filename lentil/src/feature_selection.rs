use crate::preprocess::NormalizedBatch;

use fnv::FnvHashMap as HashMap;
use log::info;
use matrix_util::utils::median;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FeaturePolicy {
    /// variable in more than one batch (or in the only batch)
    Frequent,
    /// variable in any batch
    Union,
    /// variable in every batch
    Intersection,
}

/// Pick the features all batches are compared on.
///
/// Candidates are ranked by the number of batches calling them
/// variable, then by median rank within those batches, then by name.
///
/// * `batches` - preprocessed batches with ranked variable features
/// * `num_features` - keep at most this many
/// * `policy` - which candidates are admissible
pub fn select_integration_features(
    batches: &[NormalizedBatch],
    num_features: usize,
    policy: FeaturePolicy,
) -> anyhow::Result<Vec<Box<str>>> {
    let nbatch = batches.len();

    let mut ranks: HashMap<&str, Vec<f32>> = HashMap::default();
    for b in batches.iter() {
        for (r, f) in b.variable_features.iter().enumerate() {
            ranks.entry(&**f).or_default().push(r as f32);
        }
    }

    let admissible = |count: usize| match policy {
        FeaturePolicy::Frequent => count > 1 || (nbatch == 1 && count == 1),
        FeaturePolicy::Union => count >= 1,
        FeaturePolicy::Intersection => count == nbatch,
    };

    let mut candidates = ranks
        .into_iter()
        .filter(|(_, r)| admissible(r.len()))
        .map(|(f, r)| (f, r.len(), median(&r).unwrap_or(f32::MAX)))
        .collect::<Vec<_>>();

    candidates.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then(a.2.total_cmp(&b.2))
            .then(a.0.cmp(b.0))
    });
    candidates.truncate(num_features);

    if candidates.is_empty() {
        anyhow::bail!(
            "no integration feature under the {:?} policy across {} batches",
            policy,
            nbatch
        );
    }

    info!(
        "{} integration features ({:?}), shared by {} to {} batches",
        candidates.len(),
        policy,
        candidates.last().map(|c| c.1).unwrap_or(0),
        candidates.first().map(|c| c.1).unwrap_or(0),
    );

    Ok(candidates.into_iter().map(|(f, _, _)| f.into()).collect())
}
