use crate::config::MergeConfig;
use crate::dataset::{CellRecord, Dataset};
use crate::errors::PipelineError;
use crate::loader::LoadedBatch;

use fnv::FnvHashSet as HashSet;
use log::info;
use matrix_util::sparse_util::vstack_csr;

/// The first candidate that occurs in no batch label and no barcode
pub fn choose_separator(batches: &[LoadedBatch], candidates: &[char]) -> Option<char> {
    candidates.iter().copied().find(|&sep| {
        batches.iter().all(|b| {
            !b.label.contains(sep) && b.cells.iter().all(|c| !c.barcode.contains(sep))
        })
    })
}

fn check_schema(reference: &LoadedBatch, batch: &LoadedBatch) -> anyhow::Result<()> {
    let mismatch = reference
        .features
        .iter()
        .zip(batch.features.iter())
        .position(|(a, b)| a != b);

    let detail = match mismatch {
        Some(j) => format!(
            "position {}: `{}` vs `{}`",
            j, batch.features[j], reference.features[j]
        ),
        None if reference.features.len() != batch.features.len() => format!(
            "{} features vs {}",
            batch.features.len(),
            reference.features.len()
        ),
        None => return Ok(()),
    };

    Err(PipelineError::SchemaMismatch {
        batch: batch.label.clone(),
        reference: reference.label.clone(),
        detail,
    }
    .into())
}

/// Concatenate batches along the cell axis.
///
/// Every batch must carry exactly the features of the first one, in the
/// same order. Cell identifiers become `label + separator + barcode`,
/// where the separator is the first candidate absent from all labels
/// and barcodes. Cells keep batch arrival order, then in-batch order.
pub fn merge_batches(batches: Vec<LoadedBatch>, config: &MergeConfig) -> anyhow::Result<Dataset> {
    let Some(first) = batches.first() else {
        anyhow::bail!("no batch to merge");
    };

    let mut labels = HashSet::default();
    for b in batches.iter() {
        if !labels.insert(b.label.clone()) {
            return Err(PipelineError::IdentifierCollision {
                batch: b.label.clone(),
                identifier: b.label.clone(),
                reason: "the batch label is used more than once".into(),
            }
            .into());
        }
    }

    for b in batches.iter().skip(1) {
        check_schema(first, b)?;
    }

    let separator = choose_separator(&batches, &config.separator_candidates).ok_or_else(|| {
        PipelineError::IdentifierCollision {
            batch: first.label.clone(),
            identifier: "".into(),
            reason: format!(
                "every separator candidate {:?} occurs in a label or barcode",
                config.separator_candidates
            ),
        }
    })?;

    let ntot = batches.iter().map(|b| b.num_cells()).sum::<usize>();
    let mut ids = HashSet::default();
    let mut cells = Vec::with_capacity(ntot);

    for b in batches.iter() {
        for c in b.cells.iter() {
            let id: Box<str> = format!("{}{}{}", b.label, separator, c.barcode).into();
            if !ids.insert(id.clone()) {
                return Err(PipelineError::IdentifierCollision {
                    batch: b.label.clone(),
                    identifier: id,
                    reason: format!("barcode `{}` appears more than once", c.barcode),
                }
                .into());
            }
            cells.push(CellRecord {
                id,
                barcode: c.barcode.clone(),
                batch: b.label.clone(),
                fields: vec![],
                metrics: None,
            });
        }
    }

    let counts = vstack_csr(&batches.iter().map(|b| &b.counts).collect::<Vec<_>>())?;

    info!(
        "merged {} batches: {} cells x {} features, separator `{}`",
        batches.len(),
        counts.nrows(),
        counts.ncols(),
        separator
    );

    Ok(Dataset {
        counts,
        features: first.features.clone(),
        cells,
        batches: batches.iter().map(|b| b.label.clone()).collect(),
        separator,
    })
}
