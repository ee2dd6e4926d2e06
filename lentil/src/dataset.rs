use matrix_util::sparse_util::*;
use matrix_util::utils::ordered_partition_by_membership;
use serde::{Deserialize, Serialize};

/// Per-cell quality metrics appended by the metadata step
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct CellMetrics {
    pub total_count: f32,
    pub feature_count: usize,
    /// percentage of counts on features matching the pattern
    pub percent_pattern: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CellRecord {
    pub id: Box<str>,
    pub barcode: Box<str>,
    pub batch: Box<str>,
    /// named fields parsed out of `id`
    pub fields: Vec<(Box<str>, Box<str>)>,
    pub metrics: Option<CellMetrics>,
}

impl CellRecord {
    pub fn new(barcode: &str, batch: &str) -> Self {
        Self {
            id: barcode.into(),
            barcode: barcode.into(),
            batch: batch.into(),
            fields: vec![],
            metrics: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| &**v)
    }
}

/// Merged cells x features counts with one record per row
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub counts: CsrMat,
    pub features: Vec<Box<str>>,
    pub cells: Vec<CellRecord>,
    /// batch labels in arrival order
    pub batches: Vec<Box<str>>,
    /// joins batch labels and barcodes into cell identifiers
    pub separator: char,
}

impl Dataset {
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn cell_ids(&self) -> Vec<Box<str>> {
        self.cells.iter().map(|c| c.id.clone()).collect()
    }

    pub fn batch_membership(&self) -> Vec<Box<str>> {
        self.cells.iter().map(|c| c.batch.clone()).collect()
    }

    /// Row indices of each batch, in batch arrival order
    pub fn batch_partitions(&self) -> Vec<(Box<str>, Vec<usize>)> {
        ordered_partition_by_membership(&self.batch_membership(), &self.batches)
    }

    /// Keep the given rows (in the given order); batch labels stay
    pub fn subset_cells(&self, rows: &[usize]) -> anyhow::Result<Dataset> {
        Ok(Dataset {
            counts: select_csr_rows(&self.counts, rows)?,
            features: self.features.clone(),
            cells: rows.iter().map(|&i| self.cells[i].clone()).collect(),
            batches: self.batches.clone(),
            separator: self.separator,
        })
    }
}
