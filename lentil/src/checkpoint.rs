//! Versioned snapshots of the pipeline state.
//!
//! A checkpoint is a gzip-compressed JSON document. It is written to a
//! temporary file next to the target and renamed over it only after
//! the complete document has been flushed, so a reader either sees the
//! previous checkpoint or the new one.

use crate::anchors::PairAnchors;
use crate::dataset::{CellRecord, Dataset};
use crate::errors::PipelineError;
use crate::integrate::{CorrectionTransform, IntegratedData};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use matrix_util::common_io::{mkdir, open_buf_reader};
use matrix_util::sparse_util::CsrMat;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;
pub const CHECKPOINT_SUFFIX: &str = ".ckpt.json.gz";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    PostFilter,
    PostIntegration,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::PostFilter => "post-filter",
            Stage::PostIntegration => "post-integration",
        }
    }
}

/// What a checkpoint holds: the filtered dataset and, after
/// integration, the integrated matrix with its transforms
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineState {
    pub dataset: Dataset,
    pub integrated: Option<IntegratedData>,
}

#[derive(Serialize, Deserialize)]
struct CsrSnapshot {
    nrows: usize,
    ncols: usize,
    offsets: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f32>,
}

impl From<&CsrMat> for CsrSnapshot {
    fn from(mat: &CsrMat) -> Self {
        Self {
            nrows: mat.nrows(),
            ncols: mat.ncols(),
            offsets: mat.row_offsets().to_vec(),
            indices: mat.col_indices().to_vec(),
            values: mat.values().to_vec(),
        }
    }
}

impl CsrSnapshot {
    fn restore(self) -> anyhow::Result<CsrMat> {
        CsrMat::try_from_csr_data(
            self.nrows,
            self.ncols,
            self.offsets,
            self.indices,
            self.values,
        )
        .map_err(|e| anyhow::anyhow!("invalid sparse matrix: {}", e))
    }
}

#[derive(Serialize, Deserialize)]
struct DatasetSnapshot {
    counts: CsrSnapshot,
    features: Vec<Box<str>>,
    cells: Vec<CellRecord>,
    batches: Vec<Box<str>>,
    separator: char,
}

#[derive(Serialize, Deserialize)]
struct IntegratedSnapshot {
    values: CsrSnapshot,
    features: Vec<Box<str>>,
    reference: Box<str>,
    transforms: Vec<CorrectionTransform>,
    anchors: Vec<PairAnchors>,
}

#[derive(Serialize, Deserialize)]
struct CheckpointDocument {
    format_version: u32,
    stage: Stage,
    dataset: DatasetSnapshot,
    integrated: Option<IntegratedSnapshot>,
}

impl CheckpointDocument {
    fn new(stage: Stage, state: &PipelineState) -> Self {
        let d = &state.dataset;
        Self {
            format_version: FORMAT_VERSION,
            stage,
            dataset: DatasetSnapshot {
                counts: CsrSnapshot::from(&d.counts),
                features: d.features.clone(),
                cells: d.cells.clone(),
                batches: d.batches.clone(),
                separator: d.separator,
            },
            integrated: state.integrated.as_ref().map(|x| IntegratedSnapshot {
                values: CsrSnapshot::from(&x.values),
                features: x.features.clone(),
                reference: x.reference.clone(),
                transforms: x.transforms.clone(),
                anchors: x.anchors.clone(),
            }),
        }
    }

    fn into_state(self) -> anyhow::Result<PipelineState> {
        let d = self.dataset;
        let counts = d.counts.restore()?;
        if counts.nrows() != d.cells.len() || counts.ncols() != d.features.len() {
            anyhow::bail!(
                "counts [{} x {}] for {} cells and {} features",
                counts.nrows(),
                counts.ncols(),
                d.cells.len(),
                d.features.len()
            );
        }

        let integrated = self
            .integrated
            .map(|x| -> anyhow::Result<IntegratedData> {
                Ok(IntegratedData {
                    values: x.values.restore()?,
                    features: x.features,
                    reference: x.reference,
                    transforms: x.transforms,
                    anchors: x.anchors,
                })
            })
            .transpose()?;

        Ok(PipelineState {
            dataset: Dataset {
                counts,
                features: d.features,
                cells: d.cells,
                batches: d.batches,
                separator: d.separator,
            },
            integrated,
        })
    }
}

fn format_error(file: &Path, message: impl ToString) -> anyhow::Error {
    PipelineError::Format {
        stage: "checkpoint",
        batch: "*".into(),
        file: file.to_string_lossy().into(),
        message: message.to_string(),
    }
    .into()
}

fn read_document(file: &Path) -> anyhow::Result<CheckpointDocument> {
    let reader = open_buf_reader(file)?;
    let doc: CheckpointDocument =
        serde_json::from_reader(reader).map_err(|e| format_error(file, e))?;
    if doc.format_version != FORMAT_VERSION {
        return Err(format_error(
            file,
            format!(
                "format version {}, but {} is supported",
                doc.format_version, FORMAT_VERSION
            ),
        ));
    }
    Ok(doc)
}

/// Read any checkpoint file regardless of its stage
pub fn read_checkpoint(file: impl AsRef<Path>) -> anyhow::Result<(Stage, PipelineState)> {
    let file = file.as_ref();
    let doc = read_document(file)?;
    let stage = doc.stage;
    let state = doc.into_state().map_err(|e| format_error(file, e))?;
    Ok((stage, state))
}

/// A short JSON description of a checkpoint file
pub fn summarize_checkpoint(file: impl AsRef<Path>) -> anyhow::Result<serde_json::Value> {
    let (stage, state) = read_checkpoint(file.as_ref())?;
    let d = &state.dataset;
    Ok(serde_json::json!({
        "file": file.as_ref().to_string_lossy(),
        "format_version": FORMAT_VERSION,
        "stage": stage.name(),
        "cells": d.num_cells(),
        "features": d.num_features(),
        "batches": d.batches,
        "separator": d.separator.to_string(),
        "integration": state.integrated.as_ref().map(|x| serde_json::json!({
            "reference": x.reference,
            "shared_features": x.features.len(),
            "transforms": x.transforms.iter().map(|t| serde_json::json!({
                "batch": t.batch,
                "anchors": t.num_anchors(),
            })).collect::<Vec<_>>(),
        })),
    }))
}

/// Checkpoints of one run, one file per stage in a directory
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, stage: Stage) -> PathBuf {
        self.dir.join(format!("{}{}", stage.name(), CHECKPOINT_SUFFIX))
    }

    /// Write atomically, replacing an earlier checkpoint of this stage
    pub fn save(&self, stage: Stage, state: &PipelineState) -> anyhow::Result<PathBuf> {
        let target = self.path(stage);
        mkdir(&target)?;

        let doc = CheckpointDocument::new(stage, state);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut enc = GzEncoder::new(BufWriter::new(tmp.as_file_mut()), Compression::default());
            serde_json::to_writer(&mut enc, &doc)?;
            enc.finish()?.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;

        info!("checkpoint {} -> {}", stage.name(), target.display());
        Ok(target)
    }

    /// `None` if this stage was never saved
    pub fn restore(&self, stage: Stage) -> anyhow::Result<Option<PipelineState>> {
        let target = self.path(stage);
        if !target.is_file() {
            return Ok(None);
        }
        let (found, state) = read_checkpoint(&target)?;
        if found != stage {
            return Err(format_error(
                &target,
                format!("holds stage {}, expected {}", found.name(), stage.name()),
            ));
        }
        info!("restored {} from {}", stage.name(), target.display());
        Ok(Some(state))
    }
}
