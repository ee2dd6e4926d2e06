use crate::cancel::CancelToken;
use crate::config::LoaderConfig;
use crate::dataset::CellRecord;
use crate::errors::PipelineError;

use log::info;
use matrix_util::common_io::*;
use matrix_util::mtx_io::read_mtx_triplets;
use matrix_util::sparse_util::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const FEATURE_FILES: [&str; 4] = ["features.tsv.gz", "features.tsv", "genes.tsv.gz", "genes.tsv"];
pub const BARCODE_FILES: [&str; 2] = ["barcodes.tsv.gz", "barcodes.tsv"];
pub const MATRIX_FILES: [&str; 2] = ["matrix.mtx.gz", "matrix.mtx"];

/// Directory name suffixes dropped when a label is derived from a path
const LABEL_SUFFIXES: [&str; 4] = [
    "_filtered_feature_bc_matrix",
    "_raw_feature_bc_matrix",
    "_filtered_gene_bc_matrices",
    "_feature_bc_matrix",
];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MtxOrientation {
    /// rows are cells, columns are features
    CellsByFeatures,
    /// rows are features, columns are cells (10x layout)
    FeaturesByCells,
}

/// Where a batch lives and what to call it
#[derive(Clone, Debug, PartialEq)]
pub struct BatchSource {
    pub dir: PathBuf,
    pub label: Option<Box<str>>,
}

impl BatchSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The caller's label, or the directory name without a known suffix
    pub fn resolve_label(&self) -> anyhow::Result<Box<str>> {
        let label: Box<str> = match self.label.as_ref() {
            Some(label) => label.clone(),
            None => {
                let base = basename(&self.dir).unwrap_or_default();
                LABEL_SUFFIXES
                    .iter()
                    .find_map(|sfx| base.strip_suffix(sfx))
                    .unwrap_or(&*base)
                    .into()
            }
        };

        if label.is_empty() {
            return Err(PipelineError::Format {
                stage: "load",
                batch: label,
                file: self.dir.to_string_lossy().into(),
                message: "cannot derive a batch label".into(),
            }
            .into());
        }
        Ok(label)
    }
}

/// Parses `dir` or `label=dir`
impl FromStr for BatchSource {
    type Err = anyhow::Error;

    fn from_str(arg: &str) -> anyhow::Result<Self> {
        match arg.split_once('=') {
            Some((label, dir)) if !label.is_empty() && !dir.is_empty() => {
                Ok(BatchSource::new(dir).with_label(label))
            }
            Some(_) => anyhow::bail!("expected `label=dir`, got `{}`", arg),
            None => Ok(BatchSource::new(arg)),
        }
    }
}

/// One batch as found on disk: cells x features counts
#[derive(Clone, Debug)]
pub struct LoadedBatch {
    pub label: Box<str>,
    pub counts: CsrMat,
    pub features: Vec<Box<str>>,
    pub cells: Vec<CellRecord>,
}

impl LoadedBatch {
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

fn format_error(label: &str, file: &Path, message: impl ToString) -> anyhow::Error {
    PipelineError::Format {
        stage: "load",
        batch: label.into(),
        file: file.to_string_lossy().into(),
        message: message.to_string(),
    }
    .into()
}

fn locate(label: &str, dir: &Path, candidates: &[&str]) -> anyhow::Result<PathBuf> {
    find_first_file(dir, candidates).ok_or_else(|| {
        format_error(
            label,
            dir,
            format!("none of {} found", candidates.join(", ")),
        )
    })
}

/// Read one batch directory
///
/// * `source` - directory with feature, barcode and matrix files
/// * `config` - feature name column and matrix orientation
pub fn load_batch(source: &BatchSource, config: &LoaderConfig) -> anyhow::Result<LoadedBatch> {
    let label = source.resolve_label()?;
    let dir = source.dir.as_path();

    if !dir.is_dir() {
        return Err(format_error(&label, dir, "not a directory"));
    }

    let feature_file = locate(&label, dir, &FEATURE_FILES)?;
    let barcode_file = locate(&label, dir, &BARCODE_FILES)?;
    let mtx_file = locate(&label, dir, &MATRIX_FILES)?;

    let features: Vec<Box<str>> = read_lines_of_words_delim(&feature_file, '\t')
        .map_err(|e| format_error(&label, &feature_file, e))?
        .into_iter()
        .filter_map(|words| {
            words
                .get(config.feature_column)
                .or_else(|| words.first())
                .cloned()
        })
        .collect();

    let barcodes: Vec<Box<str>> = read_lines_of_words_delim(&barcode_file, '\t')
        .map_err(|e| format_error(&label, &barcode_file, e))?
        .into_iter()
        .filter_map(|words| words.first().cloned())
        .collect();

    let mtx = read_mtx_triplets(&mtx_file).map_err(|e| format_error(&label, &mtx_file, e))?;

    let (nrows, ncols, triplets) = match config.orientation {
        MtxOrientation::CellsByFeatures => (mtx.nrows, mtx.ncols, mtx.triplets),
        MtxOrientation::FeaturesByCells => (
            mtx.ncols,
            mtx.nrows,
            mtx.triplets
                .into_iter()
                .map(|(i, j, x)| (j, i, x))
                .collect::<Vec<_>>(),
        ),
    };

    if nrows != barcodes.len() {
        return Err(format_error(
            &label,
            &mtx_file,
            format!(
                "{} cell rows, but {} barcodes in {}",
                nrows,
                barcodes.len(),
                barcode_file.display()
            ),
        ));
    }

    if ncols != features.len() {
        return Err(format_error(
            &label,
            &mtx_file,
            format!(
                "{} feature columns, but {} features in {}",
                ncols,
                features.len(),
                feature_file.display()
            ),
        ));
    }

    let counts =
        csr_from_triplets(nrows, ncols, &triplets).map_err(|e| format_error(&label, &mtx_file, e))?;

    let cells = barcodes
        .iter()
        .map(|b| CellRecord::new(b, &label))
        .collect();

    info!(
        "batch {}: {} cells x {} features, {} non-zeros",
        label,
        nrows,
        ncols,
        counts.nnz()
    );

    Ok(LoadedBatch {
        label,
        counts,
        features,
        cells,
    })
}

/// Load all batches in parallel; the result follows the order of `sources`
pub fn load_batches(
    sources: &[BatchSource],
    config: &LoaderConfig,
    cancel: &CancelToken,
) -> anyhow::Result<Vec<LoadedBatch>> {
    if sources.is_empty() {
        anyhow::bail!("no batch to load");
    }

    sources
        .par_iter()
        .map(|source| {
            cancel.check("load")?;
            load_batch(source, config)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_from_arguments_and_paths() -> anyhow::Result<()> {
        let src: BatchSource = "HB17=data/x".parse()?;
        assert_eq!(&*src.resolve_label()?, "HB17");
        assert_eq!(src.dir, PathBuf::from("data/x"));

        let src: BatchSource = "data/HB30_filtered_feature_bc_matrix".parse()?;
        assert_eq!(&*src.resolve_label()?, "HB30");

        assert!("=data/x".parse::<BatchSource>().is_err());
        Ok(())
    }
}
