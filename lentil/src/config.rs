use crate::errors::PipelineError;
use crate::feature_selection::FeaturePolicy;
use crate::integrate::ReferencePolicy;
use crate::loader::MtxOrientation;
use crate::projection::ProjectionMethod;
use crate::qc::QcRule;

use matrix_util::common_io::{open_buf_reader, open_buf_writer};
use matrix_util::dmatrix_util::dense_bytes;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_DENSE_BYTES: u64 = 8 << 30;

/// Every tunable of a pipeline run. Missing keys in a JSON file fall
/// back to the defaults.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub loader: LoaderConfig,
    pub merge: MergeConfig,
    pub metadata: MetadataConfig,
    pub qc: QcConfig,
    pub preprocess: PreprocessConfig,
    pub anchors: AnchorConfig,
    pub integrate: IntegrateConfig,
    pub checkpoint: CheckpointConfig,
    /// worker threads (all logical CPUs if not set)
    pub num_threads: Option<usize>,
    /// upper bound on any single dense matrix allocation
    pub max_dense_bytes: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    /// column of the feature file holding feature names (0-based);
    /// falls back to the first column on shorter lines
    pub feature_column: usize,
    pub orientation: MtxOrientation,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    /// separators to try, in order of preference
    pub separator_candidates: Vec<char>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    /// delimiters used on top of the merge separator
    pub extra_delimiters: Vec<char>,
    /// names of the fields parsed out of each identifier
    pub fields: Vec<Box<str>>,
    /// regular expression over feature names (case-sensitive)
    pub percent_pattern: Box<str>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct QcConfig {
    pub rules: Vec<QcRule>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    pub scale_factor: f32,
    pub num_variable_features: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AnchorConfig {
    pub num_integration_features: usize,
    pub feature_policy: FeaturePolicy,
    pub projection: ProjectionMethod,
    pub num_components: usize,
    pub knn_anchor: usize,
    pub knn_score: usize,
    pub score_floor: f32,
    /// rescale raw scores between these quantiles
    pub score_quantiles: Option<(f32, f32)>,
    pub seed: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct IntegrateConfig {
    pub reference: ReferencePolicy,
    pub knn_weight: usize,
    pub sd_weight: f32,
    pub num_components: usize,
    pub seed: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    pub dir: Option<PathBuf>,
    pub resume: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            merge: MergeConfig::default(),
            metadata: MetadataConfig::default(),
            qc: QcConfig::default(),
            preprocess: PreprocessConfig::default(),
            anchors: AnchorConfig::default(),
            integrate: IntegrateConfig::default(),
            checkpoint: CheckpointConfig::default(),
            num_threads: None,
            max_dense_bytes: DEFAULT_MAX_DENSE_BYTES,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            feature_column: 1,
            orientation: MtxOrientation::CellsByFeatures,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            separator_candidates: vec!['_', ':', '|', '#', '@', '.', '~'],
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            extra_delimiters: vec![],
            fields: vec!["batch".into(), "barcode".into()],
            percent_pattern: "^MT-".into(),
        }
    }
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            rules: QcRule::defaults(),
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1e4,
            num_variable_features: 2000,
        }
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            num_integration_features: 2000,
            feature_policy: FeaturePolicy::Frequent,
            projection: ProjectionMethod::Cca,
            num_components: 30,
            knn_anchor: 5,
            knn_score: 30,
            score_floor: 0.0,
            score_quantiles: Some((0.01, 0.9)),
            seed: 42,
        }
    }
}

impl Default for IntegrateConfig {
    fn default() -> Self {
        Self {
            reference: ReferencePolicy::Largest,
            knn_weight: 100,
            sd_weight: 1.0,
            num_components: 30,
            seed: 42,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: None,
            resume: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(file: impl AsRef<Path>) -> anyhow::Result<Self> {
        let reader = open_buf_reader(file.as_ref())?;
        serde_json::from_reader(reader).map_err(|e| {
            anyhow::anyhow!("invalid configuration {}: {}", file.as_ref().display(), e)
        })
    }

    pub fn to_json_file(&self, file: impl AsRef<Path>) -> anyhow::Result<()> {
        let mut writer = open_buf_writer(file)?;
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn memory_budget(&self) -> MemoryBudget {
        MemoryBudget {
            limit_bytes: self.max_dense_bytes,
        }
    }
}

/// Guards dense allocations against the configured limit
#[derive(Clone, Copy, Debug)]
pub struct MemoryBudget {
    pub limit_bytes: u64,
}

impl MemoryBudget {
    pub fn unlimited() -> Self {
        Self {
            limit_bytes: u64::MAX,
        }
    }

    /// Fail with `ResourceExhausted` if a dense `nrows x ncols` matrix
    /// of `f32` would not fit
    pub fn check_dense(
        &self,
        stage: &'static str,
        what: impl FnOnce() -> String,
        nrows: usize,
        ncols: usize,
    ) -> anyhow::Result<()> {
        let requested_bytes = dense_bytes(nrows, ncols);
        if requested_bytes > self.limit_bytes {
            return Err(PipelineError::ResourceExhausted {
                stage,
                what: format!("{} [{} x {}]", what(), nrows, ncols),
                requested_bytes,
                limit_bytes: self.limit_bytes,
            }
            .into());
        }
        Ok(())
    }
}
