use crate::anchors::{find_anchors, AnchorSet};
use crate::cancel::CancelToken;
use crate::checkpoint::{CheckpointStore, PipelineState, Stage};
use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::feature_selection::select_integration_features;
use crate::integrate::{choose_reference, integrate_batches, IntegratedData};
use crate::loader::{load_batches, BatchSource};
use crate::merging::merge_batches;
use crate::metadata::derive_metadata;
use crate::preprocess::{preprocess_batches, NormalizedBatch};
use crate::qc::{filter_cells, QcReport};

use log::info;
use matrix_util::sparse_util::vstack_csr;

/// Everything a run produces
#[derive(Clone, Debug)]
pub struct PipelineOutcome {
    pub dataset: Dataset,
    pub integrated: IntegratedData,
    /// absent when the filtered dataset came from a checkpoint
    pub qc: Option<QcReport>,
    pub resumed_from: Option<Stage>,
}

impl PipelineOutcome {
    /// Anchor counts per batch pair
    pub fn anchor_summary(&self) -> serde_json::Value {
        AnchorSet {
            features: self.integrated.features.clone(),
            pairs: self.integrated.anchors.clone(),
        }
        .summary()
    }
}

/// Runs the stages in order inside a bounded worker pool, saving and
/// resuming checkpoints when a checkpoint directory is configured
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn checkpoints(&self) -> Option<CheckpointStore> {
        self.config.checkpoint.dir.as_ref().map(CheckpointStore::new)
    }

    pub fn run(&self, sources: &[BatchSource]) -> anyhow::Result<PipelineOutcome> {
        let num_threads = self.config.num_threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        info!("running with {} threads", num_threads);
        pool.install(|| self.run_stages(sources))
    }

    fn run_stages(&self, sources: &[BatchSource]) -> anyhow::Result<PipelineOutcome> {
        let store = self.checkpoints();
        let resume = self.config.checkpoint.resume;

        if let (Some(store), true) = (store.as_ref(), resume) {
            if let Some(state) = store.restore(Stage::PostIntegration)? {
                if let Some(integrated) = state.integrated {
                    return Ok(PipelineOutcome {
                        dataset: state.dataset,
                        integrated,
                        qc: None,
                        resumed_from: Some(Stage::PostIntegration),
                    });
                }
            }
        }

        let restored = match (store.as_ref(), resume) {
            (Some(store), true) => store.restore(Stage::PostFilter)?,
            _ => None,
        };

        let (dataset, qc, resumed_from) = match restored {
            Some(state) => (state.dataset, None, Some(Stage::PostFilter)),
            None => {
                let (dataset, qc) = self.filtered_dataset(sources)?;
                if let Some(store) = store.as_ref() {
                    let state = PipelineState {
                        dataset,
                        integrated: None,
                    };
                    store.save(Stage::PostFilter, &state)?;
                    (state.dataset, Some(qc), None)
                } else {
                    (dataset, Some(qc), None)
                }
            }
        };

        self.cancel.check("integrate")?;
        let integrated = self.integrate(&dataset)?;

        let state = PipelineState {
            dataset,
            integrated: Some(integrated),
        };
        if let Some(store) = store.as_ref() {
            store.save(Stage::PostIntegration, &state)?;
        }

        let PipelineState {
            dataset,
            integrated,
        } = state;

        Ok(PipelineOutcome {
            dataset,
            integrated: integrated.ok_or_else(|| anyhow::anyhow!("integration missing"))?,
            qc,
            resumed_from,
        })
    }

    /// Load, merge, derive metadata and filter
    pub fn filtered_dataset(&self, sources: &[BatchSource]) -> anyhow::Result<(Dataset, QcReport)> {
        let cfg = &self.config;

        self.cancel.check("load")?;
        let loaded = load_batches(sources, &cfg.loader, &self.cancel)?;

        self.cancel.check("merge")?;
        let merged = merge_batches(loaded, &cfg.merge)?;

        self.cancel.check("metadata")?;
        let derived = derive_metadata(merged, &cfg.metadata)?;

        self.cancel.check("qc")?;
        filter_cells(&derived, &cfg.qc.rules)
    }

    /// Preprocess per batch, find anchors and correct towards the
    /// reference. A single batch comes back normalized, uncorrected.
    pub fn integrate(&self, dataset: &Dataset) -> anyhow::Result<IntegratedData> {
        let cfg = &self.config;
        let budget = cfg.memory_budget();

        self.cancel.check("preprocess")?;
        let batches = preprocess_batches(dataset, &cfg.preprocess, &self.cancel)?;

        self.cancel.check("features")?;
        let features = select_integration_features(
            &batches,
            cfg.anchors.num_integration_features,
            cfg.anchors.feature_policy,
        )?;

        if batches.len() < 2 {
            return passthrough(dataset, &batches, features, cfg);
        }

        self.cancel.check("anchors")?;
        let anchors = find_anchors(
            &batches,
            &dataset.features,
            &features,
            &cfg.anchors,
            &budget,
            &self.cancel,
        )?;

        self.cancel.check("integrate")?;
        integrate_batches(
            &batches,
            &dataset.features,
            &anchors,
            &cfg.integrate,
            &budget,
            &self.cancel,
        )
    }
}

fn passthrough(
    dataset: &Dataset,
    batches: &[NormalizedBatch],
    features: Vec<Box<str>>,
    cfg: &PipelineConfig,
) -> anyhow::Result<IntegratedData> {
    let r = choose_reference(batches, &cfg.integrate.reference)?;
    let reference = batches[r].label.clone();
    info!("single batch {}: nothing to integrate", reference);

    let values = vstack_csr(&batches.iter().map(|b| &b.data).collect::<Vec<_>>())?;
    if values.nrows() != dataset.num_cells() {
        anyhow::bail!(
            "{} normalized rows for {} cells",
            values.nrows(),
            dataset.num_cells()
        );
    }

    Ok(IntegratedData {
        values,
        features,
        reference,
        transforms: vec![],
        anchors: vec![],
    })
}
