use clap::Args;
use lentil::config::PipelineConfig;
use lentil::errors::pipeline_error;
use lentil::feature_selection::FeaturePolicy;
use lentil::integrate::ReferencePolicy;
use lentil::loader::{BatchSource, MtxOrientation};
use lentil::output::write_outcome;
use lentil::projection::ProjectionMethod;
use lentil::qc::QcRule;
use lentil::Pipeline;
use log::{error, info};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(
        required = true,
        help = "Batch directories (`dir` or `label=dir`)",
        long_help = "Batch directories, each holding features, barcodes\n\
		     and a MatrixMarket matrix. Without `label=`, the batch\n\
		     label is the directory name."
    )]
    batches: Vec<BatchSource>,

    #[arg(long, short, required = true, help = "Output header")]
    out: Box<str>,

    #[arg(long, short, help = "Configuration file (JSON)")]
    config: Option<Box<str>>,

    #[arg(
        long,
        help = "Quality rules, replacing the configured ones",
        long_help = "Quality rules such as `total_count>800`,\n\
		     `feature_count>200` or `percent_pattern<10`.\n\
		     A cell is kept only if it satisfies all of them."
    )]
    qc_rule: Option<Vec<QcRule>>,

    #[arg(long, help = "Feature pattern for the percentage metric (regex)")]
    percent_pattern: Option<Box<str>>,

    #[arg(long, value_delimiter(','), help = "Names of the identifier fields")]
    fields: Option<Vec<Box<str>>>,

    #[arg(long, value_delimiter(','), help = "Extra identifier delimiters")]
    delimiters: Option<Vec<char>>,

    #[arg(long, value_enum, help = "Matrix orientation of the input files")]
    orientation: Option<MtxOrientation>,

    #[arg(long, help = "Column of the feature files holding names (0-based)")]
    feature_column: Option<usize>,

    #[arg(long, help = "Number of variable features per batch")]
    num_variable_features: Option<usize>,

    #[arg(long, help = "Number of integration features")]
    num_features: Option<usize>,

    #[arg(long, value_enum, help = "Integration feature policy")]
    feature_policy: Option<FeaturePolicy>,

    #[arg(long, value_enum, help = "Shared projection for anchor search")]
    projection: Option<ProjectionMethod>,

    #[arg(long, help = "Number of projection/PCA components")]
    num_components: Option<usize>,

    #[arg(long, help = "Nearest neighbours for anchors")]
    knn_anchor: Option<usize>,

    #[arg(long, help = "Nearest neighbours for anchor scores")]
    knn_score: Option<usize>,

    #[arg(long, help = "Nearest anchors used to correct a cell")]
    knn_weight: Option<usize>,

    #[arg(long, help = "Discard anchors scoring below this")]
    score_floor: Option<f32>,

    #[arg(long, help = "Reference batch label (default: the largest batch)")]
    reference: Option<Box<str>>,

    #[arg(long, help = "Checkpoint directory")]
    checkpoint_dir: Option<Box<str>>,

    #[arg(long, default_value_t = false, help = "Ignore existing checkpoints")]
    no_resume: bool,

    #[arg(long, help = "Maximum number of threads")]
    threads: Option<usize>,

    #[arg(long, help = "Upper bound of a dense matrix in bytes")]
    max_dense_bytes: Option<u64>,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

impl RunArgs {
    fn effective_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut cfg = match self.config.as_deref() {
            Some(file) => PipelineConfig::from_json_file(file)?,
            None => PipelineConfig::default(),
        };

        if let Some(rules) = self.qc_rule.as_ref() {
            cfg.qc.rules = rules.clone();
        }
        if let Some(x) = self.percent_pattern.as_ref() {
            cfg.metadata.percent_pattern = x.clone();
        }
        if let Some(x) = self.fields.as_ref() {
            cfg.metadata.fields = x.clone();
        }
        if let Some(x) = self.delimiters.as_ref() {
            cfg.metadata.extra_delimiters = x.clone();
        }
        if let Some(x) = self.orientation {
            cfg.loader.orientation = x;
        }
        if let Some(x) = self.feature_column {
            cfg.loader.feature_column = x;
        }
        if let Some(x) = self.num_variable_features {
            cfg.preprocess.num_variable_features = x;
        }
        if let Some(x) = self.num_features {
            cfg.anchors.num_integration_features = x;
        }
        if let Some(x) = self.feature_policy {
            cfg.anchors.feature_policy = x;
        }
        if let Some(x) = self.projection {
            cfg.anchors.projection = x;
        }
        if let Some(x) = self.num_components {
            cfg.anchors.num_components = x;
            cfg.integrate.num_components = x;
        }
        if let Some(x) = self.knn_anchor {
            cfg.anchors.knn_anchor = x;
        }
        if let Some(x) = self.knn_score {
            cfg.anchors.knn_score = x;
        }
        if let Some(x) = self.knn_weight {
            cfg.integrate.knn_weight = x;
        }
        if let Some(x) = self.score_floor {
            cfg.anchors.score_floor = x;
        }
        if let Some(x) = self.reference.as_ref() {
            cfg.integrate.reference = ReferencePolicy::Batch(x.clone());
        }
        if let Some(x) = self.checkpoint_dir.as_deref() {
            cfg.checkpoint.dir = Some(x.into());
        }
        if self.no_resume {
            cfg.checkpoint.resume = false;
        }
        if let Some(x) = self.threads {
            cfg.num_threads = Some(x);
        }
        if let Some(x) = self.max_dense_bytes {
            cfg.max_dense_bytes = x;
        }
        cfg.anchors.seed = self.seed;
        cfg.integrate.seed = self.seed;
        Ok(cfg)
    }
}

pub fn run_integrate(args: &RunArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = args.effective_config()?;
    let pipeline = Pipeline::new(config);

    let outcome = match pipeline.run(&args.batches) {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(e) = pipeline_error(&err) {
                error!("{}: {}", e.kind(), e);
            }
            return Err(err);
        }
    };

    if let Some(stage) = outcome.resumed_from {
        info!("resumed from checkpoint {}", stage.name());
    }

    write_outcome(&outcome, pipeline.config(), &args.out)?;
    info!("done");
    Ok(())
}
