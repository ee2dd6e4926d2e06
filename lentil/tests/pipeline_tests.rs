use lentil::checkpoint::*;
use lentil::config::PipelineConfig;
use lentil::errors::{pipeline_error, PipelineError};
use lentil::loader::{BatchSource, MtxOrientation};
use lentil::output::write_outcome;
use lentil::preprocess::normalize_counts;
use lentil::simulate::{write_simulated_batches, SimArgs};
use lentil::{CancelToken, Pipeline, PipelineOutcome};
use matrix_util::common_io::read_lines;
use matrix_util::sparse_util::*;
use std::io::{Read, Write};
use std::path::Path;

/// Thresholds dropping exactly the low-depth cells of the simulation
fn test_config(checkpoint_dir: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let mut cfg = PipelineConfig::default();
    cfg.qc.rules = vec![
        "total_count>200".parse()?,
        "feature_count>0".parse()?,
        "percent_pattern<101".parse()?,
    ];
    cfg.anchors.num_integration_features = 30;
    cfg.anchors.num_components = 10;
    cfg.integrate.num_components = 10;
    cfg.integrate.knn_weight = 20;
    cfg.num_threads = Some(2);
    cfg.checkpoint.dir = checkpoint_dir.map(|d| d.to_path_buf());
    Ok(cfg)
}

fn simulate(dir: &Path) -> anyhow::Result<Vec<BatchSource>> {
    write_simulated_batches(&SimArgs::default(), dir)
}

fn rows_of(outcome: &PipelineOutcome, batch: &str) -> Vec<usize> {
    outcome
        .dataset
        .cells
        .iter()
        .enumerate()
        .filter(|(_, c)| &*c.batch == batch)
        .map(|(i, _)| i)
        .collect()
}

fn kind_of(err: &anyhow::Error) -> Option<&'static str> {
    pipeline_error(err).map(|e| e.kind())
}

#[test]
fn three_simulated_batches() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let sources = simulate(&tmp.path().join("data"))?;
    assert_eq!(sources.len(), 3);

    let outcome = Pipeline::new(test_config(None)?).run(&sources)?;
    let data = &outcome.dataset;
    let integrated = &outcome.integrated;

    // 10 low-depth cells go from each batch
    assert_eq!(data.num_cells(), 340);
    let qc = outcome.qc.as_ref().map(|q| {
        q.batches
            .iter()
            .map(|b| (b.batch.to_string(), b.before, b.after))
            .collect::<Vec<_>>()
    });
    assert_eq!(
        qc,
        Some(vec![
            ("batch1".to_string(), 100, 90),
            ("batch2".to_string(), 150, 140),
            ("batch3".to_string(), 120, 110),
        ])
    );
    assert_eq!(outcome.resumed_from, None);

    // one row per retained cell, every feature kept
    assert_eq!(integrated.values.nrows(), 340);
    assert_eq!(integrated.values.ncols(), 50);
    assert_eq!(data.num_features(), 50);

    let mut ids = data.cell_ids();
    assert!(ids[0].starts_with("batch1_"));
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 340);

    for cell in data.cells.iter() {
        let m = cell.metrics.as_ref().map(|m| *m);
        assert!(m.map(|m| m.total_count > 200.0).unwrap_or(false));
        assert_eq!(cell.field("batch"), Some(&*cell.batch));
    }

    // the largest batch is the reference
    assert_eq!(&*integrated.reference, "batch2");
    let corrected = integrated
        .transforms
        .iter()
        .map(|t| t.batch.to_string())
        .collect::<Vec<_>>();
    assert_eq!(corrected, vec!["batch1", "batch3"]);
    assert_eq!(integrated.features.len(), 30);
    assert_eq!(integrated.anchors.len(), 3);
    for t in integrated.transforms.iter() {
        assert!(t.num_anchors() > 0);
        assert!(t.anchor_scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    let shared = data
        .features
        .iter()
        .map(|f| integrated.features.contains(f))
        .collect::<Vec<_>>();

    // reference rows are only normalized
    let ref_rows = rows_of(&outcome, "batch2");
    let expected = normalize_counts(&select_csr_rows(&data.counts, &ref_rows)?, 1e4)?;
    assert_eq!(select_csr_rows(&integrated.values, &ref_rows)?, expected);

    // query rows change on shared features only
    for batch in ["batch1", "batch3"] {
        let rows = rows_of(&outcome, batch);
        let normalized = normalize_counts(&select_csr_rows(&data.counts, &rows)?, 1e4)?;
        let after = select_csr_rows(&integrated.values, &rows)?;

        let keep = |mat: &CsrMat, on_shared: bool| {
            csr_to_triplets(mat)
                .into_iter()
                .filter(|&(_, j, _)| shared[j] == on_shared)
                .collect::<Vec<_>>()
        };
        assert_eq!(keep(&after, false), keep(&normalized, false));
        assert_ne!(keep(&after, true), keep(&normalized, true));
    }

    // same input, same result
    let again = Pipeline::new(test_config(None)?).run(&sources)?;
    assert_eq!(again.dataset, outcome.dataset);
    assert_eq!(again.integrated, outcome.integrated);
    Ok(())
}

#[test]
fn both_matrix_orientations_give_the_same_dataset() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let rows_first = simulate(&tmp.path().join("cells"))?;
    let cols_first = write_simulated_batches(
        &SimArgs {
            orientation: MtxOrientation::FeaturesByCells,
            ..SimArgs::default()
        },
        tmp.path().join("features"),
    )?;

    let (a, _) = Pipeline::new(test_config(None)?).filtered_dataset(&rows_first)?;

    let mut cfg = test_config(None)?;
    cfg.loader.orientation = MtxOrientation::FeaturesByCells;
    let (b, _) = Pipeline::new(cfg).filtered_dataset(&cols_first)?;

    assert_eq!(a, b);
    Ok(())
}

#[test]
fn a_single_batch_passes_through() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let sources = simulate(tmp.path())?;

    let outcome = Pipeline::new(test_config(None)?).run(&sources[..1])?;
    assert_eq!(outcome.dataset.num_cells(), 90);
    assert_eq!(&*outcome.integrated.reference, "batch1");
    assert!(outcome.integrated.transforms.is_empty());
    assert_eq!(
        outcome.integrated.values,
        normalize_counts(&outcome.dataset.counts, 1e4)?
    );
    Ok(())
}

#[test]
fn checkpoints_are_written_and_resumed() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let sources = simulate(&tmp.path().join("data"))?;
    let ckpt_dir = tmp.path().join("checkpoints");
    let store = CheckpointStore::new(&ckpt_dir);

    let first = Pipeline::new(test_config(Some(&ckpt_dir))?).run(&sources)?;
    assert!(store.path(Stage::PostFilter).is_file());
    assert!(store.path(Stage::PostIntegration).is_file());

    let (stage, state) = read_checkpoint(store.path(Stage::PostIntegration))?;
    assert_eq!(stage, Stage::PostIntegration);
    assert_eq!(state.dataset, first.dataset);
    assert_eq!(state.integrated.as_ref(), Some(&first.integrated));

    let summary = summarize_checkpoint(store.path(Stage::PostFilter))?;
    assert_eq!(summary["stage"], "post-filter");
    assert_eq!(summary["cells"], 340);

    // a leftover temporary file does not get in the way
    std::fs::write(ckpt_dir.join(".tmpXXXXXX"), b"partial")?;

    let resumed = Pipeline::new(test_config(Some(&ckpt_dir))?).run(&sources)?;
    assert_eq!(resumed.resumed_from, Some(Stage::PostIntegration));
    assert!(resumed.qc.is_none());
    assert_eq!(resumed.dataset, first.dataset);
    assert_eq!(resumed.integrated, first.integrated);

    // without the integration, the run picks up after filtering
    std::fs::remove_file(store.path(Stage::PostIntegration))?;
    let refit = Pipeline::new(test_config(Some(&ckpt_dir))?).run(&sources)?;
    assert_eq!(refit.resumed_from, Some(Stage::PostFilter));
    assert_eq!(refit.integrated, first.integrated);
    assert!(store.path(Stage::PostIntegration).is_file());

    // opting out of resuming starts over
    let mut cfg = test_config(Some(&ckpt_dir))?;
    cfg.checkpoint.resume = false;
    let fresh = Pipeline::new(cfg).run(&sources)?;
    assert_eq!(fresh.resumed_from, None);
    assert!(fresh.qc.is_some());
    Ok(())
}

#[test]
fn incompatible_checkpoints_are_format_errors() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let sources = simulate(&tmp.path().join("data"))?;
    let ckpt_dir = tmp.path().join("checkpoints");
    let store = CheckpointStore::new(&ckpt_dir);

    let pipeline = Pipeline::new(test_config(Some(&ckpt_dir))?);
    let (dataset, _) = pipeline.filtered_dataset(&sources)?;
    let state = PipelineState {
        dataset,
        integrated: None,
    };
    let file = store.save(Stage::PostFilter, &state)?;
    assert_eq!(store.restore(Stage::PostFilter)?, Some(state.clone()));
    assert_eq!(store.restore(Stage::PostIntegration)?, None);

    // bump the version
    let mut json = String::new();
    flate2::read::GzDecoder::new(std::fs::File::open(&file)?).read_to_string(&mut json)?;
    let mut doc: serde_json::Value = serde_json::from_str(&json)?;
    doc["format_version"] = serde_json::json!(FORMAT_VERSION + 1);
    let mut enc = flate2::write::GzEncoder::new(
        std::fs::File::create(&file)?,
        flate2::Compression::default(),
    );
    enc.write_all(serde_json::to_string(&doc)?.as_bytes())?;
    enc.finish()?;

    let err = store.restore(Stage::PostFilter).unwrap_err();
    assert_eq!(kind_of(&err), Some("FormatError"));
    let err = pipeline.run(&sources).unwrap_err();
    assert_eq!(kind_of(&err), Some("FormatError"));

    // a post-filter document saved under the integration name
    store.save(Stage::PostFilter, &state)?;
    std::fs::copy(store.path(Stage::PostFilter), store.path(Stage::PostIntegration))?;
    let err = store.restore(Stage::PostIntegration).unwrap_err();
    assert_eq!(kind_of(&err), Some("FormatError"));

    // not a checkpoint at all
    std::fs::write(store.path(Stage::PostFilter), b"garbage")?;
    let err = read_checkpoint(store.path(Stage::PostFilter)).unwrap_err();
    assert_eq!(kind_of(&err), Some("FormatError"));
    Ok(())
}

#[test]
fn a_cancelled_run_stops() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let sources = simulate(tmp.path())?;

    let cancel = CancelToken::new();
    let pipeline = Pipeline::new(test_config(None)?).with_cancel_token(cancel.clone());
    assert!(!pipeline.cancel_token().is_cancelled());
    cancel.cancel();
    assert!(pipeline.cancel_token().is_cancelled());

    let err = pipeline.run(&sources).unwrap_err();
    match pipeline_error(&err) {
        Some(PipelineError::Cancelled { stage }) => assert_eq!(*stage, "load"),
        other => panic!("unexpected: {:?}", other),
    }
    Ok(())
}

#[test]
fn an_unknown_reference_is_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let sources = simulate(tmp.path())?;
    let mut cfg = test_config(None)?;
    cfg.integrate.reference = lentil::integrate::ReferencePolicy::Batch("batch9".into());
    assert!(Pipeline::new(cfg).run(&sources).is_err());

    let mut cfg = test_config(None)?;
    cfg.integrate.reference = lentil::integrate::ReferencePolicy::Batch("batch3".into());
    let outcome = Pipeline::new(cfg).run(&sources)?;
    assert_eq!(&*outcome.integrated.reference, "batch3");
    Ok(())
}

#[test]
fn outputs_and_configuration_files() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let sources = simulate(&tmp.path().join("data"))?;
    let config = test_config(None)?;
    let outcome = Pipeline::new(config.clone()).run(&sources)?;

    let prefix = tmp.path().join("out").join("run");
    let files = write_outcome(&outcome, &config, &prefix.to_string_lossy())?;

    let cells = read_lines(&*files.cells)?;
    assert_eq!(cells.len(), 341);
    assert!(cells[0].starts_with("id\tbatch\tbatch\tbarcode"));
    assert_eq!(read_lines(&*files.features)?.len(), 50);
    assert_eq!(read_lines(&*files.integration_features)?.len(), 30);

    let mut anchors = String::new();
    std::fs::File::open(&*files.anchors)?.read_to_string(&mut anchors)?;
    let anchors: serde_json::Value = serde_json::from_str(&anchors)?;
    assert_eq!(anchors["pairs"].as_array().map(|x| x.len()), Some(3));

    // the written configuration reads back the same
    let reread = PipelineConfig::from_json_file(&*files.config)?;
    assert_eq!(reread, config);
    Ok(())
}
