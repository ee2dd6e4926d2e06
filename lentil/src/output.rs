use crate::config::PipelineConfig;
use crate::pipeline::PipelineOutcome;

use log::info;
use matrix_util::common_io::{open_buf_writer, write_lines};
use matrix_util::mtx_io::write_mtx_triplets;
use matrix_util::sparse_util::csr_to_triplets;
use std::io::Write;

/// Files written for an output prefix
pub struct OutputFiles {
    pub matrix: Box<str>,
    pub cells: Box<str>,
    pub features: Box<str>,
    pub integration_features: Box<str>,
    pub anchors: Box<str>,
    pub config: Box<str>,
}

impl OutputFiles {
    pub fn new(prefix: &str) -> Self {
        Self {
            matrix: format!("{}.integrated.mtx.gz", prefix).into(),
            cells: format!("{}.cells.tsv.gz", prefix).into(),
            features: format!("{}.features.gz", prefix).into(),
            integration_features: format!("{}.integration_features.gz", prefix).into(),
            anchors: format!("{}.anchors.json", prefix).into(),
            config: format!("{}.config.json", prefix).into(),
        }
    }
}

/// One line per cell: identifier, batch, parsed fields and metrics,
/// after a header line
pub fn cell_table(outcome: &PipelineOutcome) -> Vec<Box<str>> {
    let cells = &outcome.dataset.cells;
    let field_names = cells
        .first()
        .map(|c| c.fields.iter().map(|(k, _)| k.to_string()).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut header = vec!["id".to_string(), "batch".to_string()];
    header.extend(field_names);
    header.extend(["total_count", "feature_count", "percent_pattern"].map(String::from));

    let mut lines: Vec<Box<str>> = vec![header.join("\t").into()];
    lines.extend(cells.iter().map(|c| {
        let mut words = vec![c.id.to_string(), c.batch.to_string()];
        words.extend(c.fields.iter().map(|(_, v)| v.to_string()));
        match c.metrics.as_ref() {
            Some(m) => words.extend([
                m.total_count.to_string(),
                m.feature_count.to_string(),
                m.percent_pattern.to_string(),
            ]),
            None => words.extend(["NA", "NA", "NA"].map(String::from)),
        }
        words.join("\t").into()
    }));
    lines
}

/// Write the integrated matrix and its annotations under `prefix`
pub fn write_outcome(
    outcome: &PipelineOutcome,
    config: &PipelineConfig,
    prefix: &str,
) -> anyhow::Result<OutputFiles> {
    let files = OutputFiles::new(prefix);
    let values = &outcome.integrated.values;

    write_mtx_triplets(
        &csr_to_triplets(values),
        values.nrows(),
        values.ncols(),
        &*files.matrix,
    )?;
    write_lines(&cell_table(outcome), &*files.cells)?;
    write_lines(&outcome.dataset.features, &*files.features)?;
    write_lines(&outcome.integrated.features, &*files.integration_features)?;

    let mut anchors = open_buf_writer(&*files.anchors)?;
    serde_json::to_writer_pretty(&mut anchors, &outcome.anchor_summary())?;
    anchors.flush()?;

    config.to_json_file(&*files.config)?;

    info!(
        "wrote {} x {} integrated matrix: {}",
        values.nrows(),
        values.ncols(),
        files.matrix
    );
    Ok(files)
}
