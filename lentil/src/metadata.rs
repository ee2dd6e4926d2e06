use crate::config::MetadataConfig;
use crate::dataset::{CellMetrics, CellRecord, Dataset};
use crate::errors::PipelineError;

use log::info;
use rayon::prelude::*;
use regex::Regex;

/// Splits identifiers into named fields and measures each cell
pub struct MetadataDeriver {
    delimiters: Vec<char>,
    fields: Vec<Box<str>>,
    pattern: Regex,
}

impl MetadataDeriver {
    /// * `config` - field names, extra delimiters and feature pattern
    /// * `separator` - the separator chosen at merge time
    pub fn new(config: &MetadataConfig, separator: char) -> anyhow::Result<Self> {
        let pattern = Regex::new(&config.percent_pattern).map_err(|e| {
            anyhow::anyhow!("invalid feature pattern `{}`: {}", config.percent_pattern, e)
        })?;

        if config.fields.is_empty() {
            anyhow::bail!("at least one metadata field name is needed");
        }

        let mut delimiters = vec![separator];
        delimiters.extend(config.extra_delimiters.iter().filter(|&&c| c != separator));

        Ok(Self {
            delimiters,
            fields: config.fields.clone(),
            pattern,
        })
    }

    pub fn split_identifier<'a>(&self, id: &'a str) -> Vec<&'a str> {
        id.split(|c| self.delimiters.contains(&c)).collect()
    }

    fn parse_fields(&self, cell: &CellRecord) -> anyhow::Result<Vec<(Box<str>, Box<str>)>> {
        let words = self.split_identifier(&cell.id);
        if words.len() != self.fields.len() {
            return Err(PipelineError::MetadataParse {
                batch: cell.batch.clone(),
                identifier: cell.id.clone(),
                expected: self.fields.len(),
                found: words.len(),
                fields: self.fields.join(","),
            }
            .into());
        }
        Ok(self
            .fields
            .iter()
            .cloned()
            .zip(words.into_iter().map(Box::from))
            .collect())
    }

    /// Which features count towards the pattern percentage
    pub fn pattern_mask(&self, features: &[Box<str>]) -> Vec<bool> {
        features.iter().map(|f| self.pattern.is_match(f)).collect()
    }

    /// Append parsed fields and metrics to every cell; cells keep
    /// their order
    pub fn derive(&self, data: Dataset) -> anyhow::Result<Dataset> {
        let mask = self.pattern_mask(&data.features);
        info!(
            "{} of {} features match `{}`",
            mask.iter().filter(|&&m| m).count(),
            mask.len(),
            self.pattern.as_str()
        );

        let counts = &data.counts;
        let cells = data
            .cells
            .par_iter()
            .enumerate()
            .map(|(i, cell)| {
                let fields = self.parse_fields(cell)?;
                let row = counts.row(i);
                let mut total_count = 0_f32;
                let mut pattern_count = 0_f32;
                let mut feature_count = 0_usize;
                for (&j, &x) in row.col_indices().iter().zip(row.values()) {
                    total_count += x;
                    if x != 0.0 {
                        feature_count += 1;
                    }
                    if mask[j] {
                        pattern_count += x;
                    }
                }
                let percent_pattern = if total_count > 0.0 {
                    100.0 * pattern_count / total_count
                } else {
                    0.0
                };

                let mut fields_out = cell.fields.clone();
                fields_out.extend(fields);

                Ok(CellRecord {
                    fields: fields_out,
                    metrics: Some(CellMetrics {
                        total_count,
                        feature_count,
                        percent_pattern,
                    }),
                    ..cell.clone()
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Dataset { cells, ..data })
    }
}

/// Parse identifier fields and compute per-cell metrics
pub fn derive_metadata(data: Dataset, config: &MetadataConfig) -> anyhow::Result<Dataset> {
    MetadataDeriver::new(config, data.separator)?.derive(data)
}
