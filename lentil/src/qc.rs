use crate::dataset::{CellMetrics, CellRecord, Dataset};

use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum QcMetric {
    TotalCount,
    FeatureCount,
    PercentPattern,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Comparison {
    Greater,
    Less,
}

/// A strict threshold predicate on one metric
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct QcRule {
    pub metric: QcMetric,
    pub comparison: Comparison,
    pub threshold: f32,
}

impl QcMetric {
    pub fn name(&self) -> &'static str {
        match self {
            QcMetric::TotalCount => "total_count",
            QcMetric::FeatureCount => "feature_count",
            QcMetric::PercentPattern => "percent_pattern",
        }
    }

    pub fn value(&self, m: &CellMetrics) -> f32 {
        match self {
            QcMetric::TotalCount => m.total_count,
            QcMetric::FeatureCount => m.feature_count as f32,
            QcMetric::PercentPattern => m.percent_pattern,
        }
    }
}

impl QcRule {
    pub fn new(metric: QcMetric, comparison: Comparison, threshold: f32) -> Self {
        Self {
            metric,
            comparison,
            threshold,
        }
    }

    /// total > 800, features > 200, percentage < 10
    pub fn defaults() -> Vec<QcRule> {
        vec![
            QcRule::new(QcMetric::TotalCount, Comparison::Greater, 800.0),
            QcRule::new(QcMetric::FeatureCount, Comparison::Greater, 200.0),
            QcRule::new(QcMetric::PercentPattern, Comparison::Less, 10.0),
        ]
    }

    /// NaN never passes
    pub fn holds(&self, m: &CellMetrics) -> bool {
        let x = self.metric.value(m);
        match self.comparison {
            Comparison::Greater => x > self.threshold,
            Comparison::Less => x < self.threshold,
        }
    }
}

impl fmt::Display for QcRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.comparison {
            Comparison::Greater => '>',
            Comparison::Less => '<',
        };
        write!(f, "{}{}{}", self.metric.name(), op, self.threshold)
    }
}

/// Parses rules such as `total_count>800` or `percent_pattern<10`
impl FromStr for QcRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (pos, comparison) = s
            .char_indices()
            .find_map(|(i, c)| match c {
                '>' => Some((i, Comparison::Greater)),
                '<' => Some((i, Comparison::Less)),
                _ => None,
            })
            .ok_or_else(|| anyhow::anyhow!("no `>` or `<` in rule `{}`", s))?;

        let metric = match s[..pos].trim() {
            "total_count" | "total" => QcMetric::TotalCount,
            "feature_count" | "features" => QcMetric::FeatureCount,
            "percent_pattern" | "percent" => QcMetric::PercentPattern,
            other => anyhow::bail!("unknown metric `{}` in rule `{}`", other, s),
        };

        let threshold = s[pos + 1..]
            .trim()
            .parse::<f32>()
            .map_err(|e| anyhow::anyhow!("invalid threshold in rule `{}`: {}", s, e))?;

        Ok(QcRule::new(metric, comparison, threshold))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BatchQc {
    pub batch: Box<str>,
    pub before: usize,
    pub after: usize,
}

/// Cell counts before and after filtering
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QcReport {
    pub before: usize,
    pub after: usize,
    pub batches: Vec<BatchQc>,
}

/// Indices of the cells satisfying every rule, in order
pub fn retained_cells(cells: &[CellRecord], rules: &[QcRule]) -> anyhow::Result<Vec<usize>> {
    let mut ret = Vec::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        let Some(metrics) = cell.metrics.as_ref() else {
            anyhow::bail!(
                "cell `{}` has no metrics; derive metadata before filtering",
                cell.id
            );
        };
        if rules.iter().all(|r| r.holds(metrics)) {
            ret.push(i);
        }
    }
    Ok(ret)
}

/// Keep the cells passing all rules
pub fn filter_cells(data: &Dataset, rules: &[QcRule]) -> anyhow::Result<(Dataset, QcReport)> {
    let keep = retained_cells(&data.cells, rules)?;
    let filtered = data.subset_cells(&keep)?;

    let count_by = |d: &Dataset, label: &str| {
        d.cells.iter().filter(|c| &*c.batch == label).count()
    };

    let batches = data
        .batches
        .iter()
        .map(|b| BatchQc {
            batch: b.clone(),
            before: count_by(data, &**b),
            after: count_by(&filtered, &**b),
        })
        .collect::<Vec<_>>();

    let rules_str = rules.iter().map(|r| r.to_string()).collect::<Vec<_>>();
    info!(
        "quality filter [{}]: {} -> {} cells",
        rules_str.join(", "),
        data.num_cells(),
        filtered.num_cells()
    );
    for b in batches.iter() {
        info!("  batch {}: {} -> {} cells", b.batch, b.before, b.after);
    }

    let report = QcReport {
        before: data.num_cells(),
        after: filtered.num_cells(),
        batches,
    };
    Ok((filtered, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_print_rules() -> anyhow::Result<()> {
        let rule: QcRule = "total_count>800".parse()?;
        assert_eq!(
            rule,
            QcRule::new(QcMetric::TotalCount, Comparison::Greater, 800.0)
        );
        assert_eq!(rule.to_string(), "total_count>800");

        let rule: QcRule = "percent < 10".parse()?;
        assert_eq!(rule.metric, QcMetric::PercentPattern);
        assert_eq!(rule.comparison, Comparison::Less);

        assert!("depth>3".parse::<QcRule>().is_err());
        assert!("total_count=3".parse::<QcRule>().is_err());
        Ok(())
    }

    #[test]
    fn nan_never_passes() {
        let m = CellMetrics {
            total_count: 1000.0,
            feature_count: 300,
            percent_pattern: f32::NAN,
        };
        let rule = QcRule::new(QcMetric::PercentPattern, Comparison::Less, 10.0);
        assert!(!rule.holds(&m));
    }
}
