use lentil::dataset::{CellMetrics, CellRecord, Dataset};
use lentil::qc::*;
use matrix_util::sparse_util::*;
use proptest::prelude::*;

fn dataset_with_metrics(metrics: &[(f32, usize, f32)], batch_of: impl Fn(usize) -> usize) -> Dataset {
    let batches: Vec<Box<str>> = vec!["b1".into(), "b2".into()];
    let cells = metrics
        .iter()
        .enumerate()
        .map(|(i, &(total_count, feature_count, percent_pattern))| {
            let batch = &batches[batch_of(i)];
            let mut cell = CellRecord::new(&format!("c{}", i), batch);
            cell.id = format!("{}_c{}", batch, i).into_boxed_str();
            cell.metrics = Some(CellMetrics {
                total_count,
                feature_count,
                percent_pattern,
            });
            cell
        })
        .collect::<Vec<_>>();

    // one count per cell so that rows are traceable after subsetting
    let triplets = (0..cells.len())
        .map(|i| (i, 0, (i + 1) as f32))
        .collect::<Vec<_>>();

    Dataset {
        counts: csr_from_triplets(cells.len(), 1, &triplets).expect("counts"),
        features: vec!["f".into()],
        cells,
        batches,
        separator: '_',
    }
}

#[test]
fn default_rules_on_a_few_cells() -> anyhow::Result<()> {
    let data = dataset_with_metrics(
        &[
            (1000.0, 300, 5.0),  // pass
            (800.0, 300, 5.0),   // total not strictly greater
            (1000.0, 200, 5.0),  // features not strictly greater
            (1000.0, 300, 10.0), // percentage not strictly less
            (5000.0, 999, 0.0),  // pass
        ],
        |i| i % 2,
    );

    let (filtered, report) = filter_cells(&data, &QcRule::defaults())?;
    assert_eq!(filtered.num_cells(), 2);
    assert_eq!(&*filtered.cells[0].id, "b1_c0");
    assert_eq!(&*filtered.cells[1].id, "b1_c4");
    assert_eq!(csr_to_triplets(&filtered.counts), vec![(0, 0, 1.0), (1, 0, 5.0)]);

    assert_eq!(report.before, 5);
    assert_eq!(report.after, 2);
    assert_eq!(
        report.batches,
        vec![
            BatchQc {
                batch: "b1".into(),
                before: 3,
                after: 2
            },
            BatchQc {
                batch: "b2".into(),
                before: 2,
                after: 0
            },
        ]
    );
    // an emptied batch keeps its label
    assert_eq!(filtered.batches.len(), 2);
    Ok(())
}

#[test]
fn no_rules_keep_everything() -> anyhow::Result<()> {
    let data = dataset_with_metrics(&[(0.0, 0, 0.0), (1.0, 1, 100.0)], |_| 0);
    let (filtered, report) = filter_cells(&data, &[])?;
    assert_eq!(filtered, data);
    assert_eq!(report.after, 2);
    Ok(())
}

#[test]
fn missing_metrics_are_rejected() {
    let mut data = dataset_with_metrics(&[(1000.0, 300, 1.0)], |_| 0);
    data.cells[0].metrics = None;
    assert!(filter_cells(&data, &QcRule::defaults()).is_err());
}

fn metric_strategy() -> impl Strategy<Value = (f32, usize, f32)> {
    // values cluster around the default thresholds
    (
        prop_oneof![790f32..810f32, Just(800f32), 0f32..5000f32],
        prop_oneof![195usize..205usize, Just(200usize), 0usize..1000usize],
        prop_oneof![9f32..11f32, Just(10f32), 0f32..100f32],
    )
}

proptest! {
    #[test]
    fn retained_iff_all_rules_hold(
        metrics in proptest::collection::vec(metric_strategy(), 0..60),
    ) {
        let data = dataset_with_metrics(&metrics, |i| i % 2);
        let rules = QcRule::defaults();
        let (filtered, report) = filter_cells(&data, &rules).unwrap();

        let expected = metrics
            .iter()
            .enumerate()
            .filter(|(_, m)| m.0 > 800.0 && m.1 > 200 && m.2 < 10.0)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        prop_assert_eq!(filtered.num_cells(), expected.len());
        prop_assert_eq!(filtered.counts.nrows(), expected.len());
        prop_assert_eq!(report.after, expected.len());
        prop_assert_eq!(report.before, metrics.len());

        // order-preserving subset
        for (cell, &i) in filtered.cells.iter().zip(expected.iter()) {
            prop_assert_eq!(cell, &data.cells[i]);
        }
        for (r, &i) in expected.iter().enumerate() {
            let row = filtered.counts.row(r);
            prop_assert_eq!(row.values(), &[(i + 1) as f32][..]);
        }

        let per_batch: usize = report.batches.iter().map(|b| b.after).sum();
        prop_assert_eq!(per_batch, expected.len());
    }
}
