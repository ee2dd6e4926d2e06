use crate::loader::{BatchSource, MtxOrientation};

use indicatif::ParallelProgressIterator;
use log::info;
use matrix_util::common_io::write_lines;
use matrix_util::mtx_io::write_mtx_triplets;
use rand::prelude::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Poisson, Uniform};
use rayon::prelude::*;
use std::path::Path;

pub struct SimArgs {
    /// number of cells in each batch
    pub batch_sizes: Vec<usize>,
    pub features: usize,
    /// leading features named `MT-*`
    pub mito_features: usize,
    pub cell_types: usize,
    /// expected total count of a regular cell
    pub depth: usize,
    /// cells per batch sampled at `low_depth`
    pub low_quality: usize,
    pub low_depth: usize,
    /// standard deviation of the log batch effect of each feature
    pub batch_effect: f32,
    pub rseed: u64,
    pub orientation: MtxOrientation,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            batch_sizes: vec![100, 150, 120],
            features: 50,
            mito_features: 3,
            cell_types: 3,
            depth: 2000,
            low_quality: 10,
            low_depth: 20,
            batch_effect: 0.5,
            rseed: 42,
            orientation: MtxOrientation::CellsByFeatures,
        }
    }
}

pub struct SimBatch {
    pub label: Box<str>,
    pub barcodes: Vec<Box<str>>,
    /// cells x features, 0-based
    pub triplets: Vec<(usize, usize, f32)>,
    pub cell_types: Vec<usize>,
    pub low_quality: Vec<bool>,
}

pub struct SimOut {
    /// `id<TAB>name` lines
    pub features: Vec<Box<str>>,
    pub feature_names: Vec<Box<str>>,
    pub batches: Vec<SimBatch>,
}

/// A 10x-like barcode, unique for each index
fn barcode(index: usize) -> Box<str> {
    const BASES: [char; 4] = ['A', 'C', 'G', 'T'];
    let mut x = index;
    let mut seq = String::with_capacity(14);
    for _ in 0..12 {
        seq.push(BASES[x % 4]);
        x /= 4;
    }
    seq.push_str("-1");
    seq.into()
}

/// Multi-batch counts with shared cell types and per-batch feature
/// effects
///
/// ```text
/// Y(j,i) ~ Poisson( depth(j) * beta(i, K(j)) * delta(i, B(j)) / Z(j) )
/// ```
///
/// where `Z(j)` normalizes the rates of cell `j` to sum to one.
pub fn simulate_batches(args: &SimArgs) -> anyhow::Result<SimOut> {
    let dd = args.features;
    let kk = args.cell_types.max(1);
    let nmito = args.mito_features.min(dd);

    if dd == 0 {
        anyhow::bail!("need at least one feature");
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(args.rseed);
    let rnorm = Normal::new(0_f32, 1_f32)?;

    // 1. cell type profiles; mitochondrial features stay low
    let beta_kd: Vec<Vec<f32>> = (0..kk)
        .map(|_| {
            (0..dd)
                .map(|i| {
                    let x = rnorm.sample(&mut rng).exp();
                    if i < nmito {
                        x * 0.2
                    } else {
                        x
                    }
                })
                .collect()
        })
        .collect();

    // 2. batch effects
    let rbatch = Normal::new(0_f32, args.batch_effect.max(0.0))?;
    let delta_bd: Vec<Vec<f32>> = args
        .batch_sizes
        .iter()
        .map(|_| (0..dd).map(|_| rbatch.sample(&mut rng).exp()).collect())
        .collect();
    info!("simulated batch effects for {} batches", delta_bd.len());

    let feature_names: Vec<Box<str>> = (0..dd)
        .map(|i| {
            if i < nmito {
                format!("MT-{}", i + 1).into()
            } else {
                format!("gene{}", i + 1).into()
            }
        })
        .collect();

    let features = feature_names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("FEAT{:05}\t{}", i + 1, name).into())
        .collect();

    let rtype = Uniform::new(0, kk)?;
    let rdepth = Normal::new(0_f32, 0.2_f32)?;
    let mut offset = 0_usize;
    let mut batches = vec![];

    for (b, &nn) in args.batch_sizes.iter().enumerate() {
        let cell_types: Vec<usize> = (0..nn).map(|_| rtype.sample(&mut rng)).collect();

        let mut order = (0..nn).collect::<Vec<_>>();
        order.shuffle(&mut rng);
        let mut low_quality = vec![false; nn];
        for &j in order.iter().take(args.low_quality.min(nn)) {
            low_quality[j] = true;
        }

        let depth_j: Vec<f32> = (0..nn)
            .map(|j| {
                if low_quality[j] {
                    args.low_depth as f32
                } else {
                    args.depth as f32 * rdepth.sample(&mut rng).exp()
                }
            })
            .collect();

        let seed_b = args.rseed.wrapping_add(((b + 1) * 1_000_003) as u64);
        let triplets = (0..nn)
            .into_par_iter()
            .progress_count(nn as u64)
            .map(|j| {
                let mut rng = rand::rngs::StdRng::seed_from_u64(seed_b.wrapping_add(j as u64));
                let lambda: Vec<f32> = beta_kd[cell_types[j]]
                    .iter()
                    .zip(delta_bd[b].iter())
                    .map(|(x, y)| x * y)
                    .collect();
                let tot = lambda.iter().sum::<f32>();
                let scale = depth_j[j] / tot;

                lambda
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &l_ij)| {
                        let rpois = Poisson::new((l_ij * scale).max(1e-8)).ok()?;
                        let y_ij: f32 = rpois.sample(&mut rng);
                        (y_ij > 0.5).then_some((j, i, y_ij))
                    })
                    .collect::<Vec<_>>()
            })
            .flatten()
            .collect::<Vec<_>>();

        info!(
            "batch{}: {} cells ({} low quality), {} non-zero elements",
            b + 1,
            nn,
            low_quality.iter().filter(|&&x| x).count(),
            triplets.len()
        );

        batches.push(SimBatch {
            label: format!("batch{}", b + 1).into(),
            barcodes: (0..nn).map(|j| barcode(offset + j)).collect(),
            triplets,
            cell_types,
            low_quality,
        });
        offset += nn;
    }

    Ok(SimOut {
        features,
        feature_names,
        batches,
    })
}

/// Write each simulated batch into `<out_dir>/<label>/` with
/// `features.tsv.gz`, `barcodes.tsv.gz` and `matrix.mtx.gz`, plus the
/// true cell types in `cell_types.tsv.gz`
pub fn write_simulated_batches(
    args: &SimArgs,
    out_dir: impl AsRef<Path>,
) -> anyhow::Result<Vec<BatchSource>> {
    let sim = simulate_batches(args)?;
    let dd = sim.features.len();
    let mut sources = vec![];

    for batch in sim.batches {
        let dir = out_dir.as_ref().join(&*batch.label);
        let nn = batch.barcodes.len();

        write_lines(&sim.features, dir.join("features.tsv.gz"))?;
        write_lines(&batch.barcodes, dir.join("barcodes.tsv.gz"))?;

        let truth = batch
            .barcodes
            .iter()
            .zip(batch.cell_types.iter().zip(batch.low_quality.iter()))
            .map(|(bc, (k, lq))| format!("{}\t{}\t{}", bc, k, lq))
            .collect::<Vec<_>>();
        write_lines(&truth, dir.join("cell_types.tsv.gz"))?;

        let mtx_file = dir.join("matrix.mtx.gz");
        match args.orientation {
            MtxOrientation::CellsByFeatures => {
                write_mtx_triplets(&batch.triplets, nn, dd, &mtx_file)?;
            }
            MtxOrientation::FeaturesByCells => {
                let mut triplets = batch
                    .triplets
                    .iter()
                    .map(|&(j, i, y)| (i, j, y))
                    .collect::<Vec<_>>();
                triplets.sort_by_key(|&(i, j, _)| (j, i));
                write_mtx_triplets(&triplets, dd, nn, &mtx_file)?;
            }
        }
        info!("wrote {}", dir.display());

        sources.push(BatchSource::new(&dir).with_label(&batch.label));
    }
    Ok(sources)
}
