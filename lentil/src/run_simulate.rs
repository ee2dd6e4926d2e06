use clap::Args;
use lentil::loader::MtxOrientation;
use lentil::simulate::{write_simulated_batches, SimArgs};
use log::info;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(long, short, required = true, help = "Output directory")]
    out: Box<str>,

    #[arg(
        long,
        value_delimiter(','),
        default_value = "100,150,120",
        help = "Number of cells in each batch"
    )]
    cells: Vec<usize>,

    #[arg(long, default_value_t = 50, help = "Number of features")]
    features: usize,

    #[arg(long, default_value_t = 3, help = "Number of `MT-` features")]
    mito_features: usize,

    #[arg(long, default_value_t = 3, help = "Number of cell types")]
    cell_types: usize,

    #[arg(long, default_value_t = 2000, help = "Expected total count per cell")]
    depth: usize,

    #[arg(long, default_value_t = 10, help = "Low quality cells per batch")]
    low_quality: usize,

    #[arg(long, default_value_t = 20, help = "Total count of a low quality cell")]
    low_depth: usize,

    #[arg(long, default_value_t = 0.5, help = "SD of log batch effects")]
    batch_effect: f32,

    #[arg(long, value_enum, default_value = "cells-by-features", help = "Matrix orientation")]
    orientation: MtxOrientation,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn run_simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let sim_args = SimArgs {
        batch_sizes: args.cells.clone(),
        features: args.features,
        mito_features: args.mito_features,
        cell_types: args.cell_types,
        depth: args.depth,
        low_quality: args.low_quality,
        low_depth: args.low_depth,
        batch_effect: args.batch_effect,
        rseed: args.seed,
        orientation: args.orientation,
    };

    let sources = write_simulated_batches(&sim_args, &*args.out)?;
    for s in sources.iter() {
        info!("{}", s.dir.display());
    }
    info!("done");
    Ok(())
}
