mod run_inspect;
mod run_integrate;
mod run_simulate;

use clap::{Parser, Subcommand};
use run_inspect::*;
use run_integrate::*;
use run_simulate::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Anchor-based integration of batched single-cell count matrices.\n\
		  Each batch is a directory with `features.tsv[.gz]` (or `genes.tsv[.gz]`),\n\
		  `barcodes.tsv[.gz]` and a MatrixMarket `matrix.mtx[.gz]`."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Merge, filter and integrate batches",
        long_about = "Run the whole pipeline:\n\
		      (1) load and merge batch directories\n\
		      (2) derive per-cell metadata and filter cells\n\
		      (3) normalize each batch and select integration features\n\
		      (4) find anchors between every pair of batches\n\
		      (5) correct every batch towards the reference batch.\n"
    )]
    Run(RunArgs),

    #[command(about = "Simulate batch directories with batch effects")]
    Simulate(SimulateArgs),

    /// print a summary of a checkpoint file
    InspectCheckpoint(InspectArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Run(args) => {
            run_integrate(args)?;
        }
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
        Commands::InspectCheckpoint(args) => {
            run_inspect(args)?;
        }
    }

    Ok(())
}
