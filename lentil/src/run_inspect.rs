use clap::Args;
use lentil::checkpoint::summarize_checkpoint;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// checkpoint file (`*.ckpt.json.gz`)
    file: Box<str>,
}

pub fn run_inspect(args: &InspectArgs) -> anyhow::Result<()> {
    env_logger::init();
    let summary = summarize_checkpoint(&*args.file)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
