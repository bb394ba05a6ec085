//! `plan`: print the merged file order a train configuration would use,
//! without opening a single chunk. Operator debugging aid for placement
//! policies and ratios.

use anyhow::Result;
use clap::Args;

use crate::train::{build_plan, TrainArgs};

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[clap(flatten)]
    pub train: TrainArgs,
}

pub fn run(args: PlanArgs) -> Result<()> {
    let plan = build_plan(&args.train)?;
    for source in &plan.sources {
        println!("# source {} (weight {:.4})", source.prefix, source.weight);
        for file in &source.files {
            println!("{}", file.display());
        }
    }
    Ok(())
}
