mod plan;
mod prepare;
mod train;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum LogOutput {
    /// Standard logs.
    Console,
    /// Standard logs in json format.
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "weft-pretrain",
    about = "Pack, mix and stream token corpora into a resumable pretraining loop"
)]
struct Cli {
    /// Log output format.
    #[clap(
        long,
        env,
        value_enum,
        default_value_t = LogOutput::Console,
        ignore_case = true
    )]
    logs: LogOutput,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tokenize raw jsonl records into packed chunk files.
    Prepare(prepare::PrepareArgs),
    /// Print the merged file order a train configuration would use.
    Plan(plan::PlanArgs),
    /// Drive the training loop over packed corpora (dry-run runtime; real
    /// model runtimes plug in through the weft-trainer API).
    Train(train::TrainArgs),
}

fn init_logging(output: LogOutput) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match output {
        LogOutput::Console => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogOutput::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.logs);
    match cli.command {
        Command::Prepare(args) => prepare::run(args),
        Command::Plan(args) => plan::run(args),
        Command::Train(args) => train::run(args),
    }
}
