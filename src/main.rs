// src/main.rs

use pipefleet::cli::{self, Command};
use pipefleet::logging::{self, LogMode};
use pipefleet::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("pipefleet error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    let mode = match args.command {
        Command::Worker { .. } => LogMode::Worker,
        _ => LogMode::Interactive,
    };
    logging::init_logging(args.log_level, mode)?;
    run(args).await
}
