//! Poltergeist CLI: narrative reports about a topic or a source tree.
//!
//! `scry` researches a topic and writes a report; `unveil` maps a codebase's
//! internal dependencies and explains its architecture.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
