//! `skeleton` entry point: parse the command line, load configuration,
//! initialise logging and run one command.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use mockable::DefaultEnv;

use skeleton::bootstrap::Runtime;
use skeleton::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let runtime = Runtime::from_env(&DefaultEnv::new()).wrap_err("failed to load configuration")?;
    runtime.init_logging();
    cli.run(&runtime).await.wrap_err("skeleton stopped with an error")?;
    Ok(())
}
