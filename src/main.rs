// Builds the configuration image, serves it and boots the target from it
use std::io::stderr;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod app;
mod config;

use config::{Cli, Config};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = Config::from_cli(cli).wrap_err("invalid configuration")?;

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directives()));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    app::run(config).await
}
