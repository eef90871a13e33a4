//! changelog-builder - build and preview changelog site themes.

mod assets;
mod cli;
mod config;
mod data;
mod error;
mod generator;
mod logger;
mod serve;
mod template;
mod theme;
mod utils;
mod watch;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::SiteConfig;
use generator::build_site;
use serve::serve_site;

fn main() -> Result<()> {
    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));
    logger::init(cli.quiet, cli.debug);
    let config: &'static SiteConfig = Box::leak(Box::new(load_config(cli)?));

    match &cli.command {
        Commands::Build { .. } => build_site(config).map(|_| ()),
        Commands::Dev { .. } => {
            build_site(config)?;
            serve_site(config)
        }
    }
}

/// Load and validate configuration from CLI arguments
fn load_config(cli: &Cli) -> Result<SiteConfig> {
    let config = SiteConfig::load(cli)?;
    config.validate()?;
    Ok(config)
}
