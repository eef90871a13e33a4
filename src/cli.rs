//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Changelog theme builder CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root; config and relative paths resolve against it
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file name (default: changelog.toml)
    #[arg(short = 'C', long, default_value = "changelog.toml")]
    pub config: PathBuf,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Turn on extra logging
    #[arg(long)]
    pub debug: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Shared build arguments for Build and Dev commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// The site to build, either the slug or the hostname
    #[arg(short, long)]
    pub site: Option<String>,

    /// Path to the theme directory
    #[arg(short, long)]
    pub theme: Option<PathBuf>,

    /// Path to the output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Override the API hostname
    #[arg(long)]
    pub host: Option<String>,

    /// Data input JSON file to use instead of the API
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Skip the index, search and entry pages
    #[arg(long)]
    pub no_index: bool,

    /// Skip email generation
    #[arg(long)]
    pub no_email: bool,

    /// Render a single email preview to `email.html` (optionally for this changelog id)
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    pub email: Option<String>,

    /// Minify the html content
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub minify: Option<bool>,

    /// Worker pool size for page rendering and asset transforms
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the site from the API or a data file
    Build {
        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// Build, then serve the output and rebuild on change
    Dev {
        #[command(flatten)]
        build_args: BuildArgs,

        /// Interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// The port for the local dev server
        #[arg(short, long)]
        port: Option<u16>,

        /// enable watch
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        watch: Option<bool>,
    },
}

impl Cli {
    pub const fn build_args(&self) -> &BuildArgs {
        match &self.command {
            Commands::Build { build_args } | Commands::Dev { build_args, .. } => build_args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_with_file() {
        let cli = Cli::parse_from(["changelog", "build", "--file", "data.json", "--no-email"]);
        let args = cli.build_args();
        assert_eq!(args.file, Some(PathBuf::from("data.json")));
        assert!(args.no_email);
        assert!(matches!(cli.command, Commands::Build { .. }));
    }

    #[test]
    fn test_parse_email_preview_without_id() {
        let cli = Cli::parse_from(["changelog", "build", "--site", "acme", "--email"]);
        assert_eq!(cli.build_args().email.as_deref(), Some(""));
    }

    #[test]
    fn test_parse_dev_port() {
        let cli = Cli::parse_from(["changelog", "dev", "--site", "acme", "--port", "4444"]);
        match cli.command {
            Commands::Dev { port, .. } => assert_eq!(port, Some(4444)),
            Commands::Build { .. } => panic!("expected dev"),
        }
    }
}
