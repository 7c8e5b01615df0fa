//! fieldkit CLI
//!
//! Entry point for the fieldkit command-line application.

use anyhow::Result;
use clap::Parser;

use fieldkit::cli::output::{display_error, OutputConfig};
use fieldkit::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let output_config = OutputConfig::new(cli.quiet, cli.json, cli.verbose);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(output_config.log_level().into()),
        )
        .init();

    output_config.apply_global();

    match cli.run() {
        Ok(()) => Ok(()),
        Err(e) => {
            display_error(&e);
            std::process::exit(1);
        }
    }
}
