use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Detect {
            fits_file,
            config,
            detection,
            blooming,
            keep_sky,
            output,
            document,
        } => {
            commands::detect_stars(
                &fits_file,
                config.as_deref(),
                &detection,
                blooming,
                keep_sky,
                output.as_deref(),
                document.as_deref(),
            )?;
        }
        Commands::Identify {
            document,
            catalog,
            transform,
            accept_negative,
            config,
        } => {
            commands::identify_stars(
                &document,
                &catalog,
                transform.as_deref(),
                accept_negative,
                config.as_deref(),
            )?;
        }
        Commands::Unidentify {
            document,
            catalog,
            transform,
            config,
        } => {
            commands::unidentify_stars(
                &document,
                &catalog,
                transform.as_deref(),
                config.as_deref(),
            )?;
        }
        Commands::Limiting {
            document,
            catalog_acronym,
            mode,
            zero_point,
            config,
        } => {
            commands::limiting_value(
                &document,
                &catalog_acronym,
                &mode,
                zero_point,
                config.as_deref(),
            )?;
        }
        Commands::Annotate {
            fits_file,
            output,
            max_stars,
            color,
            config,
            detection,
        } => {
            commands::annotate_stars(
                &fits_file,
                output.as_deref(),
                max_stars,
                &color,
                config.as_deref(),
                &detection,
            )?;
        }
    }

    Ok(())
}
