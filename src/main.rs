use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch::{config, verify, Verifier, VerifyError};
use log::{error, info};

#[derive(Parser)]
#[command(name = "facematch")]
#[command(
    version,
    about = "Face matching between a selfie and an identity-document photo"
)]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the main face of a selfie against an INE photo
    Verify {
        /// Live selfie image
        #[arg(long)]
        selfie: PathBuf,
        /// Identity document (INE) photo
        #[arg(long)]
        ine: PathBuf,
    },
    /// Report service health
    Health,
    /// Print the effective configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,
    },
}

const EXIT_INTERNAL: u8 = 1;
const EXIT_NO_FACE: u8 = 2;

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg_path = cli.config.as_deref();

    let outcome = match cli.command {
        Commands::Verify { selfie, ine } => run_verify(cfg_path, &selfie, &ine),
        Commands::Health => print_json(&verify::health()).map_err(VerifyError::from),
        Commands::Config { init } => show_config(cfg_path, init).map_err(VerifyError::from),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            if let Err(print_err) = print_json(&e.to_body()) {
                error!("{print_err:#}");
            }
            match e.status_code() {
                422 => ExitCode::from(EXIT_NO_FACE),
                _ => ExitCode::from(EXIT_INTERNAL),
            }
        }
    }
}

fn run_verify(cfg_path: Option<&Path>, selfie: &Path, ine: &Path) -> Result<(), VerifyError> {
    let cfg = config::load_config(cfg_path)?;

    let selfie_bytes =
        std::fs::read(selfie).with_context(|| format!("reading {}", selfie.display()))?;
    let ine_bytes = std::fs::read(ine).with_context(|| format!("reading {}", ine.display()))?;

    let verifier = Verifier::shared(&cfg)?;
    info!("Verifying {} against {}", selfie.display(), ine.display());
    let response = verifier.verify(&selfie_bytes, &ine_bytes)?;

    if let Some(is_match) = response.is_match {
        info!(
            "{} (threshold: {:.3})",
            if is_match { "✓ Faces match" } else { "✗ Faces do not match" },
            cfg.threshold.unwrap_or_default()
        );
    }
    print_json(&response)?;
    Ok(())
}

fn show_config(cfg_path: Option<&Path>, init: bool) -> Result<()> {
    let path = cfg_path.unwrap_or(&config::CONFIG_PATH);
    if init {
        if path.exists() {
            anyhow::bail!("config already exists at {}", path.display());
        }
        config::save_config(&config::Config::default(), Some(path))
            .context("Failed to write default config")?;
        info!("Wrote default config to {}", path.display());
    }

    let cfg = config::load_config(Some(path))?;
    print!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
