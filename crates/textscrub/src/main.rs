//! textscrub command-line interface

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

use textscrub_core::{
    Config, DetectionEngine, ExternalMode, Layer, RedactionMode, RedactionOptions,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect PII and print the detection result as JSON
    Scan {
        #[arg(help = "Input file; reads stdin when omitted")]
        input: Option<PathBuf>,
    },
    /// Replace detected PII with fixed mask tokens
    Redact {
        #[arg(help = "Input file; reads stdin when omitted")]
        input: Option<PathBuf>,
        #[arg(long, help = "Also print the replacement report as JSON on stderr")]
        report: bool,
        #[arg(long, help = "Include original matched values in the report")]
        with_originals: bool,
    },
    /// Replace detected PII with consistent per-document pseudonyms
    Anonymize {
        #[arg(help = "Input file; reads stdin when omitted")]
        input: Option<PathBuf>,
        #[arg(long, help = "Generate realistic fake values instead of numbered tokens")]
        realistic: bool,
        #[arg(long, help = "Also print the replacement report as JSON on stderr")]
        report: bool,
    },
    /// Update persisted settings; takes effect for subsequent runs
    Settings {
        #[arg(long, value_enum, help = "External analyzer mode")]
        external_mode: Option<ModeArg>,
        #[arg(long, help = "External analyzer endpoint URL")]
        external_endpoint: Option<String>,
        #[arg(long, value_enum, help = "Enable a detection layer")]
        enable_layer: Vec<LayerArg>,
        #[arg(long, value_enum, help = "Disable a detection layer")]
        disable_layer: Vec<LayerArg>,
        #[arg(long, value_delimiter = ',', help = "Active exclusion regions (comma-separated)")]
        regions: Option<Vec<String>>,
        #[arg(long, help = "Print the effective settings and exit")]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Auto,
    Disabled,
    Lite,
    Full,
}

impl From<ModeArg> for ExternalMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => ExternalMode::Auto,
            ModeArg::Disabled => ExternalMode::Disabled,
            ModeArg::Lite => ExternalMode::Lite,
            ModeArg::Full => ExternalMode::Full,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LayerArg {
    Pattern,
    ContextModel,
    External,
}

impl From<LayerArg> for Layer {
    fn from(layer: LayerArg) -> Self {
        match layer {
            LayerArg::Pattern => Layer::Pattern,
            LayerArg::ContextModel => Layer::ContextModel,
            LayerArg::External => Layer::External,
        }
    }
}

fn read_input(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(std::io::read_to_string(std::io::stdin())?),
    }
}

fn load_config(explicit: Option<&PathBuf>) -> Result<(Config, PathBuf)> {
    match explicit {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok((Config::from_file(path)?, path.clone()))
        }
        None => {
            let default_path = Config::get_default_config_path()?;
            if default_path.exists() {
                info!("Loading configuration from default location: {}", default_path.display());
                Ok((Config::from_file(&default_path)?, default_path))
            } else {
                info!("Creating default configuration at: {}", default_path.display());
                let config = Config::default();
                config.to_file(&default_path)?;
                Ok((config, default_path))
            }
        }
    }
}

fn warn_on_fallback(fallback_used: bool) {
    if fallback_used {
        warn!(
            "detection ran degraded: a configured layer was unavailable, \
             results may miss contextual PII"
        );
        eprintln!("warning: detection degraded, a configured layer was unavailable");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.parse::<tracing::Level>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", cli.log_level);
        tracing::Level::INFO
    });

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let (mut config, config_path) = load_config(cli.config.as_ref())?;
    config.validate()?;

    match cli.command {
        Command::Scan { input } => {
            let engine = DetectionEngine::new(config)?;
            let text = read_input(input.as_ref())?;
            let result = engine.detect(&text).await?;
            warn_on_fallback(result.fallback_used);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Redact { input, report, with_originals } => {
            let options = RedactionOptions {
                mode: RedactionMode::Mask,
                include_original_values: with_originals || config.redaction.include_original_values,
                seed: config.redaction.seed,
            };

            let engine = DetectionEngine::new(config)?;
            let text = read_input(input.as_ref())?;
            let (clean, replacement_report, result) = engine.scrub(&text, &options).await?;
            warn_on_fallback(result.fallback_used);
            print!("{}", clean);
            if report {
                eprintln!("{}", serde_json::to_string_pretty(&replacement_report)?);
            }
        }

        Command::Anonymize { input, realistic, report } => {
            let options = RedactionOptions {
                mode: if realistic {
                    RedactionMode::Realistic
                } else {
                    RedactionMode::Anonymize
                },
                include_original_values: config.redaction.include_original_values,
                seed: config.redaction.seed,
            };

            let engine = DetectionEngine::new(config)?;
            let text = read_input(input.as_ref())?;
            let (clean, replacement_report, result) = engine.scrub(&text, &options).await?;
            warn_on_fallback(result.fallback_used);
            print!("{}", clean);
            if report {
                eprintln!("{}", serde_json::to_string_pretty(&replacement_report)?);
            }
        }

        Command::Settings {
            external_mode,
            external_endpoint,
            enable_layer,
            disable_layer,
            regions,
            show,
        } => {
            if let Some(mode) = external_mode {
                config.external.mode = mode.into();
            }
            if let Some(endpoint) = external_endpoint {
                config.external.endpoint = endpoint;
            }
            for layer in enable_layer {
                config.detection.enabled_layers.insert(layer.into());
            }
            for layer in disable_layer {
                config.detection.enabled_layers.remove(&Layer::from(layer));
            }
            if let Some(regions) = regions {
                config.exclusions.regions = regions;
            }

            config.validate()?;

            if show {
                println!("{}", toml::to_string_pretty(&config)?);
            } else {
                config.to_file(&config_path)?;
                info!("Settings saved to {}", config_path.display());
                println!("settings updated; they apply to subsequent runs");
            }
        }
    }

    Ok(())
}
