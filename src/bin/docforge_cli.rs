//! Document Forge CLI - Bridge interface for the service layer
//!
//! Commands: validate, analyze, flatten, paths, config
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation failure

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use docforge_core::{
    extract_field_paths, extract_references, flatten_for_substitution, reconcile, resolve_images, Attachment,
    Blueprint, Command, EngineConfig, Validator,
};

#[derive(Parser)]
#[command(name = "docforge-cli", version)]
#[command(about = "Document Forge CLI - blueprint validation and template analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a payload against a blueprint
    Validate {
        #[arg(short, long)]
        blueprint: PathBuf,

        #[arg(short, long)]
        payload: PathBuf,

        /// Directory whose files are the uploaded attachments
        #[arg(short, long)]
        attachments: Option<PathBuf>,
    },

    /// Reconcile parsed template commands against a blueprint
    Analyze {
        #[arg(short, long)]
        blueprint: PathBuf,

        /// Commands JSON as listed by the template engine
        #[arg(short = 'm', long)]
        commands: PathBuf,
    },

    /// Strip fields/items wrappers from a payload
    Flatten {
        #[arg(short, long)]
        payload: PathBuf,
    },

    /// List the field paths a blueprint declares
    Paths {
        #[arg(short, long)]
        blueprint: PathBuf,
    },

    /// Print the effective engine configuration
    Config,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(message) => {
            print_json(&serde_json::json!({"success": false, "error": message}));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<ExitCode, String> {
    match cli.command {
        Commands::Validate { blueprint, payload, attachments } => {
            let blueprint = load_blueprint(&blueprint)?;
            let payload: serde_json::Map<String, serde_json::Value> = read_json(&payload)?;
            let attachments = match attachments {
                Some(dir) => load_attachments(&dir)?,
                None => vec![],
            };

            let result = Validator::new().check(&blueprint.schema, &payload, &attachments);
            let duplicates = match resolve_images(&payload, &attachments) {
                Ok(_) => vec![],
                Err(docforge_core::ImageError::DuplicateIds(ids)) => ids,
            };

            let valid = result.valid && duplicates.is_empty();
            print_json(&serde_json::json!({
                "valid": valid,
                "violations": result.violations,
                "duplicateImageIds": duplicates,
            }));
            Ok(if valid { ExitCode::SUCCESS } else { ExitCode::from(2) })
        }

        Commands::Analyze { blueprint, commands } => {
            let blueprint = load_blueprint(&blueprint)?;
            let commands: Vec<Command> = read_json(&commands)?;

            let report = reconcile(&extract_field_paths(&blueprint.schema), &extract_references(&commands));
            print_json(&report);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Flatten { payload } => {
            let payload: serde_json::Value = read_json(&payload)?;
            print_json(&flatten_for_substitution(&payload));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Paths { blueprint } => {
            let blueprint = load_blueprint(&blueprint)?;
            print_json(&extract_field_paths(&blueprint.schema));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Config => {
            let config = match &cli.config {
                Some(path) => EngineConfig::load(path),
                None => Ok(EngineConfig::default()),
            }
            .and_then(|c| c.with_env_overrides(|key| std::env::var(key).ok()))
            .map_err(|e| e.to_string())?;
            print_json(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{out}"),
        Err(e) => println!(r#"{{"success": false, "error": "Serialization error: {}"}}"#, e),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid JSON in {}: {e}", path.display()))
}

fn load_blueprint(path: &Path) -> Result<Blueprint, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    Blueprint::from_json(&content).map_err(|e| format!("Invalid blueprint {}: {e}", path.display()))
}

fn load_attachments(dir: &Path) -> Result<Vec<Attachment>, String> {
    let entries = fs::read_dir(dir).map_err(|e| format!("Failed to read {}: {e}", dir.display()))?;
    let mut attachments = vec![];

    for entry in entries {
        let path = entry.map_err(|e| e.to_string())?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let data = fs::read(&path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        attachments.push(Attachment::new(name.clone(), mime_type(&name), data));
    }
    Ok(attachments)
}

fn mime_type(filename: &str) -> &'static str {
    let ext = filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
