//! factflow CLI - validate schemas and ingest CDC messages into a fact log
//!
//! Messages are read as NDJSON (one JSON message per line); the resulting
//! fact log is written as NDJSON or as a single JSON array.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use factflow::{JsonArrayWriter, NdjsonWriter, SchemaConfig, TransformRegistry};

const CONFIG_ENV: &str = "FACTFLOW_CONFIG";
const DEFAULT_CONFIG: &str = "factflow.yaml";

#[derive(Parser)]
#[command(name = "factflow")]
#[command(version, about = "Turn CDC messages into attribute and relationship facts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a schema file without ingesting anything
    Validate {
        /// Path to the schema YAML (default: $FACTFLOW_CONFIG, then factflow.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Ingest NDJSON messages and write the resulting fact log
    Ingest {
        /// Path to the schema YAML (default: $FACTFLOW_CONFIG, then factflow.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// NDJSON file with one message per line (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Where to write the fact log (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format of the fact log
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Ndjson)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Ndjson,
    Json,
}

/// Config path precedence: CLI flag > FACTFLOW_CONFIG > factflow.yaml
fn resolve_config_path(cli_override: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_override {
        return path;
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        tracing::debug!(path = %path, "using config from {}", CONFIG_ENV);
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG)
}

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config } => validate(resolve_config_path(config)),
        Commands::Ingest {
            config,
            input,
            output,
            format,
        } => ingest(resolve_config_path(config), input, output, format),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn validate(config_path: PathBuf) -> Result<(), String> {
    println!("🔍 Validating schema {}...", config_path.display());

    let config = SchemaConfig::load_from_file(&config_path).map_err(|e| e.to_string())?;
    let registry = config
        .build(&TransformRegistry::new())
        .map_err(|e| format!("Invalid schema: {}", e))?;

    let types = registry.types();
    println!(
        "  ✓ {} entity types, {} attributes, {} relationships",
        types.entity_type_count(),
        types.attribute_count(),
        types.relationship_count()
    );
    println!(
        "  ✓ {} message kinds, {} routes",
        registry.message_kinds().count(),
        registry.router().routes().len()
    );
    let rules = registry.rules();
    println!(
        "  ✓ {} message rules, {} derived rules (longest chain: {})",
        rules.message_rule_count(),
        rules.derived_rule_count(),
        rules.graph().max_chain_length()
    );
    println!("✅ Schema is valid!");
    Ok(())
}

fn ingest(
    config_path: PathBuf,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<(), String> {
    let config = SchemaConfig::load_from_file(&config_path).map_err(|e| e.to_string())?;
    let session = config
        .into_session(&TransformRegistry::new())
        .map_err(|e| format!("Invalid schema: {}", e))?;

    let reader: Box<dyn BufRead> = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut ingested = 0usize;
    let mut failed = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| format!("Failed to read input: {}", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let message: serde_json::Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "skipping malformed JSON");
                failed += 1;
                continue;
            }
        };
        match session.ingest(&message) {
            Ok(_) => ingested += 1,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "message failed");
                failed += 1;
            }
        }
    }

    let writer: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).map_err(|e| format!("Failed to create {}: {}", path.display(), e))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let facts = session.store().facts();
    match format {
        OutputFormat::Ndjson => {
            let mut writer = NdjsonWriter::new(writer);
            writer.write_all(&facts).map_err(|e| e.to_string())?;
            writer.flush().map_err(|e| e.to_string())?;
        }
        OutputFormat::Json => {
            let mut writer = JsonArrayWriter::new(writer).map_err(|e| e.to_string())?;
            for fact in &facts {
                writer.write(fact).map_err(|e| e.to_string())?;
            }
            writer.finish().map_err(|e| e.to_string())?;
        }
    }

    tracing::info!(ingested, failed, facts = facts.len(), "ingest finished");
    if failed > 0 {
        return Err(format!("{} of {} messages failed", failed, ingested + failed));
    }
    Ok(())
}
