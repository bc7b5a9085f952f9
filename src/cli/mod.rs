//! # CLI Module
//!
//! Command-line interface for the wardrobe catalog.
//!
//! ## Usage
//! ```bash
//! # Ingest one or more uploaded photos for an owner
//! wardrobe-ingest ingest https://cdn.example.com/upload.jpg --owner user-1
//!
//! # JSON output for scripting
//! wardrobe-ingest ingest https://cdn.example.com/upload.jpg --owner user-1 --output json
//!
//! # Inspect the perceptual signature of a local image
//! wardrobe-ingest fingerprint ./photo.jpg --grid 8
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use std::path::PathBuf;
use std::sync::Arc;
use wardrobe_catalog::core::catalog::SqliteRepository;
use wardrobe_catalog::core::classifier::{ClassifierGateway, GeminiBackend};
use wardrobe_catalog::core::fingerprint::{FingerprintConfig, Fingerprinter};
use wardrobe_catalog::core::pipeline::{IngestOutcome, IngestionPipeline, PipelineConfig};
use wardrobe_catalog::core::store::HttpImageStore;
use wardrobe_catalog::error::{CatalogError, Result, StoreError};

/// Wardrobe Catalog - Duplicate-aware clothing ingestion
#[derive(Parser, Debug)]
#[command(name = "wardrobe-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest uploaded photos into the catalog
    Ingest {
        /// Image URLs to ingest
        #[arg(required = true)]
        urls: Vec<String>,

        /// Owner the items belong to
        #[arg(short, long)]
        owner: String,

        /// Catalog database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Gemini model to use for classification
        #[arg(long, default_value = "gemini-2.0-flash")]
        model: String,

        /// Concurrent candidate resolutions
        #[arg(short, long, default_value = "4")]
        concurrency: usize,

        /// Side length of the signature sample grid
        #[arg(short, long, default_value = "8")]
        grid: u32,

        /// Output format
        #[arg(short = 'f', long, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Print the perceptual signature of a local image file
    Fingerprint {
        /// Image file to fingerprint
        file: PathBuf,

        /// Side length of the sample grid
        #[arg(short, long, default_value = "8")]
        grid: u32,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            urls,
            owner,
            db,
            model,
            concurrency,
            grid,
            output,
        } => run_ingest(urls, owner, db, model, concurrency, grid, output),
        Commands::Fingerprint { file, grid } => run_fingerprint(file, grid),
    }
}

fn run_ingest(
    urls: Vec<String>,
    owner: String,
    db: Option<PathBuf>,
    model: String,
    concurrency: usize,
    grid: u32,
    output: OutputFormat,
) -> Result<()> {
    let term = Term::stderr();

    if matches!(output, OutputFormat::Pretty) {
        term.write_line(&format!(
            "{} {}",
            style("Wardrobe Catalog").bold().cyan(),
            style("v0.1.0").dim()
        ))
        .ok();
        term.write_line("").ok();
    }

    let db_path = db.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wardrobe-catalog")
            .join("catalog.db")
    });

    let repository = SqliteRepository::open(&db_path)?;

    let api_key = std::env::var("GEMINI_API_KEY")
        .map_err(|_| CatalogError::Config("GEMINI_API_KEY not set".to_string()))?;
    let backend = GeminiBackend::new(api_key, model)
        .map_err(|e| CatalogError::Config(e.message))?;

    let pipeline = IngestionPipeline::builder()
        .store(Arc::new(HttpImageStore::new()?))
        .classifier(Arc::new(ClassifierGateway::new(Box::new(backend))))
        .repository(Arc::new(repository))
        .config(PipelineConfig {
            concurrency,
            fingerprint: FingerprintConfig { grid_size: grid },
            ..PipelineConfig::default()
        })
        .build()?;

    let mut all_outcomes = Vec::new();
    for url in &urls {
        match pipeline.ingest_image(&owner, url) {
            Ok(mut outcomes) => all_outcomes.append(&mut outcomes),
            // Detection failure for one upload; keep going with the rest
            Err(e) => all_outcomes.push(IngestOutcome {
                image_url: url.clone(),
                item_id: None,
                merged: false,
                error: Some(e.to_string()),
            }),
        }
    }

    match output {
        OutputFormat::Pretty => print_pretty_outcomes(&term, &all_outcomes),
        OutputFormat::Json => print_json_outcomes(&all_outcomes),
    }

    Ok(())
}

fn print_pretty_outcomes(term: &Term, outcomes: &[IngestOutcome]) {
    term.write_line("").ok();
    term.write_line(&format!("{} Ingestion Complete", style("✓").green().bold()))
        .ok();
    term.write_line("").ok();

    let created = outcomes
        .iter()
        .filter(|o| o.succeeded() && !o.merged)
        .count();
    let merged = outcomes.iter().filter(|o| o.merged).count();
    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();

    term.write_line(&format!("  {} items created", style(created).cyan()))
        .ok();
    term.write_line(&format!(
        "  {} merged into existing items",
        style(merged).cyan()
    ))
    .ok();
    if failed > 0 {
        term.write_line(&format!("  {} failed", style(failed).red()))
            .ok();
    }
    term.write_line("").ok();

    for outcome in outcomes {
        match (&outcome.item_id, &outcome.error) {
            (Some(id), _) => {
                let verb = if outcome.merged {
                    style("merged ").yellow()
                } else {
                    style("created").green()
                };
                term.write_line(&format!("  {} {} {}", verb, style(id).dim(), outcome.image_url))
                    .ok();
            }
            (None, Some(error)) => {
                term.write_line(&format!(
                    "  {} {}",
                    style("failed ").red(),
                    outcome.image_url
                ))
                .ok();
                term.write_line(&format!("          {}", style(error).dim())).ok();
            }
            (None, None) => {}
        }
    }
}

fn print_json_outcomes(outcomes: &[IngestOutcome]) {
    let output = serde_json::json!({
        "created": outcomes.iter().filter(|o| o.succeeded() && !o.merged).count(),
        "merged": outcomes.iter().filter(|o| o.merged).count(),
        "failed": outcomes.iter().filter(|o| !o.succeeded()).count(),
        "outcomes": outcomes,
    });

    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize outcomes: {e}"),
    }
}

fn run_fingerprint(file: PathBuf, grid: u32) -> Result<()> {
    let bytes = std::fs::read(&file).map_err(|e| StoreError::FetchFailed {
        url: file.display().to_string(),
        reason: e.to_string(),
    })?;

    let fingerprinter = Fingerprinter::new(FingerprintConfig { grid_size: grid });
    let signature = fingerprinter.fingerprint(&bytes, None)?;

    println!("{}", signature.to_hex());
    println!("{}", signature.to_bit_string());
    Ok(())
}
