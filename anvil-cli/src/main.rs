use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use anvil_core::{DatabaseCore, LogLevel};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "anvil")]
#[command(about = "Anvil CLI - run aggregation pipelines over JSON collections")]
#[command(version)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an aggregation pipeline over a collection
    Aggregate {
        /// Data file: { "collection_name": [documents...], ... }
        data: PathBuf,
        /// Collection to aggregate
        collection: String,
        /// Pipeline as inline JSON, or @file to read it from a file
        pipeline: String,
        /// Print the raw command reply ({ok, result|errmsg}) instead of
        /// one result document per line
        #[arg(long)]
        reply: bool,
    },
    /// List the collections in a data file with their document counts
    Collections {
        /// Data file: { "collection_name": [documents...], ... }
        data: PathBuf,
    },
    /// Print the distinct values of a field in a collection
    Distinct {
        /// Data file: { "collection_name": [documents...], ... }
        data: PathBuf,
        /// Collection to scan
        collection: String,
        /// Dotted field path
        field: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match LogLevel::parse(&cli.log_level) {
        Some(level) => anvil_core::set_log_level(level),
        None => bail!("invalid log level: {}", cli.log_level),
    }

    match cli.command {
        Commands::Aggregate {
            data,
            collection,
            pipeline,
            reply,
        } => aggregate(&data, &collection, &pipeline, reply),
        Commands::Collections { data } => list_collections(&data),
        Commands::Distinct {
            data,
            collection,
            field,
        } => distinct(&data, &collection, &field),
    }
}

/// Load a data file of the form { "collection_name": [documents...], ... }
/// into a fresh in-memory database.
fn load_database(path: &Path) -> Result<DatabaseCore> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read data file: {}", path.display()))?;

    let collections: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("invalid JSON in data file: {}", path.display()))?;

    let mut db = DatabaseCore::new();
    for (name, documents) in &collections {
        if !documents.is_array() {
            bail!("collection '{}' must be an array of documents", name);
        }
        db.insert_json(name, documents)
            .with_context(|| format!("failed to load collection '{}'", name))?;
    }
    Ok(db)
}

/// Parse the pipeline argument: inline JSON, or @path to a JSON file.
fn parse_pipeline(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline file: {}", path))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("pipeline is not valid JSON")
}

fn aggregate(data: &Path, collection: &str, pipeline_arg: &str, reply: bool) -> Result<()> {
    let db = load_database(data)?;
    let pipeline = parse_pipeline(pipeline_arg)?;

    if reply {
        let reply = db.run_aggregate_command(collection, &pipeline);
        println!("{}", serde_json::to_string_pretty(&reply)?);
        return Ok(());
    }

    let docs = db
        .aggregate(collection, &pipeline)
        .with_context(|| format!("aggregation over '{}' failed", collection))?;
    for doc in &docs {
        println!("{}", serde_json::to_string(doc)?);
    }
    Ok(())
}

fn list_collections(data: &Path) -> Result<()> {
    let db = load_database(data)?;
    for name in db.collection_names() {
        println!("{}\t{}", name, db.count(&name));
    }
    Ok(())
}

fn distinct(data: &Path, collection: &str, field: &str) -> Result<()> {
    let db = load_database(data)?;
    let values = db
        .distinct(collection, field)
        .with_context(|| format!("distinct over '{}' failed", collection))?;
    for value in &values {
        println!("{}", serde_json::to_string(value)?);
    }
    Ok(())
}
