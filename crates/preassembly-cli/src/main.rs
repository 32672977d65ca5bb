//! Preassembly CLI
//!
//! Command-line interface for:
//! - Deduplicating and refinement-linking a JSON statement file in one shot
//! - Managing a durable corpus store (ingest, create, supplement, checkpoint)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use preassembly_core::{
    process, AgentSet, CachedOntology, EmptyOntology, EvidenceLink, Hierarchy, Ontology,
    RawStatement, RelevanceFilter, SupportLink, UniqueStatement,
};
use preassembly_store::{CorpusBackend, CorpusManager, CorpusReport, FileBackend, StoreConfig};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "preassembly")]
#[command(
    author,
    version,
    about = "Preassembly: statement deduplication and refinement linking"
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deduplicate and link a statement file in memory, without a store.
    Process {
        /// Input raw statements (JSON array)
        #[arg(short, long)]
        input: PathBuf,
        /// Is-a hierarchy (TSV edge list, or JSON when the extension is `.json`)
        #[arg(long)]
        ontology: Option<PathBuf>,
        /// Output JSON (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Only emit the most specific statements
        #[arg(long)]
        top_level: bool,
    },

    /// Append raw statements to a store without linking them.
    Ingest {
        #[arg(long)]
        store: PathBuf,
        /// Input raw statements (JSON array)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Build the corpus from every raw statement in a store.
    Create {
        #[arg(long)]
        store: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Fold raw statements that are not yet linked into an existing corpus.
    Supplement {
        #[arg(long)]
        store: PathBuf,
        #[command(flatten)]
        run: RunArgs,
        /// Only raw statements created after this instant (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Row counts of a store.
    Stats {
        #[arg(long)]
        store: PathBuf,
    },

    /// Snapshot a store and empty its write-ahead log.
    Checkpoint {
        #[arg(long)]
        store: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Is-a hierarchy (TSV edge list, or JSON when the extension is `.json`)
    #[arg(long)]
    ontology: Option<PathBuf>,
    /// Store configuration (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Relevance filter to apply (grounding, prior_one, prior_all, model_one, model_all)
    #[arg(long = "filter", value_name = "NAME")]
    filters: Vec<RelevanceFilter>,
    /// Statements whose agents the prior filters compare against (JSON array)
    #[arg(long)]
    prior: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Process {
            input,
            ontology,
            out,
            top_level,
        } => cmd_process(&input, ontology.as_deref(), out.as_deref(), top_level),
        Commands::Ingest { store, input } => cmd_ingest(&store, &input),
        Commands::Create { store, run } => cmd_fold(&store, &run, Fold::Create),
        Commands::Supplement { store, run, since } => {
            cmd_fold(&store, &run, Fold::Supplement(since))
        }
        Commands::Stats { store } => cmd_stats(&store),
        Commands::Checkpoint { store } => cmd_checkpoint(&store),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

// ============================================================================
// Helpers
// ============================================================================

fn read_statements(path: &Path) -> Result<Vec<RawStatement>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing statements in {}", path.display()))
}

fn load_ontology(path: Option<&Path>) -> Result<Box<dyn Ontology>> {
    match path {
        Some(path) => {
            let hierarchy = Hierarchy::load(path)
                .with_context(|| format!("loading ontology {}", path.display()))?;
            Ok(Box::new(CachedOntology::new(hierarchy)))
        }
        None => Ok(Box::new(EmptyOntology)),
    }
}

fn store_config(run: &RunArgs) -> Result<StoreConfig> {
    let mut config = match &run.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(batch_size) = run.batch_size {
        config.batch_size = batch_size;
    }
    if !run.filters.is_empty() {
        config.filters = run.filters.clone();
    }
    Ok(config)
}

fn open_store(dir: &Path) -> Result<FileBackend> {
    FileBackend::open(dir).with_context(|| format!("opening store {}", dir.display()))
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Serialize)]
struct ProcessOutput<'a> {
    unique: Vec<&'a UniqueStatement>,
    evidence_links: Vec<&'a EvidenceLink>,
    support_links: Vec<&'a SupportLink>,
}

fn cmd_process(input: &Path, ontology: Option<&Path>, out: Option<&Path>, top_level: bool) -> Result<()> {
    let raws = read_statements(input)?;
    let ontology = load_ontology(ontology)?;
    let corpus = process(&raws, &ontology);

    let unique: Vec<&UniqueStatement> = if top_level {
        corpus.top_level()
    } else {
        corpus.unique.values().collect()
    };
    let output = ProcessOutput {
        unique,
        evidence_links: corpus.evidence_links.iter().collect(),
        support_links: corpus.support_links.iter().collect(),
    };
    let json = serde_json::to_string_pretty(&output)?;

    eprintln!(
        "{} {} raw → {} unique, {} support links",
        "Processed".green().bold(),
        raws.len(),
        corpus.unique.len(),
        corpus.support_links.len()
    );
    match out {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cmd_ingest(store: &Path, input: &Path) -> Result<()> {
    let raws = read_statements(input)?;
    let backend = open_store(store)?;
    let inserted = backend.insert_raw(&raws)?;
    println!(
        "{} {} of {} raw statements into {}",
        "Ingested".green().bold(),
        inserted,
        raws.len(),
        store.display()
    );
    if inserted < raws.len() {
        println!(
            "{} {} already present",
            "info:".yellow().bold(),
            raws.len() - inserted
        );
    }
    Ok(())
}

enum Fold {
    Create,
    Supplement(Option<DateTime<Utc>>),
}

fn cmd_fold(store: &Path, run: &RunArgs, fold: Fold) -> Result<()> {
    let config = store_config(run)?;
    let ontology = load_ontology(run.ontology.as_deref())?;
    let mut manager = CorpusManager::new(open_store(store)?, ontology, config)?;
    if let Some(path) = &run.prior {
        let prior = read_statements(path)?;
        manager = manager.with_prior(AgentSet::from_statements(&prior));
    }

    let (verb, report) = match fold {
        Fold::Create => ("Created", manager.create_corpus()?),
        Fold::Supplement(None) => ("Supplemented", manager.supplement_corpus()?),
        Fold::Supplement(Some(since)) => ("Supplemented", manager.supplement_since(since)?),
    };
    print_report(verb, store, &report);
    Ok(())
}

fn print_report(verb: &str, store: &Path, report: &CorpusReport) {
    println!("{} corpus in {}", verb.green().bold(), store.display());
    println!("  batches:         {}", report.batches);
    println!("  considered:      {}", report.considered);
    println!("  distilled out:   {}", report.distilled_out);
    println!("  filtered:        {}", report.filtered);
    println!("  folded in:       {}", report.folded);
    println!("  new unique:      {}", report.new_unique.to_string().bold());
    println!("  evidence links:  {}", report.evidence_links);
    println!("  support links:   {}", report.support_links.to_string().bold());
}

fn cmd_stats(store: &Path) -> Result<()> {
    let backend = open_store(store)?;
    let counts = backend.counts()?;
    println!("{} {}", "Store".green().bold(), store.display());
    println!("  raw statements:  {}", counts.raw);
    println!("  unique:          {}", counts.unique);
    println!("  evidence links:  {}", counts.evidence_links);
    println!("  support links:   {}", counts.support_links);
    Ok(())
}

fn cmd_checkpoint(store: &Path) -> Result<()> {
    let backend = open_store(store)?;
    backend.checkpoint()?;
    println!("{} {}", "Checkpointed".green().bold(), store.display());
    Ok(())
}
