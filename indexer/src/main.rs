use anyhow::Result;
use clap::{Parser, Subcommand};
use linkcorpus::config::{IndexConfig, MIN_FRAGMENT_LEN};
use linkcorpus::persist::{meta_for, save_index, save_meta, save_phrase_counts, SnapshotPaths};
use linkcorpus::{build_index, read_links, InvertedIndex, Library, PhraseCounts};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build the phrase index over the documents a link dataset touches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every source and target document of a link dataset
    Build {
        /// Link dataset (TSV written by the extractor)
        #[arg(long)]
        links: PathBuf,
        /// Directory holding the docsets the links point into
        #[arg(long)]
        archives: PathBuf,
        /// Snapshot directory (defaults to the links file's directory)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Stop starting new documents after this many seconds
        #[arg(long)]
        time_limit_secs: Option<u64>,
        /// Worker threads (0 = one per core)
        #[arg(long, default_value_t = 0)]
        threads: usize,
        /// Shortest alphabetic fragment that gets its own entry
        #[arg(long, default_value_t = MIN_FRAGMENT_LEN)]
        min_fragment_len: usize,
    },
}

fn main() -> Result<()> {
    fmt().with_writer(io::stderr).with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { links, archives, output, time_limit_secs, threads, min_fragment_len } => {
            let config = IndexConfig { min_fragment_len, time_limit: time_limit_secs.map(Duration::from_secs) };
            let output = output.unwrap_or_else(|| links.parent().map(Path::to_path_buf).unwrap_or_default());
            build(&links, &archives, &output, threads, &config)
        }
    }
}

fn build(links_path: &Path, archives: &Path, output: &Path, threads: usize, config: &IndexConfig) -> Result<()> {
    let links = read_links(links_path)?;
    tracing::info!(links = links.len(), path = %links_path.display(), "link dataset loaded");

    let library = Library::new(archives);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let (index, counts, report) = pool.install(|| build_index(&links, &library, config));

    for (phrase, docs) in index.top_phrases(50) {
        tracing::info!(phrase, docs, "top phrase");
    }
    tracing::info!(phrases = index.len(), counters = counts.len(), "index sizes");

    let stem = links_path.file_stem().and_then(|s| s.to_str()).unwrap_or("links");
    let paths = SnapshotPaths::now(output, stem);
    if let Err(err) = persist(&paths, &index, &counts, report.documents) {
        tracing::error!(error = %err, dir = %output.display(), "FAILED to write index snapshot");
    }

    eprintln!(
        "done: documents={} failed={} abandoned={} phrases={} elapsed_ms={}",
        report.documents,
        report.failed,
        report.abandoned,
        index.len(),
        report.elapsed.as_millis()
    );
    Ok(())
}

fn persist(paths: &SnapshotPaths, index: &InvertedIndex, counts: &PhraseCounts, documents: usize) -> Result<()> {
    let index_path = save_index(paths, index)?;
    let phrases_path = save_phrase_counts(paths, counts)?;
    save_meta(paths, &meta_for(index, counts, documents))?;
    tracing::info!(index = %index_path.display(), phrases = %phrases_path.display(), "index snapshot written");
    Ok(())
}
