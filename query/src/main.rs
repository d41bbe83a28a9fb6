use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linkcorpus::config::{RetrieveConfig, TOP_K};
use linkcorpus::{read_links, RecordSink};
use query::QueryEngine;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Rank candidate target documents from a saved phrase index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append the top-ranked candidate documents to every link of a dataset
    Candidates {
        /// Link dataset (TSV written by the extractor)
        #[arg(long)]
        links: PathBuf,
        /// Directory holding the docsets
        #[arg(long)]
        archives: PathBuf,
        /// Directory holding index snapshots
        #[arg(long)]
        index_dir: PathBuf,
        /// Output TSV path (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Candidates per link
        #[arg(long, default_value_t = TOP_K)]
        top_k: usize,
        /// Worker threads (0 = one per core)
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },
    /// Measure lookup latency over the first phrases of the index
    Bench {
        /// Directory holding the docsets
        #[arg(long)]
        archives: PathBuf,
        /// Directory holding index snapshots
        #[arg(long)]
        index_dir: PathBuf,
        /// Number of phrases to look up
        #[arg(long, default_value_t = 1000)]
        queries: usize,
    },
}

fn main() -> Result<()> {
    fmt().with_writer(io::stderr).with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Candidates { links, archives, index_dir, output, top_k, threads } => {
            let dataset = read_links(&links)?;
            let config = RetrieveConfig { top_k, ..RetrieveConfig::default() };
            let engine = QueryEngine::open(&index_dir, &archives, dataset, config)?;
            let out: Box<dyn Write + Send> = match &output {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path).with_context(|| format!("creating {}", path.display()))?,
                )),
                None => Box::new(BufWriter::new(io::stdout())),
            };
            let sink = RecordSink::new(out);
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
            let report = pool.install(|| engine.write_candidates(&sink))?;
            sink.flush()?;
            eprintln!(
                "done: links={} rows={} failed={} archives_released={}",
                engine.links.len(),
                report.rows,
                report.failed,
                report.archives_released
            );
        }
        Commands::Bench { archives, index_dir, queries } => {
            let engine = QueryEngine::open(&index_dir, &archives, Vec::new(), RetrieveConfig::default())?;
            let report = engine.bench(queries);
            println!("{}", serde_json::to_string_pretty(&report)?);
            eprintln!("done: queries={} mean_ms={:.3}", report.queries, report.mean_ms);
        }
    }
    Ok(())
}
