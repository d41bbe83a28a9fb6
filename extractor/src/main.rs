use anyhow::{Context, Result};
use clap::Parser;
use linkcorpus::config::{ExtractConfig, PRETTY_WIDTH};
use linkcorpus::{ExtractionSession, Library, Link, LinkExtractor, RecordSink, RunStats};
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "extractor")]
#[command(about = "Extract in-prose hyperlinks with their context from documentation archives")]
struct Cli {
    /// Directory holding .tgz docsets or unpacked docset directories
    #[arg(long)]
    archives: PathBuf,
    /// Output TSV path (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,
    /// Print aligned rows for reading instead of TSV
    #[arg(long, default_value_t = false)]
    pretty: bool,
    /// Stop starting new documents after this many seconds
    #[arg(long)]
    time_limit_secs: Option<u64>,
    /// Worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    threads: usize,
    /// Also require source and target titles to be printable ASCII
    #[arg(long, default_value_t = false)]
    strict_ascii_titles: bool,
}

fn main() -> Result<()> {
    fmt().with_writer(io::stderr).with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let out: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let sink = RecordSink::new(out);
    let config = ExtractConfig { strict_ascii_titles: args.strict_ascii_titles, ..ExtractConfig::default() };
    let session = ExtractionSession::new(args.time_limit_secs.map(Duration::from_secs));
    let library = Library::new(&args.archives);
    let archives = library.list_archives()?;
    eprintln!(
        "extractor: archives={} threads={} pretty={} output={}",
        archives.len(),
        args.threads,
        args.pretty,
        args.output.as_deref().map_or("-".to_string(), |p| p.display().to_string())
    );

    if !args.pretty {
        sink.write_line(&Link::header())?;
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(args.threads).build()?;
    let finished = AtomicUsize::new(0);
    let stats: Vec<RunStats> = pool.install(|| {
        archives
            .par_iter()
            .map(|path| {
                let stats = extract_archive(&library, &session, &config, &sink, path, args.pretty)?;
                let n = finished.fetch_add(1, Ordering::Relaxed) + 1;
                eprintln!(
                    "progress: archives={}/{} archive={} documents={} links={}",
                    n,
                    archives.len(),
                    path.display(),
                    stats.documents,
                    stats.links
                );
                Ok(stats)
            })
            .collect::<Result<Vec<_>>>()
    })?;
    sink.flush()?;

    let mut total = RunStats::default();
    for s in &stats {
        total.merge(s);
    }
    info!(skipped = %total.skipped, "skip summary");
    let elapsed = session.deadline.elapsed();
    eprintln!(
        "done: archives={} documents={} failed={} abandoned={} links={} elapsed_ms={} timed_out={}",
        archives.len(),
        total.documents,
        total.failed,
        total.abandoned,
        total.links,
        elapsed.as_millis(),
        session.deadline.expired()
    );
    Ok(())
}

/// Extract every HTML document of one archive. Only output I/O errors escape.
fn extract_archive<W: Write + Send>(
    library: &Library,
    session: &ExtractionSession,
    config: &ExtractConfig,
    sink: &RecordSink<W>,
    path: &Path,
    pretty: bool,
) -> Result<RunStats> {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_string(),
        None => return Ok(RunStats::default()),
    };
    let docset = match library.open(&name) {
        Ok(d) => d,
        Err(err) => {
            warn!(archive = %name, error = %err, "skipping unreadable archive");
            return Ok(RunStats::default());
        }
    };
    let docs: Vec<_> = docset.html_paths().iter().map(|p| docset.uri(p)).collect();
    let extractor = LinkExtractor::new(library, session, config);
    let stats = extractor.extract_all(&docs, |link| {
        let line = if pretty { link.to_pretty(PRETTY_WIDTH) } else { link.to_line() };
        sink.write_line(&line)
    })?;

    debug!(archive = %name, documents = stats.documents, links = stats.links, skipped = %stats.skipped, "archive done");
    library.release(&name);
    Ok(stats)
}
