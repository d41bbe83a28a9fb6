pub mod concordance;
pub mod config;
pub mod extract;
pub mod html;
pub mod index;
pub mod link;
pub mod persist;
pub mod retrieve;
pub mod session;
pub mod source;
pub mod tokenizer;

pub use concordance::{Concordance, ConcordanceBuilder};
pub use extract::{DocumentOutcome, LinkExtractor, RunStats, Skip, SkipTally};
pub use index::{build_index, BuildReport, IndexBuilder, InvertedIndex, PhraseCounts};
pub use link::{ContextSnippet, Link, RecordError, RecordSink};
pub use retrieve::{anchor_frequencies, CandidateDoc, CandidateRetriever};
pub use session::{DocTrace, ExtractionSession};
pub use source::{DocUri, Docset, DocumentStore, Library, SourceError};

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read a link dataset, skipping the header and any line that does not parse.
pub fn read_links(path: &Path) -> Result<Vec<Link>> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut links = Vec::new();
    for (n, line) in BufReader::new(f).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match Link::parse_line(&line) {
            Ok(link) => links.push(link),
            Err(RecordError::Header) => {}
            Err(err) => tracing::warn!(line = n + 1, error = %err, "skipping malformed record"),
        }
    }
    Ok(links)
}
