use anyhow::Result;
use linkcorpus::config::RetrieveConfig;
use linkcorpus::link::escape;
use linkcorpus::persist::load_latest;
use linkcorpus::{
    anchor_frequencies, CandidateRetriever, DocUri, DocumentStore, ExtractionSession, InvertedIndex, Library, Link,
    PhraseCounts, RecordSink, SourceError,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

/// Candidates kept per query when benchmarking.
pub const BENCH_TOP_K: usize = 3;

pub struct QueryEngine<S: DocumentStore = Library> {
    pub index: InvertedIndex,
    pub counts: PhraseCounts,
    pub links: Vec<Link>,
    store: S,
    session: ExtractionSession,
    anchor_freq: HashMap<String, usize>,
    config: RetrieveConfig,
}

#[derive(Debug, Default, Serialize)]
pub struct CandidateReport {
    pub rows: usize,
    /// Links whose lookup panicked; written with empty candidate pairs.
    pub failed: usize,
    pub archives_released: usize,
}

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub queries: usize,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub candidates: usize,
}

/// Passes reads through and remembers which archives they touched.
struct TouchedStore<'a, S: DocumentStore + ?Sized> {
    inner: &'a S,
    touched: Mutex<BTreeSet<String>>,
}

impl<'a, S: DocumentStore + ?Sized> TouchedStore<'a, S> {
    fn new(inner: &'a S) -> Self {
        Self { inner, touched: Mutex::new(BTreeSet::new()) }
    }

    fn into_archives(self) -> BTreeSet<String> {
        self.touched.into_inner()
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for TouchedStore<'_, S> {
    fn read(&self, uri: &DocUri) -> Result<String, SourceError> {
        self.touched.lock().insert(uri.archive.clone());
        self.inner.read(uri)
    }

    fn resolve(&self, href: &str, relative_to: &DocUri) -> Option<DocUri> {
        self.inner.resolve(href, relative_to)
    }

    fn release(&self, archive: &str) {
        self.inner.release(archive);
    }
}

impl QueryEngine<Library> {
    /// Load the newest snapshot in `index_dir`; documents are read from `archives`.
    pub fn open(index_dir: &Path, archives: &Path, links: Vec<Link>, config: RetrieveConfig) -> Result<Self> {
        let (index, counts) = load_latest(index_dir)?;
        tracing::info!(phrases = index.len(), links = links.len(), "query engine ready");
        Ok(Self::from_parts(index, counts, links, Library::new(archives), config))
    }
}

impl<S: DocumentStore> QueryEngine<S> {
    pub fn from_parts(index: InvertedIndex, counts: PhraseCounts, links: Vec<Link>, store: S, config: RetrieveConfig) -> Self {
        let anchor_freq = anchor_frequencies(&links);
        Self { index, counts, links, store, session: ExtractionSession::default(), anchor_freq, config }
    }

    pub fn store(&self) -> &S { &self.store }

    pub fn retriever(&self) -> CandidateRetriever<'_, S> {
        self.retriever_over(&self.store)
    }

    fn retriever_over<'a, T: DocumentStore + ?Sized>(&'a self, store: &'a T) -> CandidateRetriever<'a, T> {
        CandidateRetriever::new(&self.index, &self.counts, store, &self.session, &self.anchor_freq, self.config.clone())
    }

    /// Link columns followed by `cdoc_{i}`/`cdoc_context_{i}` pairs.
    pub fn candidates_header(&self) -> String {
        let mut header = Link::header();
        for i in 0..self.config.top_k {
            header.push_str(&format!("\tcdoc_{i}\tcdoc_context_{i}"));
        }
        header
    }

    /// One output row. Missing candidates are left as empty pairs so every row has the header's width.
    pub fn candidates_row<T: DocumentStore + ?Sized>(&self, retriever: &CandidateRetriever<'_, T>, link: &Link) -> String {
        let found = retriever.candidates(&link.anchor_text);
        let mut row = link.to_line();
        for i in 0..self.config.top_k {
            match found.get(i) {
                Some(doc) => {
                    row.push('\t');
                    row.push_str(&escape(&doc.uri.to_string()));
                    row.push('\t');
                    row.push_str(&escape(&doc.joined_contexts()));
                }
                None => row.push_str("\t\t"),
            }
        }
        row
    }

    fn empty_row(&self, link: &Link) -> String {
        let mut row = link.to_line();
        row.push_str(&"\t\t".repeat(self.config.top_k));
        row
    }

    /// Write the header and one row per link. Links are taken one target archive at a
    /// time, in parallel within the group; archives read for a group are released after it.
    pub fn write_candidates<W: Write + Send>(&self, sink: &RecordSink<W>) -> Result<CandidateReport> {
        sink.write_line(&self.candidates_header())?;
        let mut groups: BTreeMap<&str, Vec<&Link>> = BTreeMap::new();
        for link in &self.links {
            groups.entry(link.target_uri.archive.as_str()).or_default().push(link);
        }

        let mut report = CandidateReport::default();
        for (archive, links) in groups {
            let touched = TouchedStore::new(&self.store);
            let retriever = self.retriever_over(&touched);
            let (rows, failed) = links
                .par_iter()
                .map(|link| {
                    let (row, failed) = match catch_unwind(AssertUnwindSafe(|| self.candidates_row(&retriever, link))) {
                        Ok(row) => (row, 0),
                        Err(_) => {
                            warn!(anchor = %link.anchor_text, source = %link.source_uri, "panic while ranking candidates");
                            (self.empty_row(link), 1)
                        }
                    };
                    sink.write_line(&row).map(|_| (1, failed))
                })
                .try_reduce(|| (0, 0), |a, b| Ok((a.0 + b.0, a.1 + b.1)))?;
            drop(retriever);

            let opened = touched.into_archives();
            for name in &opened {
                self.store.release(name);
            }
            debug!(archive, rows, failed, released = opened.len(), "link group done");
            report.rows += rows;
            report.failed += failed;
            report.archives_released += opened.len();
        }
        Ok(report)
    }

    /// Time uncached lookups of the first `n` index phrases (sorted) at [`BENCH_TOP_K`].
    pub fn bench(&self, n: usize) -> BenchReport {
        let mut phrases: Vec<&str> = self.index.postings.keys().map(|k| k.as_str()).collect();
        phrases.sort_unstable();
        phrases.truncate(n);

        let retriever = self.retriever();
        let started = Instant::now();
        let mut candidates = 0;
        for phrase in &phrases {
            candidates += retriever.top(phrase, BENCH_TOP_K).len();
        }
        let total_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mean_ms = if phrases.is_empty() { 0.0 } else { total_ms / phrases.len() as f64 };
        BenchReport { queries: phrases.len(), total_ms, mean_ms, candidates }
    }
}
