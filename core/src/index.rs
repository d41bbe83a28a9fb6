use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::html::HtmlPage;
use crate::link::Link;
use crate::session::Deadline;
use crate::source::{DocUri, DocumentStore, SourceError};
use crate::tokenizer::{alpha_fragments, char_len, split_words, valid_phrase};

/// Phrase (case-sensitive) → documents it occurs in.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub postings: HashMap<String, BTreeSet<String>>,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    pub fn docs(&self, phrase: &str) -> Option<&BTreeSet<String>> { self.postings.get(phrase) }

    pub fn len(&self) -> usize { self.postings.len() }

    pub fn is_empty(&self) -> bool { self.postings.is_empty() }

    /// Total (phrase, document) memberships.
    pub fn entries(&self) -> usize { self.postings.values().map(|d| d.len()).sum() }

    /// Phrases with the largest document sets, ties by phrase.
    pub fn top_phrases(&self, n: usize) -> Vec<(&str, usize)> {
        let mut all: Vec<(&str, usize)> = self.postings.iter().map(|(p, d)| (p.as_str(), d.len())).collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        all.truncate(n);
        all
    }
}

/// Occurrences of a phrase in a document, keyed phrase first.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhraseCounts {
    pub counts: HashMap<String, HashMap<String, u64>>,
}

impl PhraseCounts {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, phrase: &str, doc: &str) -> u64 {
        self.counts.get(phrase).and_then(|m| m.get(doc)).copied().unwrap_or(0)
    }

    /// Number of (phrase, document) counters.
    pub fn len(&self) -> usize { self.counts.values().map(|m| m.len()).sum() }

    pub fn is_empty(&self) -> bool { self.counts.is_empty() }
}

/// Accumulates index entries from many workers at once. Every update is a
/// per-key add-to-set plus increment, so worker order does not affect the result.
pub struct IndexBuilder {
    postings: DashMap<String, HashMap<String, u64>>,
    anchors: HashSet<String>,
    max_anchor_words: usize,
    min_fragment_len: usize,
}

impl IndexBuilder {
    /// `anchor_texts` are the phrases that also get whole-phrase entries.
    pub fn new<I: IntoIterator<Item = String>>(anchor_texts: I, min_fragment_len: usize) -> Self {
        let anchors: HashSet<String> = anchor_texts.into_iter().collect();
        let max_anchor_words = anchors.iter().map(|a| split_words(a).len()).max().unwrap_or(1);
        Self { postings: DashMap::new(), anchors, max_anchor_words, min_fragment_len }
    }

    pub fn record(&self, phrase: &str, doc: &str) {
        if let Some(mut docs) = self.postings.get_mut(phrase) {
            *docs.entry(doc.to_string()).or_insert(0) += 1;
            return;
        }
        *self.postings.entry(phrase.to_string()).or_default().entry(doc.to_string()).or_insert(0) += 1;
    }

    /// Scan one document's normalized plain text.
    pub fn index_text(&self, doc: &str, text: &str) {
        let words = split_words(text);
        for (i, word) in words.iter().enumerate() {
            if let Some(phrase) = valid_phrase(word) {
                let mut phrase_recorded = false;
                for fragment in alpha_fragments(phrase) {
                    if char_len(fragment) >= self.min_fragment_len {
                        self.record(fragment, doc);
                        phrase_recorded |= fragment == phrase;
                    }
                }
                if !phrase_recorded && self.anchors.contains(phrase) {
                    self.record(phrase, doc);
                }
            }
            for n in 2..=self.max_anchor_words.min(words.len() - i) {
                let joined = words[i..i + n].join(" ");
                let joined = joined.trim_end_matches(&['.', ',', ';', ':', '!', '?'][..]);
                if self.anchors.contains(joined) {
                    self.record(joined, doc);
                }
            }
        }
    }

    pub fn finish(self) -> (InvertedIndex, PhraseCounts) {
        let mut index = InvertedIndex::new();
        let mut counts = PhraseCounts::new();
        for (phrase, docs) in self.postings.into_iter() {
            index.postings.insert(phrase.clone(), docs.keys().cloned().collect());
            counts.counts.insert(phrase, docs);
        }
        (index, counts)
    }
}

#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    pub documents: usize,
    pub failed: usize,
    /// Documents left unvisited because the time budget ran out.
    pub abandoned: usize,
    pub elapsed: Duration,
}

/// Every distinct document a link points from or to, grouped by archive.
pub fn documents_by_archive(links: &[Link]) -> BTreeMap<String, BTreeSet<DocUri>> {
    let mut groups: BTreeMap<String, BTreeSet<DocUri>> = BTreeMap::new();
    for link in links {
        for uri in [&link.source_uri, &link.target_uri] {
            groups.entry(uri.archive.clone()).or_default().insert(uri.clone());
        }
    }
    groups
}

/// Build the index over every document referenced by `links`. Archives are
/// processed in parallel; a failing document is logged and skipped.
pub fn build_index<S: DocumentStore + ?Sized>(
    links: &[Link],
    store: &S,
    config: &IndexConfig,
) -> (InvertedIndex, PhraseCounts, BuildReport) {
    let deadline = Deadline::new(config.time_limit);
    let builder = IndexBuilder::new(links.iter().map(|l| l.anchor_text.clone()), config.min_fragment_len);
    let groups: Vec<(String, BTreeSet<DocUri>)> = documents_by_archive(links).into_iter().collect();

    let documents = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let abandoned = AtomicUsize::new(0);

    groups.par_iter().for_each(|(archive, docs)| {
        for (i, uri) in docs.iter().enumerate() {
            if deadline.expired() {
                abandoned.fetch_add(docs.len() - i, Ordering::Relaxed);
                warn!(archive = %archive, remaining = docs.len() - i, "time limit exceeded, abandoning archive");
                break;
            }
            let indexed = catch_unwind(AssertUnwindSafe(|| {
                let markup = store.read(uri)?;
                let text = HtmlPage::parse(&markup).plain_text();
                builder.index_text(&uri.to_string(), &text);
                Ok::<(), SourceError>(())
            }));
            match indexed {
                Ok(Ok(())) => {
                    documents.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(err)) => {
                    debug!(uri = %uri, error = %err, "skipping unreadable document");
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    warn!(uri = %uri, "panic while indexing document");
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        store.release(archive);
    });

    let (index, counts) = builder.finish();
    let report = BuildReport {
        documents: documents.into_inner(),
        failed: failed.into_inner(),
        abandoned: abandoned.into_inner(),
        elapsed: deadline.elapsed(),
    };
    info!(
        phrases = index.len(),
        memberships = index.entries(),
        counters = counts.len(),
        documents = report.documents,
        failed = report.failed,
        abandoned = report.abandoned,
        "inverted index built"
    );
    (index, counts, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_and_anchor_phrases_are_indexed() {
        let b = IndexBuilder::new(vec!["HashMap<K,V>".to_string(), "widget".to_string()], 4);
        b.index_text("d1", "Use a HashMap<K,V> or a widget. Then widget again.");
        let (index, counts) = b.finish();
        assert!(index.docs("HashMap").unwrap().contains("d1"));
        assert!(index.docs("HashMap<K,V>").unwrap().contains("d1"));
        assert_eq!(counts.get("widget", "d1"), 2);
        assert_eq!(counts.get("HashMap<K,V>", "d1"), 1);
        assert!(index.docs("Use").is_none());
        assert!(index.docs("K").is_none());
    }

    #[test]
    fn multi_word_anchor_is_indexed() {
        let b = IndexBuilder::new(vec!["widget factory".to_string()], 4);
        b.index_text("d1", "the widget factory makes a widget factory.");
        let (index, counts) = b.finish();
        assert_eq!(counts.get("widget factory", "d1"), 2);
        assert_eq!(index.docs("widget factory").unwrap().len(), 1);
    }

    #[test]
    fn every_indexed_pair_has_a_count() {
        let b = IndexBuilder::new(vec!["alpha".to_string()], 4);
        b.index_text("d1", "alpha beta gamma(x) delta");
        b.index_text("d2", "gamma alpha alpha");
        let (index, counts) = b.finish();
        for (phrase, docs) in &index.postings {
            for doc in docs {
                assert!(counts.get(phrase, doc) > 0, "{phrase}@{doc}");
            }
        }
        assert_eq!(counts.get("alpha", "d2"), 2);
    }

    #[test]
    fn concurrent_updates_commute() {
        let b = IndexBuilder::new(Vec::<String>::new(), 4);
        (0..100).into_par_iter().for_each(|i| b.index_text(&format!("d{}", i % 4), "widget widget"));
        let (index, counts) = b.finish();
        assert_eq!(index.docs("widget").unwrap().len(), 4);
        assert_eq!(counts.get("widget", "d0"), 50);
    }

    #[test]
    fn top_phrases_orders_by_document_count() {
        let b = IndexBuilder::new(Vec::<String>::new(), 4);
        b.index_text("d1", "alpha beta");
        b.index_text("d2", "alpha");
        let (index, _) = b.finish();
        assert_eq!(index.top_phrases(1), vec![("alpha", 2)]);
    }
}
