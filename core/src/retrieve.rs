use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::concordance::{Concordance, ConcordanceBuilder};
use crate::config::RetrieveConfig;
use crate::html::HtmlPage;
use crate::index::{InvertedIndex, PhraseCounts};
use crate::link::Link;
use crate::session::ExtractionSession;
use crate::source::{DocUri, DocumentStore};

/// One ranked document with the windows where the query occurs in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateDoc {
    pub uri: DocUri,
    pub title: String,
    pub count: u64,
    pub contexts: Vec<Concordance>,
}

impl CandidateDoc {
    pub fn joined_contexts(&self) -> String {
        self.contexts.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" … ")
    }
}

/// How many links in the dataset carry each anchor text.
pub fn anchor_frequencies(links: &[Link]) -> HashMap<String, usize> {
    let mut freq = HashMap::new();
    for link in links {
        *freq.entry(link.anchor_text.clone()).or_insert(0) += 1;
    }
    freq
}

pub struct CandidateRetriever<'a, S: DocumentStore + ?Sized> {
    index: &'a InvertedIndex,
    counts: &'a PhraseCounts,
    store: &'a S,
    session: &'a ExtractionSession,
    anchor_freq: &'a HashMap<String, usize>,
    config: RetrieveConfig,
    kwic: ConcordanceBuilder,
}

impl<'a, S: DocumentStore + ?Sized> CandidateRetriever<'a, S> {
    pub fn new(
        index: &'a InvertedIndex,
        counts: &'a PhraseCounts,
        store: &'a S,
        session: &'a ExtractionSession,
        anchor_freq: &'a HashMap<String, usize>,
        config: RetrieveConfig,
    ) -> Self {
        let kwic = ConcordanceBuilder::new(config.context_radius);
        Self { index, counts, store, session, anchor_freq, config, kwic }
    }

    /// Every document containing `phrase`, most occurrences first, ties by uri.
    pub fn ranked(&self, phrase: &str) -> Vec<(&'a str, u64)> {
        let counts = self.counts;
        let mut ranked: Vec<(&'a str, u64)> = match self.index.docs(phrase) {
            Some(docs) => docs.iter().map(|d| (d.as_str(), counts.get(phrase, d))).collect(),
            None => return Vec::new(),
        };
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    /// Top `top_k` resolvable candidates. Memoized when the phrase is a frequent anchor text.
    pub fn candidates(&self, phrase: &str) -> Arc<Vec<CandidateDoc>> {
        let frequent = self.anchor_freq.get(phrase).copied().unwrap_or(0) >= self.config.min_freq_to_cache;
        if !frequent {
            return Arc::new(self.top(phrase, self.config.top_k));
        }
        self.session
            .queries
            .get_or_compute(phrase.to_string(), || Arc::new(self.top(phrase, self.config.top_k)))
    }

    /// Uncached lookup with an explicit `k`. Documents that fail to resolve do not take a slot.
    pub fn top(&self, phrase: &str, k: usize) -> Vec<CandidateDoc> {
        self.ranked(phrase)
            .into_iter()
            .filter_map(|(uri, count)| self.resolve(uri, phrase, count))
            .take(k)
            .collect()
    }

    fn resolve(&self, uri: &str, phrase: &str, count: u64) -> Option<CandidateDoc> {
        let uri: DocUri = uri.parse().ok()?;
        let markup = match self.store.read(&uri) {
            Ok(m) => m,
            Err(err) => {
                debug!(uri = %uri, error = %err, "dropping unresolvable candidate");
                return None;
            }
        };
        let page = HtmlPage::parse(&markup);
        let contexts = self.kwic.build(&page.plain_text(), Some(phrase));
        Some(CandidateDoc {
            title: page.title(),
            uri,
            count,
            contexts: contexts.into_iter().take(self.config.max_contexts).collect(),
        })
    }
}
