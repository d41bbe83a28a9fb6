use std::collections::HashMap;
use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::concordance::{Concordance, ConcordanceBuilder};
use crate::config::ExtractConfig;
use crate::html::{Anchor, HtmlPage};
use crate::link::{ContextSnippet, Link};
use crate::session::{DocTrace, ExtractionSession};
use crate::source::{DocUri, DocumentStore, SourceError};
use crate::tokenizer::{char_len, is_printable_ascii};

/// Why a candidate was dropped. Expected and frequent, so never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Error)]
pub enum Skip {
    #[error("empty anchor")]
    EmptyAnchor,
    #[error("anchor too long")]
    AnchorTooLong,
    #[error("context too thin")]
    ThinContext,
    #[error("non-ascii text")]
    NonAscii,
    #[error("unresolvable target")]
    Unresolvable,
    #[error("unreadable target")]
    TargetUnreadable,
    #[error("too few hits in source")]
    TooFewSourceHits,
    #[error("too few hits in target")]
    TooFewTargetHits,
    #[error("duplicate")]
    Duplicate,
}

#[derive(Debug, Default, Clone)]
pub struct SkipTally {
    counts: HashMap<Skip, usize>,
}

impl SkipTally {
    pub fn record(&mut self, skip: Skip) { *self.counts.entry(skip).or_insert(0) += 1; }

    pub fn get(&self, skip: Skip) -> usize { self.counts.get(&skip).copied().unwrap_or(0) }

    pub fn total(&self) -> usize { self.counts.values().sum() }

    pub fn merge(&mut self, other: &SkipTally) {
        for (k, v) in &other.counts {
            *self.counts.entry(*k).or_insert(0) += v;
        }
    }
}

impl fmt::Display for SkipTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.counts.iter().collect();
        entries.sort();
        let parts: Vec<String> = entries.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Debug, Default)]
pub struct DocumentOutcome {
    pub links: Vec<Link>,
    pub skipped: SkipTally,
}

/// Totals for one batch of documents.
#[derive(Debug, Default)]
pub struct RunStats {
    pub documents: usize,
    pub failed: usize,
    /// Documents left unvisited because the time budget ran out.
    pub abandoned: usize,
    pub links: usize,
    pub skipped: SkipTally,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.documents += other.documents;
        self.failed += other.failed;
        self.abandoned += other.abandoned;
        self.links += other.links;
        self.skipped.merge(&other.skipped);
    }
}

struct SourcePage<'p> {
    uri: &'p DocUri,
    title: String,
    text: String,
}

pub struct LinkExtractor<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    session: &'a ExtractionSession,
    config: &'a ExtractConfig,
    kwic: ConcordanceBuilder,
}

impl<'a, S: DocumentStore + ?Sized> LinkExtractor<'a, S> {
    pub fn new(store: &'a S, session: &'a ExtractionSession, config: &'a ExtractConfig) -> Self {
        Self { store, session, config, kwic: ConcordanceBuilder::new(config.context_radius) }
    }

    pub fn extract_document(&self, source: &DocUri) -> Result<DocumentOutcome, SourceError> {
        let markup = self.store.read(source)?;
        Ok(self.extract_markup(source, &markup))
    }

    /// Extract `docs` in order, handing every kept link to `emit`. A document that fails
    /// or panics is counted and skipped; once the session deadline passes the rest are
    /// abandoned. Only errors from `emit` are returned.
    pub fn extract_all<E>(&self, docs: &[DocUri], mut emit: E) -> io::Result<RunStats>
    where
        E: FnMut(&Link) -> io::Result<()>,
    {
        let mut stats = RunStats::default();
        for (i, uri) in docs.iter().enumerate() {
            if self.session.deadline.expired() {
                stats.abandoned = docs.len() - i;
                warn!(remaining = stats.abandoned, "time limit exceeded, abandoning documents");
                break;
            }
            let outcome = match catch_unwind(AssertUnwindSafe(|| self.extract_document(uri))) {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    debug!(uri = %uri, error = %err, "skipping unreadable document");
                    stats.failed += 1;
                    continue;
                }
                Err(_) => {
                    warn!(uri = %uri, "panic while extracting document");
                    stats.failed += 1;
                    continue;
                }
            };
            stats.documents += 1;
            stats.skipped.merge(&outcome.skipped);
            for link in &outcome.links {
                emit(link)?;
                stats.links += 1;
            }
        }
        Ok(stats)
    }

    pub fn extract_markup(&self, source: &DocUri, markup: &str) -> DocumentOutcome {
        let page = HtmlPage::parse(markup);
        let anchors = page.anchors();
        let mut outcome = DocumentOutcome::default();
        if anchors.is_empty() {
            return outcome;
        }
        let source_page = SourcePage { uri: source, title: page.title(), text: page.plain_text() };
        drop(page);

        for anchor in &anchors {
            match self.candidate(&source_page, anchor) {
                Ok(link) => outcome.links.push(link),
                Err(skip) => outcome.skipped.record(skip),
            }
        }
        debug!(source = %source, kept = outcome.links.len(), skipped = %outcome.skipped, "document scanned");
        outcome
    }

    fn candidate(&self, source: &SourcePage<'_>, anchor: &Anchor) -> Result<Link, Skip> {
        let cfg = self.config;
        let text = anchor.text.as_str();
        let text_len = char_len(text);
        if text_len == 0 {
            return Err(Skip::EmptyAnchor);
        }
        if text_len > cfg.max_anchor_len {
            return Err(Skip::AnchorTooLong);
        }
        if char_len(&anchor.context) <= text_len + cfg.min_context_margin {
            return Err(Skip::ThinContext);
        }
        if !is_printable_ascii(&anchor.context) {
            return Err(Skip::NonAscii);
        }
        if self.session.dedup.is_seen(text, source.uri) {
            return Err(Skip::Duplicate);
        }

        let fragment = anchor.href.split_once('#').map(|(_, f)| decode_fragment(f)).unwrap_or_default();
        let target = self.store.resolve(&anchor.href, source.uri).ok_or(Skip::Unresolvable)?;

        let source_kwic = self.kwic.build(&source.text, Some(text));
        if source_kwic.len() < cfg.min_kwic_hits {
            return Err(Skip::TooFewSourceHits);
        }
        let trace = self.trace(text, &target, &fragment).ok_or(Skip::TargetUnreadable)?;
        if trace.hits < cfg.min_kwic_hits {
            return Err(Skip::TooFewTargetHits);
        }
        if cfg.strict_ascii_titles && !(is_printable_ascii(&source.title) && is_printable_ascii(&trace.title)) {
            return Err(Skip::NonAscii);
        }
        let window = context_window(&anchor.context, text, cfg.half_window()).ok_or(Skip::ThinContext)?;

        if !self.session.dedup.admit(text, source.uri) {
            return Err(Skip::Duplicate);
        }

        let mut source_context = vec![window];
        source_context.extend(source_kwic.iter().take(cfg.max_snippets).map(ContextSnippet::from));
        let target_context = trace.concordances.iter().map(ContextSnippet::from).collect();

        Ok(Link {
            anchor_text: text.to_string(),
            source_hits: source_kwic.len(),
            target_hits: trace.hits,
            source_title: source.title.clone(),
            target_title: trace.title.clone(),
            source_context,
            target_context,
            source_uri: source.uri.clone(),
            target_uri: target,
            target_fragment: fragment,
        })
    }

    /// Memoized per (anchor text, target#fragment); unreadable targets are memoized as `None`.
    fn trace(&self, anchor: &str, target: &DocUri, fragment: &str) -> Option<Arc<DocTrace>> {
        let key = (anchor.to_string(), format!("{target}#{fragment}"));
        self.session.traces.get_or_compute(key, || {
            let markup = match self.store.read(target) {
                Ok(m) => m,
                Err(err) => {
                    debug!(target = %target, error = %err, "target unreadable");
                    return None;
                }
            };
            let page = HtmlPage::parse(&markup);
            let text = page.fragment_text(fragment).unwrap_or_else(|| page.plain_text());
            let concordances: Vec<Concordance> = self.kwic.build(&text, Some(anchor));
            Some(Arc::new(DocTrace {
                title: page.title(),
                uri: target.clone(),
                fragment: fragment.to_string(),
                hits: concordances.len(),
                concordances: concordances.into_iter().take(self.config.max_snippets).collect(),
            }))
        })
    }
}

/// Percent-decoded fragment; left as written when it does not decode to UTF-8.
fn decode_fragment(raw: &str) -> String {
    urlencoding::decode(raw).map(|f| f.into_owned()).unwrap_or_else(|_| raw.to_string())
}

/// Up to `half` characters on each side of the first occurrence of `anchor` in `context`.
pub fn context_window(context: &str, anchor: &str, half: usize) -> Option<ContextSnippet> {
    let start = context.find(anchor)?;
    let end = start + anchor.len();
    let before = &context[..start];
    let after = &context[end..];
    let skip = before.chars().count().saturating_sub(half);
    let pretext: String = before.chars().skip(skip).collect();
    let posttext: String = after.chars().take(half).collect();
    Some(ContextSnippet::new(pretext, posttext))
}
