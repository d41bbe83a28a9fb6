use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use sha1::{Digest, Sha1};

use crate::concordance::Concordance;
use crate::retrieve::CandidateDoc;
use crate::source::DocUri;

/// Set of link signatures already emitted. First insert wins.
#[derive(Default)]
pub struct DedupGate {
    seen: DashSet<[u8; 20]>,
}

impl DedupGate {
    pub fn new() -> Self { Self::default() }

    /// SHA-1 over the anchor text and the source document.
    pub fn signature(anchor: &str, source: &DocUri) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(anchor.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.to_string().as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&hasher.finalize());
        out
    }

    pub fn is_seen(&self, anchor: &str, source: &DocUri) -> bool {
        self.seen.contains(&Self::signature(anchor, source))
    }

    /// Records the signature; `true` only for the first caller.
    pub fn admit(&self, anchor: &str, source: &DocUri) -> bool {
        self.seen.insert(Self::signature(anchor, source))
    }

    pub fn len(&self) -> usize { self.seen.len() }

    pub fn is_empty(&self) -> bool { self.seen.is_empty() }
}

/// Concurrent compute-if-absent map. The value is computed outside any shard lock,
/// so two racing callers may both compute, but only the first stored value is ever returned.
pub struct Memo<K: Eq + Hash, V: Clone> {
    map: DashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> Default for Memo<K, V> {
    fn default() -> Self { Self { map: DashMap::new() } }
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).map(|v| v.value().clone())
    }

    pub fn get_or_compute(&self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(v) = self.get(&key) {
            return v;
        }
        let value = compute();
        self.map.entry(key).or_insert(value).value().clone()
    }

    pub fn len(&self) -> usize { self.map.len() }

    pub fn is_empty(&self) -> bool { self.map.is_empty() }
}

/// What a target document says about one anchor text.
#[derive(Debug, Clone)]
pub struct DocTrace {
    pub title: String,
    pub uri: DocUri,
    pub fragment: String,
    /// Hits in the fragment's subsection when it was found, else in the whole body.
    pub hits: usize,
    pub concordances: Vec<Concordance>,
}

/// Key: anchor text and the resolved target including its fragment.
pub type TraceKey = (String, String);

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self { Self { started: Instant::now(), limit } }

    pub fn unlimited() -> Self { Self::new(None) }

    pub fn expired(&self) -> bool {
        self.limit.map_or(false, |l| self.started.elapsed() >= l)
    }

    pub fn elapsed(&self) -> Duration { self.started.elapsed() }
}

/// Dedup set, caches and time budget for one run. Build one per run and hand a
/// reference to every worker.
pub struct ExtractionSession {
    pub dedup: DedupGate,
    pub traces: Memo<TraceKey, Option<Arc<DocTrace>>>,
    pub queries: Memo<String, Arc<Vec<CandidateDoc>>>,
    pub deadline: Deadline,
}

impl ExtractionSession {
    pub fn new(time_limit: Option<Duration>) -> Self {
        Self { dedup: DedupGate::new(), traces: Memo::new(), queries: Memo::new(), deadline: Deadline::new(time_limit) }
    }
}

impl Default for ExtractionSession {
    fn default() -> Self { Self::new(None) }
}
