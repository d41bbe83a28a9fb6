use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use linkcorpus::config::{IndexConfig, RetrieveConfig};
use linkcorpus::{
    anchor_frequencies, build_index, CandidateRetriever, DocUri, DocumentStore, ExtractionSession, IndexBuilder,
    Link, SourceError,
};

/// Documents held in memory, counting reads. Reading `poisoned` panics.
#[derive(Default)]
struct MemoryStore {
    docs: HashMap<DocUri, String>,
    reads: AtomicUsize,
    poisoned: Option<DocUri>,
}

impl MemoryStore {
    fn with(mut self, uri: &str, body: &str) -> Self {
        self.docs.insert(uri.parse().unwrap(), format!("<html><head><title>{uri}</title></head><body><p>{body}</p></body></html>"));
        self
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, uri: &DocUri) -> Result<String, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.poisoned.as_ref() == Some(uri) {
            panic!("malformed markup in {uri}");
        }
        self.docs
            .get(uri)
            .cloned()
            .ok_or_else(|| SourceError::NotFound { archive: uri.archive.clone(), path: uri.path.clone() })
    }

    fn resolve(&self, href: &str, relative_to: &DocUri) -> Option<DocUri> {
        let uri = DocUri::new(&relative_to.archive, href);
        self.docs.contains_key(&uri).then_some(uri)
    }
}

fn link(anchor: &str, source: &str, target: &str) -> Link {
    Link {
        anchor_text: anchor.to_string(),
        source_hits: 3,
        target_hits: 3,
        source_title: "s".to_string(),
        target_title: "t".to_string(),
        source_context: Vec::new(),
        target_context: Vec::new(),
        source_uri: source.parse().unwrap(),
        target_uri: target.parse().unwrap(),
        target_fragment: String::new(),
    }
}

#[test]
fn ranks_by_count_then_uri() {
    let b = IndexBuilder::new(vec!["widget".to_string()], 4);
    b.index_text("a.tgz!/x.html", "widget widget");
    b.index_text("a.tgz!/b.html", "widget");
    b.index_text("a.tgz!/a.html", "widget");
    b.index_text("a.tgz!/c.html", "widget widget widget");
    let (index, counts) = b.finish();

    let store = MemoryStore::default()
        .with("a.tgz!/x.html", "widget widget")
        .with("a.tgz!/b.html", "one widget here")
        .with("a.tgz!/a.html", "another widget there")
        .with("a.tgz!/c.html", "widget widget widget");
    let session = ExtractionSession::default();
    let freq = HashMap::new();
    let retriever = CandidateRetriever::new(&index, &counts, &store, &session, &freq, RetrieveConfig::default());

    let ranked: Vec<(&str, u64)> = retriever.ranked("widget");
    assert_eq!(
        ranked,
        vec![("a.tgz!/c.html", 3), ("a.tgz!/x.html", 2), ("a.tgz!/a.html", 1), ("a.tgz!/b.html", 1)]
    );

    let top = retriever.top("widget", 2);
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].uri.to_string(), "a.tgz!/c.html");
    assert_eq!(top[0].title, "a.tgz!/c.html");
    assert_eq!(top[0].contexts.len(), 3);
    assert!(top[0].joined_contexts().contains("<<widget>>"));

    assert!(retriever.candidates("nothing").is_empty());
}

#[test]
fn unresolvable_candidates_do_not_take_a_slot() {
    let b = IndexBuilder::new(vec!["widget".to_string()], 4);
    b.index_text("a.tgz!/gone.html", "widget widget widget");
    b.index_text("a.tgz!/kept.html", "widget");
    let (index, counts) = b.finish();

    let store = MemoryStore::default().with("a.tgz!/kept.html", "a widget");
    let session = ExtractionSession::default();
    let freq = HashMap::new();
    let retriever = CandidateRetriever::new(&index, &counts, &store, &session, &freq, RetrieveConfig::default());

    let top = retriever.top("widget", 1);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].uri.to_string(), "a.tgz!/kept.html");
}

#[test]
fn frequent_anchors_are_memoized() {
    let b = IndexBuilder::new(vec!["widget".to_string(), "gadget".to_string()], 4);
    b.index_text("a.tgz!/x.html", "widget gadget");
    let (index, counts) = b.finish();

    let store = MemoryStore::default().with("a.tgz!/x.html", "widget gadget");
    let session = ExtractionSession::default();
    let links = vec![
        link("widget", "a.tgz!/s1.html", "a.tgz!/x.html"),
        link("widget", "a.tgz!/s2.html", "a.tgz!/x.html"),
        link("gadget", "a.tgz!/s1.html", "a.tgz!/x.html"),
    ];
    let freq = anchor_frequencies(&links);
    assert_eq!(freq["widget"], 2);
    let retriever = CandidateRetriever::new(&index, &counts, &store, &session, &freq, RetrieveConfig::default());

    let first = retriever.candidates("widget");
    let second = retriever.candidates("widget");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.reads.load(Ordering::SeqCst), 1);

    let rare_a = retriever.candidates("gadget");
    let rare_b = retriever.candidates("gadget");
    assert_eq!(rare_a, rare_b);
    assert_eq!(store.reads.load(Ordering::SeqCst), 3);
}

#[test]
fn index_covers_link_endpoints() {
    let store = MemoryStore::default()
        .with("a.tgz!/s.html", "the widget links onward to another widget")
        .with("a.tgz!/t.html", "every widget detail lives here")
        .with("b.tgz!/u.html", "nothing relevant inside");
    let links = vec![link("widget", "a.tgz!/s.html", "a.tgz!/t.html"), link("widget", "b.tgz!/u.html", "b.tgz!/missing.html")];

    let (index, counts, report) = build_index(&links, &store, &IndexConfig::default());
    assert_eq!(report.documents, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.abandoned, 0);

    let docs: Vec<&str> = index.docs("widget").unwrap().iter().map(|d| d.as_str()).collect();
    assert_eq!(docs, vec!["a.tgz!/s.html", "a.tgz!/t.html"]);
    assert_eq!(counts.get("widget", "a.tgz!/s.html"), 2);
    assert!(index.docs("relevant").unwrap().contains("b.tgz!/u.html"));
    for (phrase, docs) in index.postings.iter() {
        for doc in docs {
            assert!(counts.get(phrase, doc) >= 1, "{phrase} in {doc} has no count");
        }
    }
}

#[test]
fn expired_budget_abandons_indexing() {
    let store = MemoryStore::default()
        .with("a.tgz!/s.html", "widget here")
        .with("a.tgz!/t.html", "widget there");
    let links = vec![link("widget", "a.tgz!/s.html", "a.tgz!/t.html")];
    let config = IndexConfig { time_limit: Some(Duration::ZERO), ..IndexConfig::default() };

    let (index, _, report) = build_index(&links, &store, &config);
    assert_eq!(report.documents, 0);
    assert_eq!(report.abandoned, 2);
    assert!(index.is_empty());
    assert_eq!(store.reads.load(Ordering::SeqCst), 0);
}

#[test]
fn a_panicking_document_does_not_stop_the_index() {
    let mut store = MemoryStore::default()
        .with("a.tgz!/s.html", "widget here")
        .with("a.tgz!/t.html", "widget there");
    store.poisoned = Some("a.tgz!/s.html".parse().unwrap());
    let links = vec![link("widget", "a.tgz!/s.html", "a.tgz!/t.html")];

    let (index, _, report) = build_index(&links, &store, &IndexConfig::default());
    assert_eq!(report.documents, 1);
    assert_eq!(report.failed, 1);
    let docs: Vec<&str> = index.docs("widget").unwrap().iter().map(|d| d.as_str()).collect();
    assert_eq!(docs, vec!["a.tgz!/t.html"]);
}
