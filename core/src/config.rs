use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest anchor text (in characters) still considered an inline reference.
pub const MAX_ANCHOR_LEN: usize = 50;
/// The enclosing block must be longer than the anchor by more than this many characters.
pub const MIN_CONTEXT_MARGIN: usize = 8;
/// Total characters of inline context kept around an anchor (half on each side).
pub const CONTEXT_WINDOW: usize = 240;
/// Minimum concordance hits an anchor needs in both source and target text.
pub const MIN_KWIC_HITS: usize = 3;
/// Words kept on each side of a concordance hit.
pub const CONTEXT_RADIUS: usize = 3;
/// Cap on snippets stored per context column.
pub const MAX_SNIPPETS: usize = 10;
/// Shortest alphabetic fragment that gets its own index entry.
pub const MIN_FRAGMENT_LEN: usize = 4;
/// Candidate documents returned per query.
pub const TOP_K: usize = 20;
/// Anchor texts seen at least this often in the link dataset get their results memoized.
pub const MIN_FREQ_TO_CACHE: usize = 2;
/// Column width of each side in pretty output.
pub const PRETTY_WIDTH: usize = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub max_anchor_len: usize,
    pub min_context_margin: usize,
    pub context_window: usize,
    pub min_kwic_hits: usize,
    pub context_radius: usize,
    pub max_snippets: usize,
    /// Also require source and target titles to be printable ASCII.
    pub strict_ascii_titles: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_anchor_len: MAX_ANCHOR_LEN,
            min_context_margin: MIN_CONTEXT_MARGIN,
            context_window: CONTEXT_WINDOW,
            min_kwic_hits: MIN_KWIC_HITS,
            context_radius: CONTEXT_RADIUS,
            max_snippets: MAX_SNIPPETS,
            strict_ascii_titles: false,
        }
    }
}

impl ExtractConfig {
    pub fn half_window(&self) -> usize { self.context_window / 2 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub min_fragment_len: usize,
    /// Wall-clock budget for the whole indexing pass.
    pub time_limit: Option<Duration>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { min_fragment_len: MIN_FRAGMENT_LEN, time_limit: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveConfig {
    pub top_k: usize,
    pub min_freq_to_cache: usize,
    pub context_radius: usize,
    pub max_contexts: usize,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            top_k: TOP_K,
            min_freq_to_cache: MIN_FREQ_TO_CACHE,
            context_radius: CONTEXT_RADIUS,
            max_contexts: MAX_SNIPPETS,
        }
    }
}
