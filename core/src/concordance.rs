use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;

use crate::tokenizer::{split_words, token_matches};

/// Fixed-capacity FIFO; pushing past capacity silently drops the oldest element.
#[derive(Debug, Clone)]
pub struct EvictingQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> EvictingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn pop_oldest(&mut self) -> Option<T> { self.items.pop_front() }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &T> { self.items.iter() }
}

/// One hit with up to `radius` words on each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concordance {
    pub leading: String,
    pub keyword: String,
    pub trailing: String,
}

impl fmt::Display for Concordance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.leading.is_empty() {
            write!(f, "{} ", self.leading)?;
        }
        write!(f, "<<{}>>", self.keyword)?;
        if !self.trailing.is_empty() {
            write!(f, " {}", self.trailing)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConcordanceBuilder {
    radius: usize,
}

impl ConcordanceBuilder {
    pub fn new(radius: usize) -> Self { Self { radius } }

    /// Windows for every occurrence of `query`, or for every word when `query` is `None` or blank.
    pub fn build(&self, text: &str, query: Option<&str>) -> Vec<Concordance> {
        let tokens = mark_hits(split_words(text), query);

        let mut leading: EvictingQueue<&str> = EvictingQueue::new(self.radius);
        let mut trailing: EvictingQueue<&str> = EvictingQueue::new(self.radius);
        let mut lookahead = tokens.iter().map(|(w, _)| w.as_ref());
        for _ in 0..self.radius {
            take_or_evict(&mut lookahead, &mut trailing);
        }

        let mut out = Vec::new();
        for (word, hit) in tokens.iter() {
            take_or_evict(&mut lookahead, &mut trailing);
            if *hit {
                out.push(Concordance {
                    leading: join(&leading),
                    keyword: word.to_string(),
                    trailing: join(&trailing),
                });
            }
            leading.push(word.as_ref());
        }
        out
    }
}

fn take_or_evict<'a, I: Iterator<Item = &'a str>>(lookahead: &mut I, queue: &mut EvictingQueue<&'a str>) {
    match lookahead.next() {
        Some(word) => queue.push(word),
        None => {
            queue.pop_oldest();
        }
    }
}

fn join(queue: &EvictingQueue<&str>) -> String {
    queue.iter().copied().collect::<Vec<_>>().join(" ")
}

/// Pair every word with whether it is a hit. A multi-word query is folded into a
/// single token per occurrence so the window arithmetic stays word-based.
fn mark_hits<'a>(words: Vec<&'a str>, query: Option<&str>) -> Vec<(Cow<'a, str>, bool)> {
    let query: Vec<&str> = match query {
        Some(q) if !q.trim().is_empty() => split_words(q),
        _ => return words.into_iter().map(|w| (Cow::Borrowed(w), true)).collect(),
    };

    if query.len() == 1 {
        return words.into_iter().map(|w| (Cow::Borrowed(w), token_matches(w, query[0]))).collect();
    }

    let k = query.len();
    let mut out = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let phrase_here = i + k <= words.len()
            && words[i..i + k].iter().zip(&query).all(|(w, q)| token_matches(w, q));
        if phrase_here {
            out.push((Cow::Owned(words[i..i + k].join(" ")), true));
            i += k;
        } else {
            out.push((Cow::Borrowed(words[i]), false));
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_hit_with_radius_two() {
        let c = ConcordanceBuilder::new(2).build("the quick brown fox jumped", Some("fox"));
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].to_string(), "quick brown <<fox>> jumped");
    }

    #[test]
    fn full_mode_emits_one_window_per_word() {
        let text = "the quick brown fox jumped over the lazy dog";
        let c = ConcordanceBuilder::new(3).build(text, None);
        assert_eq!(c.len(), 9);
        assert_eq!(c[0].to_string(), "<<the>> quick brown fox");
        assert_eq!(c[4].to_string(), "quick brown fox <<jumped>> over the lazy");
        assert_eq!(c[8].to_string(), "over the lazy <<dog>>");
    }

    #[test]
    fn windows_are_clamped_at_both_boundaries() {
        let c = ConcordanceBuilder::new(3).build("fox a b c d e fox", Some("fox"));
        assert_eq!(c.len(), 2);
        assert!(c[0].leading.is_empty());
        assert_eq!(c[0].trailing, "a b c");
        assert_eq!(c[1].leading, "c d e");
        assert!(c[1].trailing.is_empty());
    }

    #[test]
    fn multi_word_query_is_one_token() {
        let text = "use the widget factory to build a widget factory now";
        let c = ConcordanceBuilder::new(2).build(text, Some("widget factory"));
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].to_string(), "use the <<widget factory>> to build");
        assert_eq!(c[1].to_string(), "build a <<widget factory>> now");
    }

    #[test]
    fn sentence_punctuation_still_hits() {
        let c = ConcordanceBuilder::new(3).build("widget. A widget, the widget! widgets", Some("widget"));
        assert_eq!(c.len(), 3);
        assert_eq!(c[1].keyword, "widget,");
    }

    #[test]
    fn zero_radius_keeps_only_keyword() {
        let c = ConcordanceBuilder::new(0).build("a b a", Some("a"));
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].to_string(), "<<a>>");
    }

    #[test]
    fn evicting_queue_drops_oldest() {
        let mut q = EvictingQueue::new(2);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(q.len(), 2);
    }
}
