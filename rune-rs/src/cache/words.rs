//! Recency-ranked word cache for completion (`rune.words`).
//!
//! Words are keyed by their lowercase form.  Each entry remembers the casing
//! it was last seen with and a recency stamp.  A secondary index maps the
//! first two (folded) characters to the words sharing them, so completion
//! never scans the whole cache.
//!
//! Capacity counts words.  When it is exceeded the entry that was *inserted*
//! first goes, regardless of how recently it was seen since.

use std::collections::{HashMap, HashSet, VecDeque};

pub const DEFAULT_CAPACITY: usize = 5000;
/// Words shorter than this (in chars) are not recorded.
pub const MIN_WORD_LEN: usize = 3;
/// Most suggestions returned by [`WordCache::complete`].
pub const MAX_SUGGESTIONS: usize = 10;

const PREFIX_LEN: usize = 2;

#[derive(Debug)]
struct WordEntry {
    word: String,
    recency: u64,
}

#[derive(Debug)]
pub struct WordCache {
    capacity: usize,
    entries: HashMap<String, WordEntry>,
    insertion: VecDeque<String>,
    by_prefix: HashMap<String, HashSet<String>>,
    clock: u64,
}

impl Default for WordCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn prefix_key(folded: &str) -> String {
    folded.chars().take(PREFIX_LEN).collect()
}

impl WordCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            insertion: VecDeque::new(),
            by_prefix: HashMap::new(),
            clock: 0,
        }
    }

    /// Record one word.  Too-short words are ignored.
    pub fn add(&mut self, word: &str) {
        if word.chars().count() < MIN_WORD_LEN {
            return;
        }
        self.clock += 1;
        let folded = word.to_lowercase();

        if let Some(entry) = self.entries.get_mut(&folded) {
            entry.word = word.to_owned();
            entry.recency = self.clock;
            return;
        }

        self.by_prefix.entry(prefix_key(&folded)).or_default().insert(folded.clone());
        self.insertion.push_back(folded.clone());
        self.entries.insert(folded, WordEntry { word: word.to_owned(), recency: self.clock });

        if self.entries.len() > self.capacity {
            self.evict_oldest();
        }
    }

    /// Record every word in a line of text.
    pub fn add_text(&mut self, text: &str) {
        for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '\'')) {
            let word = word.trim_matches(|c| c == '-' || c == '\'');
            self.add(word);
        }
    }

    fn evict_oldest(&mut self) {
        let Some(folded) = self.insertion.pop_front() else { return };
        self.entries.remove(&folded);
        let key = prefix_key(&folded);
        if let Some(set) = self.by_prefix.get_mut(&key) {
            set.remove(&folded);
            if set.is_empty() {
                self.by_prefix.remove(&key);
            }
        }
    }

    /// Words starting with `prefix`, most recent first.
    ///
    /// Matching is case-insensitive; results use each word's latest casing.
    /// A word equal to the prefix itself is left out.
    pub fn complete(&self, prefix: &str) -> Vec<String> {
        let folded = prefix.to_lowercase();
        if folded.chars().count() < PREFIX_LEN {
            return Vec::new();
        }
        let Some(candidates) = self.by_prefix.get(&prefix_key(&folded)) else {
            return Vec::new();
        };
        let mut hits: Vec<&WordEntry> = candidates
            .iter()
            .filter(|w| w.starts_with(&folded) && **w != folded)
            .filter_map(|w| self.entries.get(w))
            .collect();
        hits.sort_by(|a, b| b.recency.cmp(&a.recency));
        hits.into_iter().take(MAX_SUGGESTIONS).map(|e| e.word.clone()).collect()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.entries.contains_key(&word.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
