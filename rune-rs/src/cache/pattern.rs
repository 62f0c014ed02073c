//! Compiled-regex cache behind `rune.regex(pattern)`.
//!
//! Least-recently-used eviction.  Recency is a logical clock: every hit or
//! insert stamps the entry with the next tick, and `by_tick` orders entries
//! from oldest to newest so eviction is a single `pop_first`.
//!
//! Compilation failures are returned to the caller and never cached, so a
//! fixed pattern is retried on the next use.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use regex::Regex;

/// Default number of compiled patterns kept.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
struct Entry {
    regex: Arc<Regex>,
    tick: u64,
}

#[derive(Debug)]
pub struct PatternCache {
    capacity: usize,
    entries: HashMap<String, Entry>,
    by_tick: BTreeMap<u64, String>,
    clock: u64,
    compiles: u64,
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            by_tick: BTreeMap::new(),
            clock: 0,
            compiles: 0,
        }
    }

    /// Return the compiled matcher for `pattern`, compiling it on a miss.
    pub fn get(&mut self, pattern: &str) -> Result<Arc<Regex>, String> {
        self.clock += 1;
        let tick = self.clock;

        if let Some(entry) = self.entries.get_mut(pattern) {
            self.by_tick.remove(&entry.tick);
            entry.tick = tick;
            self.by_tick.insert(tick, pattern.to_owned());
            return Ok(Arc::clone(&entry.regex));
        }

        self.compiles += 1;
        let regex = Arc::new(Regex::new(pattern).map_err(|e| e.to_string())?);
        self.entries.insert(pattern.to_owned(), Entry { regex: Arc::clone(&regex), tick });
        self.by_tick.insert(tick, pattern.to_owned());

        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.by_tick.pop_first() else { break };
            self.entries.remove(&oldest);
        }
        Ok(regex)
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.entries.contains_key(pattern)
    }

    /// Number of compilations attempted (misses), including failed ones.
    pub fn compiles(&self) -> u64 {
        self.compiles
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
