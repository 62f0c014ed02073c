//! Input history shared with scripts through `rune.history`.
//!
//! Owned by the host rather than the runtime, so it survives reloads.
//! Navigation (up/down recall) is a script concern; this is only storage.

use std::collections::VecDeque;

pub const DEFAULT_MAX: usize = 1000;

/// Bounded list of past input lines, oldest first.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    max_size: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_MAX)
    }
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self { entries: VecDeque::new(), max_size: max_size.max(1) }
    }

    /// Record `line` as the newest entry.
    ///
    /// Empty lines and an exact repeat of the newest entry are skipped.
    pub fn add(&mut self, line: &str) {
        if line.is_empty() || self.entries.back().is_some_and(|e| e == line) {
            return;
        }
        self.entries.push_back(line.to_owned());
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
    }

    /// Snapshot, oldest to newest.
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_order_oldest_first() {
        let mut h = History::new(10);
        h.add("north");
        h.add("look");
        assert_eq!(h.entries(), vec!["north", "look"]);
    }

    #[test]
    fn collapses_consecutive_duplicates() {
        let mut h = History::new(10);
        h.add("look");
        h.add("look");
        h.add("north");
        h.add("look");
        assert_eq!(h.entries(), vec!["look", "north", "look"]);
    }

    #[test]
    fn skips_empty_lines() {
        let mut h = History::new(10);
        h.add("");
        assert!(h.is_empty());
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut h = History::new(2);
        h.add("a");
        h.add("b");
        h.add("c");
        assert_eq!(h.entries(), vec!["b", "c"]);
    }
}
