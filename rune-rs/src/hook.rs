//! Hook events and the priority-ordered callback table.
//!
//! The host fires well-known [`Hook`]s; scripts may also register and fire
//! arbitrary event names through `rune.hooks`, so the table is keyed by name.
//!
//! Callbacks run in ascending priority.  Ties keep registration order: each
//! entry carries a sequence number and the list is kept sorted by
//! `(priority, seq)`.

use std::collections::HashMap;

/// Priority used when a registration does not specify one.
pub const DEFAULT_PRIORITY: i64 = 50;

// ── Hook ──────────────────────────────────────────────────────────────────

/// Hook events fired by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Input,
    Output,
    Prompt,
    Ready,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Reloading,
    Reloaded,
    Error,
}

impl Hook {
    /// The name scripts use in `rune.hooks.on(name, ...)`.
    pub fn name(self) -> &'static str {
        match self {
            Hook::Input => "input",
            Hook::Output => "output",
            Hook::Prompt => "prompt",
            Hook::Ready => "ready",
            Hook::Connecting => "connecting",
            Hook::Connected => "connected",
            Hook::Disconnecting => "disconnecting",
            Hook::Disconnected => "disconnected",
            Hook::Reloading => "reloading",
            Hook::Reloaded => "reloaded",
            Hook::Error => "error",
        }
    }
}

// ── HookOptions ───────────────────────────────────────────────────────────

/// Recognised registration options; anything else a script passes is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOptions {
    pub priority: i64,
    pub name: Option<String>,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self { priority: DEFAULT_PRIORITY, name: None }
    }
}

// ── HookTable ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct HookEntry<C> {
    priority: i64,
    seq: u64,
    name: Option<String>,
    callback: C,
}

/// Per-event ordered callback lists.  `C` is the callback type.
#[derive(Debug)]
pub struct HookTable<C> {
    events: HashMap<String, Vec<HookEntry<C>>>,
    next_seq: u64,
}

impl<C> Default for HookTable<C> {
    fn default() -> Self {
        Self { events: HashMap::new(), next_seq: 0 }
    }
}

impl<C> HookTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`.
    ///
    /// A named registration replaces an earlier one with the same name on the
    /// same event; the replaced callback is returned so it can be released.
    pub fn register(&mut self, event: &str, opts: HookOptions, callback: C) -> Option<C> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let list = self.events.entry(event.to_ascii_lowercase()).or_default();

        let replaced = match &opts.name {
            Some(name) => list
                .iter()
                .position(|e| e.name.as_deref() == Some(name))
                .map(|i| list.remove(i).callback),
            None => None,
        };

        let entry = HookEntry { priority: opts.priority, seq, name: opts.name, callback };
        let at = list.partition_point(|e| (e.priority, e.seq) <= (entry.priority, entry.seq));
        list.insert(at, entry);
        replaced
    }

    /// Remove the registration called `name` from `event`.
    pub fn remove(&mut self, event: &str, name: &str) -> Option<C> {
        let key = event.to_ascii_lowercase();
        let list = self.events.get_mut(&key)?;
        let i = list.iter().position(|e| e.name.as_deref() == Some(name))?;
        let removed = list.remove(i).callback;
        if list.is_empty() {
            self.events.remove(&key);
        }
        Some(removed)
    }

    /// Callbacks for `event` in dispatch order.
    pub fn callbacks<'a>(&'a self, event: &str) -> impl Iterator<Item = &'a C> + 'a {
        self.events
            .get(&event.to_ascii_lowercase())
            .into_iter()
            .flat_map(|list| list.iter().map(|e| &e.callback))
    }

    pub fn is_registered(&self, event: &str) -> bool {
        self.events.get(&event.to_ascii_lowercase()).is_some_and(|l| !l.is_empty())
    }

    /// Total registrations across all events.
    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(priority: i64) -> HookOptions {
        HookOptions { priority, name: None }
    }

    fn named(priority: i64, name: &str) -> HookOptions {
        HookOptions { priority, name: Some(name.into()) }
    }

    fn order(t: &HookTable<&'static str>, event: &str) -> Vec<&'static str> {
        t.callbacks(event).copied().collect()
    }

    #[test]
    fn lower_priority_runs_first() {
        let mut t = HookTable::new();
        t.register("output", opts(90), "late");
        t.register("output", opts(10), "early");
        t.register("output", HookOptions::default(), "middle");
        assert_eq!(order(&t, "output"), vec!["early", "middle", "late"]);
    }

    #[test]
    fn equal_priority_keeps_insertion_order() {
        let mut t = HookTable::new();
        for cb in ["a", "b", "c", "d"] {
            t.register("input", opts(5), cb);
        }
        assert_eq!(order(&t, "input"), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn event_names_are_case_insensitive() {
        let mut t = HookTable::new();
        t.register("Ready", opts(1), "x");
        assert!(t.is_registered("ready"));
        assert_eq!(order(&t, "READY"), vec!["x"]);
    }

    #[test]
    fn same_name_replaces_registration() {
        let mut t = HookTable::new();
        assert!(t.register("output", named(10, "color"), "v1").is_none());
        assert_eq!(t.register("output", named(20, "color"), "v2"), Some("v1"));
        assert_eq!(order(&t, "output"), vec!["v2"]);
    }

    #[test]
    fn remove_by_name_and_unknown_is_noop() {
        let mut t = HookTable::new();
        t.register("prompt", named(10, "hp"), "hp");
        t.register("prompt", opts(20), "other");
        assert_eq!(t.remove("prompt", "hp"), Some("hp"));
        assert!(t.remove("prompt", "hp").is_none());
        assert!(t.remove("nothing", "hp").is_none());
        assert_eq!(order(&t, "prompt"), vec!["other"]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn unregistered_event_yields_nothing() {
        let t: HookTable<&str> = HookTable::new();
        assert_eq!(t.callbacks("output").count(), 0);
        assert!(t.is_empty());
    }
}
