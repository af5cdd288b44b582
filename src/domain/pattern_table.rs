//! Pattern table: compiled patterns and the subscriptions under each.
//!
//! The table itself is not synchronized. The dispatcher keeps it behind a
//! `tokio::sync::RwLock`, so resolution runs under a shared lock and every
//! mutation under an exclusive one.

use std::collections::HashMap;

use regex::Regex;

use super::SubscriptionId;
use super::mailbox::Route;

#[derive(Debug)]
struct PatternEntry {
    regex: Regex,
    routes: HashMap<SubscriptionId, Route>,
}

/// Map from raw pattern string to its compiled regex and subscriptions.
///
/// An entry exists iff it holds at least one subscription: it is created by
/// the first [`insert`](Self::insert) for a pattern and dropped together with
/// its last subscription.
#[derive(Debug, Default)]
pub(crate) struct PatternTable {
    entries: HashMap<String, PatternEntry>,
}

impl PatternTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `route` under its pattern. `regex` must be the compiled form
    /// of `route.pattern()`; it is only kept when the entry is new.
    pub(crate) fn insert(&mut self, regex: Regex, route: Route) {
        let entry = self
            .entries
            .entry(route.pattern().to_string())
            .or_insert_with(|| PatternEntry {
                regex,
                routes: HashMap::new(),
            });
        entry.routes.insert(route.id(), route);
    }

    /// Removes one subscription, dropping the pattern entry if it was the
    /// last. Returns the removed route, or `None` if it was not registered.
    pub(crate) fn remove(&mut self, pattern: &str, id: SubscriptionId) -> Option<Route> {
        let entry = self.entries.get_mut(pattern)?;
        let removed = entry.routes.remove(&id);
        if entry.routes.is_empty() {
            self.entries.remove(pattern);
        }
        removed
    }

    /// Returns every route whose pattern matches `topic`, paired with the
    /// capture list for that pattern (full match first, then groups).
    pub(crate) fn resolve(&self, topic: &str) -> Vec<(Route, Vec<String>)> {
        let mut targets = Vec::new();
        for entry in self.entries.values() {
            let Some(captures) = entry.regex.captures(topic) else {
                continue;
            };
            let matches: Vec<String> = captures
                .iter()
                .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                .collect();
            for route in entry.routes.values() {
                targets.push((route.clone(), matches.clone()));
            }
        }
        targets
    }

    /// Empties the table, returning every route it held.
    pub(crate) fn drain(&mut self) -> Vec<Route> {
        self.entries
            .drain()
            .flat_map(|(_, entry)| entry.routes.into_values())
            .collect()
    }

    /// Number of distinct patterns.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of subscriptions across all patterns.
    pub(crate) fn subscription_count(&self) -> usize {
        self.entries.values().map(|e| e.routes.len()).sum()
    }
}
