//! Novelty detection between the stored snapshot and a fresh fetch.
//!
//! Everything here is a pure function of two ordered slices: no network, no
//! storage, no clock.  The sync engine feeds it `(snapshot, fetched)` and acts
//! on the returned [`Diff`].
//!
//! Two modes exist:
//!
//! * [`DiffMode::Length`] (default) — the list is considered changed only when
//!   its length changes.  On growth the tail beyond the old length is new; on
//!   shrink the whole new list is treated as new and the snapshot is
//!   replaced.  Renames with an unchanged count go unnoticed, and a shrink
//!   re-notifies items the user has already seen.
//! * [`DiffMode::ById`] — content-keyed: anything whose `id` was not in the
//!   snapshot is new, and the snapshot is replaced whenever an old `id`
//!   disappeared.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::source::Circular;

/// Result of comparing a snapshot with a fetched list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    /// Whether the store needs to be touched at all.
    pub changed: bool,
    /// Index into the fetched list of the first item treated as new.
    pub inserted_start: usize,
    /// Items to notify about, in fetched order.
    pub new_items: Vec<Circular>,
    /// The snapshot must be discarded and replaced with the fetched list
    /// instead of being extended with `new_items`.
    pub must_replace: bool,
}

impl Diff {
    fn unchanged(new_len: usize) -> Self {
        Self {
            changed: false,
            inserted_start: new_len,
            new_items: Vec::new(),
            must_replace: false,
        }
    }
}

/// How novelty is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    #[default]
    Length,
    ById,
}

impl DiffMode {
    pub fn apply(self, old: &[Circular], new: &[Circular]) -> Diff {
        match self {
            DiffMode::Length => diff(old, new),
            DiffMode::ById => diff_by_id(old, new),
        }
    }
}

/// Length-based comparison.
///
/// Equal lengths always mean "unchanged", whatever the contents.
pub fn diff(old: &[Circular], new: &[Circular]) -> Diff {
    if new.len() == old.len() {
        return Diff::unchanged(new.len());
    }

    let must_replace = new.len() < old.len();
    let inserted_start = if must_replace { 0 } else { old.len() };

    Diff {
        changed: true,
        inserted_start,
        new_items: new[inserted_start..].to_vec(),
        must_replace,
    }
}

/// Id-based comparison.
pub fn diff_by_id(old: &[Circular], new: &[Circular]) -> Diff {
    let old_ids: HashSet<u64> = old.iter().map(|c| c.id).collect();
    let new_ids: HashSet<u64> = new.iter().map(|c| c.id).collect();

    let must_replace = !old_ids.is_subset(&new_ids);
    let inserted_start = new
        .iter()
        .position(|c| !old_ids.contains(&c.id))
        .unwrap_or(new.len());
    let new_items: Vec<Circular> = new[inserted_start..]
        .iter()
        .filter(|c| !old_ids.contains(&c.id))
        .cloned()
        .collect();

    if new_items.is_empty() && !must_replace {
        return Diff::unchanged(new.len());
    }

    Diff {
        changed: true,
        inserted_start,
        new_items,
        must_replace,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
