//! The record type shared by every source, the store, and the notifier.
//!
//! `Circular` is one published document.  Every source implementation
//! converts its native format into `Circular`s so that the diff engine and
//! the snapshot store never need to know where a list came from.
//!
//! ## For contributors
//!
//! If you are adding a new source you do **not** need to modify this file.
//! Construct `Circular` values in your source's `fetch()` implementation and
//! make sure `id` is stable across fetches.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single published circular.
///
/// ## Identity
///
/// `id` is unique within one fetched list and within the snapshot.  It is the
/// notification key, so re-notifying the same id updates the existing alert
/// instead of stacking a duplicate.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Circular {
    /// Stable numeric identifier assigned by the publisher.
    pub id: u64,

    /// Display title.
    pub name: String,

    /// Location of the document.  Opaque to everything in this crate.
    pub url: String,
}

impl Circular {
    pub fn new(id: u64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for Circular {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_id_and_name() {
        let c = Circular::new(42, "Exam schedule", "https://example.com/42.pdf");
        assert_eq!(c.to_string(), "#42 Exam schedule");
    }

    #[test]
    fn serializes_with_plain_field_names() {
        let c = Circular::new(7, "Holiday", "https://example.com/7");
        let json = serde_json::to_value(&c).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["name"], "Holiday");
        assert_eq!(json["url"], "https://example.com/7");
    }
}
