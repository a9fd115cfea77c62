//! RSS feed source implementation.
//!
//! Publishers usually expose their circular listing as an RSS 2.0 channel
//! whose items carry a numeric identifier either in `<guid>` or at the end of
//! `<link>`.  This module fetches such a channel and turns it into an ordered
//! list of [`Circular`]s, preserving the channel's item order.
//!
//! ## For contributors — adding a new source type
//!
//! 1. Create a new file under `src/source/` (e.g. `html.rs`).
//! 2. Define a struct holding the configuration your source needs.
//! 3. Implement [`CircularSource`] for it.
//! 4. Re-export your struct from `src/source/mod.rs`.
//!
//! The RSS implementation below is a complete worked example.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Circular, CircularSource, FetchError};

/// Upper bound for a single request, connect included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An RSS channel listing circulars.
pub struct RssSource {
    /// The channel URL to poll.
    pub url: String,
    /// Label used in log lines.
    pub label: String,
    client: reqwest::Client,
}

impl RssSource {
    /// Create a new RSS source.
    ///
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            label: label.into(),
            client,
        })
    }

    /// Parse an already-fetched [`rss::Channel`] into [`Circular`]s.
    ///
    /// This is a pure function (no I/O) so that tests can exercise the
    /// parsing logic without hitting the network.  Items without a derivable
    /// numeric id are skipped, as are repeats of an id already seen in the
    /// same channel.
    pub fn parse_channel(channel: &rss::Channel) -> Vec<Circular> {
        let mut seen = std::collections::HashSet::new();
        let mut circulars = Vec::with_capacity(channel.items().len());

        for item in channel.items() {
            // Prefer <guid>, fall back to <link>.
            let id = item
                .guid()
                .and_then(|g| trailing_number(g.value()))
                .or_else(|| item.link().and_then(trailing_number));

            let Some(id) = id else {
                warn!(title = ?item.title(), "skipping feed item without a numeric id");
                continue;
            };
            if !seen.insert(id) {
                debug!(id, "skipping repeated feed item");
                continue;
            }

            circulars.push(Circular::new(
                id,
                item.title().unwrap_or("(untitled)"),
                item.link().unwrap_or_default(),
            ));
        }

        circulars
    }
}

/// Extract the run of ASCII digits at the end of `s`, ignoring trailing `/`.
///
/// `"42"`, `"circular-42"`, and `"https://example.com/c/42/"` all yield 42.
fn trailing_number(s: &str) -> Option<u64> {
    let s = s.trim().trim_end_matches('/');
    let digits_start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    s[digits_start..].parse().ok()
}

#[async_trait]
impl CircularSource for RssSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn fetch(&self) -> Result<Vec<Circular>, FetchError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let channel = rss::Channel::read_from(body.as_ref())?;
        let circulars = Self::parse_channel(&channel);
        debug!(source = %self.label, count = circulars.len(), "fetched circulars");
        Ok(circulars)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
