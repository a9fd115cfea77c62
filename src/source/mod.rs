//! Remote source abstraction layer.
//!
//! This module defines the [`CircularSource`] trait, the common [`Circular`]
//! record, and the [`FetchError`] every source reports.  Concrete source
//! implementations live in sub-modules (currently only [`rss`]).
//!
//! ## For contributors — adding a new source
//!
//! 1. Create a new file in this directory (e.g. `html.rs`).
//! 2. Define a struct (e.g. `HtmlSource`) and implement [`CircularSource`].
//! 3. Add `mod html;` below and re-export your struct in the `pub use` block.
//! 4. Construct an instance in `main.rs`.
//!
//! The diff engine, the store, and the scheduler are all source-agnostic.

mod circular;
mod rss;

pub use self::circular::Circular;
pub use self::rss::RssSource;

use async_trait::async_trait;
use thiserror::Error;

/// Failure to obtain the remote list.
///
/// Every variant is transient from the engine's point of view: the cycle is
/// abandoned without touching the snapshot and the scheduler tries again
/// later.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout, or non-success HTTP status.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with something that is not a feed.
    #[error("malformed feed: {0}")]
    Parse(#[from] ::rss::Error),
}

/// Trait that every remote source must implement.
///
/// The engine calls [`fetch()`](CircularSource::fetch) once per cycle, from
/// whatever tokio worker the scheduler runs on, so implementations must be
/// [`Send`] + [`Sync`].
#[async_trait]
pub trait CircularSource: Send + Sync {
    /// Human-readable label used in log lines.
    fn name(&self) -> &str;

    /// Fetch the full, ordered list currently published.
    ///
    /// The order is meaningful: the diff engine treats entries beyond the
    /// previously known length as new.
    async fn fetch(&self) -> Result<Vec<Circular>, FetchError>;
}
