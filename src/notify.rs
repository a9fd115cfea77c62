//! Notification content and delivery.
//!
//! The engine decides *what* the user is told ([`build`]); a [`Notifier`]
//! decides *how* it reaches them.  Content is one alert per new circular,
//! keyed by the circular's id, plus exactly one summary that collapses them
//! into a group.
//!
//! ## For contributors — adding a delivery channel
//!
//! Implement [`Notifier`] for your type and add a variant to
//! [`crate::config::NotifierKind`] so it can be selected from settings.

use std::io::{self, Write};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::source::Circular;

/// Fixed key grouping every circular alert under one summary.
pub const GROUP_KEY: &str = "circulars";

/// Scheme of the in-app viewer deep link.
pub const VIEWER_SCHEME: &str = "circulars";

/// What tapping an alert should do.  Passed through to the notifier untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    /// The document itself.
    pub url: String,
    /// Deep link opening the document in the viewer.
    pub viewer_link: String,
}

/// One alert per new circular.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemNotification {
    /// Dedupe key: notifying the same key again replaces the earlier alert.
    pub key: u64,
    pub title: String,
    pub body: String,
    pub action: ActionRef,
}

/// Group header collapsing the per-item alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryNotification {
    pub group_key: &'static str,
    pub title: String,
    pub body: String,
    /// Number of new circulars this cycle.
    pub count: usize,
}

/// Everything emitted for a single cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationBatch {
    /// In the order the circulars were classified as new.
    pub items: Vec<ItemNotification>,
    pub summary: SummaryNotification,
}

/// Build the alerts for `new_items`, or `None` if there is nothing to say.
pub fn build(new_items: &[Circular]) -> Option<NotificationBatch> {
    if new_items.is_empty() {
        return None;
    }

    let items = new_items.iter().map(item_notification).collect();
    let count = new_items.len();
    let summary = SummaryNotification {
        group_key: GROUP_KEY,
        title: "New circulars".to_string(),
        body: pluralize(count),
        count,
    };

    Some(NotificationBatch { items, summary })
}

fn item_notification(circular: &Circular) -> ItemNotification {
    ItemNotification {
        key: circular.id,
        title: format!("Circular #{}", circular.id),
        body: circular.name.clone(),
        action: ActionRef {
            url: circular.url.clone(),
            viewer_link: format!("{VIEWER_SCHEME}://viewer/{}", circular.id),
        },
    }
}

fn pluralize(count: usize) -> String {
    if count == 1 {
        "1 new circular".to_string()
    } else {
        format!("{count} new circulars")
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("`{program}` exited with {status}")]
    Command {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// Delivery channel for a built batch.
///
/// Must not return before the batch has been handed off; the engine commits
/// the snapshot right after this returns.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, batch: &NotificationBatch) -> Result<(), NotifyError>;
}

/// Prints alerts to stdout, summary first.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    fn write_batch(out: &mut impl Write, batch: &NotificationBatch) -> io::Result<()> {
        let summary = &batch.summary;
        writeln!(out, "[{}] {}: {}", summary.group_key, summary.title, summary.body)?;
        for item in &batch.items {
            writeln!(out, "  {}  {}  <{}>", item.title, item.body, item.action.url)?;
        }
        out.flush()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, batch: &NotificationBatch) -> Result<(), NotifyError> {
        let stdout = io::stdout();
        Self::write_batch(&mut stdout.lock(), batch)?;
        Ok(())
    }
}

/// Desktop alerts through a `notify-send` compatible program.
///
/// Each alert carries the `x-canonical-private-synchronous` hint set to its
/// key, so a notification daemon replaces an earlier alert with the same key
/// instead of stacking another one.
#[derive(Debug)]
pub struct DesktopNotifier {
    program: String,
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            app_name: "circular-watch".to_string(),
        }
    }

    async fn send(&self, key: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        let status = Command::new(&self.program)
            .arg("--app-name")
            .arg(&self.app_name)
            .arg("--hint")
            .arg(format!("string:x-canonical-private-synchronous:{key}"))
            // Titles and bodies come from the feed; never let them parse as options.
            .arg("--")
            .arg(title)
            .arg(body)
            .status()
            .await?;
        if !status.success() {
            return Err(NotifyError::Command {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new("notify-send")
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, batch: &NotificationBatch) -> Result<(), NotifyError> {
        let summary = &batch.summary;
        self.send(summary.group_key, &summary.title, &summary.body).await?;
        for item in &batch.items {
            let key = format!("{GROUP_KEY}-{}", item.key);
            self.send(&key, &item.title, &item.body).await?;
        }
        debug!(count = batch.items.len(), "desktop notifications sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
