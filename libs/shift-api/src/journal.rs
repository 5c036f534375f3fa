use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::ApiError;
use crate::record::JournalEvent;

/// Where a journal reader starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPosition {
    /// Oldest retained event (replays the backlog).
    Earliest,
    /// Only events appended after the cursor is opened.
    Current,
    /// First event with `sequence >= n`. Used to resume after a restart.
    Sequence(u64),
}

impl fmt::Display for JournalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalPosition::Earliest => write!(f, "earliest"),
            JournalPosition::Current => write!(f, "current"),
            JournalPosition::Sequence(n) => write!(f, "sequence {n}"),
        }
    }
}

/// Append-only change journal of a keyed store, ordered per key.
pub trait ChangeJournal: Send + Sync {
    /// Open a lazy reader at `from`.
    ///
    /// Fails with `ErrorKind::Truncated` if `from` names a sequence the
    /// journal no longer retains.
    fn read(&self, from: JournalPosition) -> Result<Box<dyn JournalCursor>, ApiError>;
}

/// Lazy, unbounded sequence of journal events.
pub trait JournalCursor: Send {
    /// Sequence of the next event this cursor yields.
    fn position(&self) -> u64;

    /// Next event, waiting until one is appended.
    ///
    /// Must be cancel-safe: dropping the future before it resolves does not
    /// lose an event, so callers may race it against a shutdown signal.
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<JournalEvent, ApiError>> + Send + '_>>;
}
