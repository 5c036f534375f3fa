use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use shift_api::{
    ApiError, ChangeJournal, JournalCursor, JournalEvent, JournalPosition, RecordKey, now_ms,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryJournal
// ═══════════════════════════════════════════════════════════════

struct JournalState {
    /// Retained events; sequences are contiguous.
    events: VecDeque<JournalEvent>,
    /// Sequence the next appended event gets. Starts at 1.
    next_sequence: u64,
}

impl JournalState {
    /// Sequence of the oldest retained event (== `next_sequence` when empty).
    fn first_retained(&self) -> u64 {
        self.events
            .front()
            .map(|e| e.sequence)
            .unwrap_or(self.next_sequence)
    }
}

struct JournalInner {
    state: RwLock<JournalState>,
    capacity: usize,
    /// Notification channel: unit signal on every append.
    notify_tx: broadcast::Sender<()>,
}

/// In-memory ring-buffer change journal.
///
/// Retains the last `capacity` events. Cursors that fall behind retention
/// fail with `ErrorKind::Truncated` instead of silently skipping events.
#[derive(Clone)]
pub struct MemoryJournal {
    inner: Arc<JournalInner>,
}

impl MemoryJournal {
    pub fn new(capacity: usize) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(JournalInner {
                state: RwLock::new(JournalState {
                    events: VecDeque::with_capacity(capacity.min(65536)),
                    next_sequence: 1,
                }),
                capacity: capacity.max(1),
                notify_tx,
            }),
        }
    }

    /// Append an upsert (`Some`) or tombstone (`None`). Returns its sequence.
    pub fn append(&self, key: RecordKey, value: Option<Vec<u8>>) -> u64 {
        let sequence = {
            let mut state = self.inner.write_state();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            if state.events.len() >= self.inner.capacity {
                state.events.pop_front();
            }
            state.events.push_back(JournalEvent {
                sequence,
                key,
                value,
                ingestion_ms: now_ms(),
            });
            sequence
        };
        // Notify cursors (ignore if none are open).
        let _ = self.inner.notify_tx.send(());
        sequence
    }

    pub fn len(&self) -> usize {
        self.inner.read_state().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of open cursors.
    pub fn readers(&self) -> usize {
        self.inner.notify_tx.receiver_count()
    }
}

impl JournalInner {
    fn read_state(&self) -> RwLockReadGuard<'_, JournalState> {
        match self.state.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("journal read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, JournalState> {
        match self.state.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("journal write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl ChangeJournal for MemoryJournal {
    fn read(&self, from: JournalPosition) -> Result<Box<dyn JournalCursor>, ApiError> {
        // Subscribe before resolving the position so no append is missed.
        let notify_rx = self.inner.notify_tx.subscribe();
        let state = self.inner.read_state();
        let next_sequence = match from {
            JournalPosition::Earliest => state.first_retained(),
            JournalPosition::Current => state.next_sequence,
            JournalPosition::Sequence(n) => {
                if n < state.first_retained() {
                    return Err(ApiError::truncated(format!(
                        "sequence {n} no longer retained (oldest is {})",
                        state.first_retained()
                    )));
                }
                n
            }
        };
        Ok(Box::new(MemoryCursor {
            inner: self.inner.clone(),
            next_sequence,
            notify_rx,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryCursor
// ═══════════════════════════════════════════════════════════════

struct MemoryCursor {
    inner: Arc<JournalInner>,
    next_sequence: u64,
    notify_rx: broadcast::Receiver<()>,
}

impl MemoryCursor {
    fn try_next(&mut self) -> Result<Option<JournalEvent>, ApiError> {
        let state = self.inner.read_state();
        let first = state.first_retained();
        if self.next_sequence < first {
            return Err(ApiError::truncated(format!(
                "cursor at sequence {} fell behind retention (oldest is {first})",
                self.next_sequence
            )));
        }
        let index = (self.next_sequence - first) as usize;
        match state.events.get(index) {
            Some(event) => {
                self.next_sequence = event.sequence + 1;
                Ok(Some(event.clone()))
            }
            None => Ok(None),
        }
    }
}

impl JournalCursor for MemoryCursor {
    fn position(&self) -> u64 {
        self.next_sequence
    }

    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<JournalEvent, ApiError>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if let Some(event) = self.try_next()? {
                    return Ok(event);
                }
                // No data yet, wait for notification. Lagging only means
                // several appends happened; re-read either way.
                match self.notify_rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ApiError::unavailable("journal closed"));
                    }
                }
            }
        })
    }
}
