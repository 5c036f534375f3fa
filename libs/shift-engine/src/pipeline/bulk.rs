use shift_api::KeyedStore;

use super::{Attempt, AttemptEnd, Change, Envelope, Partitions, Pipeline};
use crate::error::EngineError;

/// One bulk attempt: scan the snapshot, feed every record to its partition,
/// then drain.
///
/// A restarted attempt re-scans from scratch; the sink overwrites per key,
/// so records already migrated are simply written again.
pub(crate) async fn run(
    pipeline: &Pipeline,
    store: &dyn KeyedStore,
    attempt: &Attempt<'_>,
) -> Result<AttemptEnd, EngineError> {
    let snapshot = tokio::select! {
        _ = attempt.token.cancelled() => return Ok(AttemptEnd::Cancelled),
        scanned = store.scan() => scanned.map_err(|e| EngineError::Store(e.with_context("snapshot scan")))?,
    };
    tracing::info!(job = %attempt.job, records = snapshot.len(), "snapshot taken");

    let partitions = Partitions::spawn(pipeline, attempt, false);
    let mut fed_all = true;
    for record in snapshot {
        attempt.metrics.record_read();
        let envelope = Envelope {
            sequence: None,
            change: Change::Upsert {
                key: record.key,
                value: record.value,
            },
        };
        if !partitions.send(envelope).await {
            fed_all = false;
            break;
        }
    }

    if fed_all {
        (attempt.on_drain)();
    }

    let failure = partitions.finish().await;
    if attempt.token.is_cancelled() {
        if let Some(err) = failure {
            tracing::warn!(job = %attempt.job, error = %err, "error while cancelling, ignored");
        }
        return Ok(AttemptEnd::Cancelled);
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(AttemptEnd::Exhausted),
    }
}
