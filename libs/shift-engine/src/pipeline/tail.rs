use shift_api::{ChangeJournal, JournalPosition};

use super::{Attempt, AttemptEnd, Change, Envelope, Partitions, Pipeline};
use crate::error::EngineError;

/// One tail attempt: follow the journal until cancelled or failed.
///
/// The first attempt opens the journal at `from`. Restarts resume right after
/// the committed watermark, so events applied by an earlier attempt are only
/// re-read if a later sequence was still in flight when it failed.
pub(crate) async fn run(
    pipeline: &Pipeline,
    journal: &dyn ChangeJournal,
    from: JournalPosition,
    attempt: &Attempt<'_>,
) -> Result<AttemptEnd, EngineError> {
    let position = attempt.watermark.resume_from().unwrap_or(from);
    let mut cursor = journal
        .read(position)
        .map_err(|e| EngineError::Store(e.with_context(format!("open journal at {position}"))))?;
    attempt.watermark.anchor(cursor.position());
    tracing::info!(job = %attempt.job, %position, next = cursor.position(), "following journal");

    let partitions = Partitions::spawn(pipeline, attempt, true);
    let abort = partitions.abort_token().clone();

    let mut read_error = None;
    loop {
        let event = tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            event = cursor.next() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                read_error = Some(EngineError::Store(e.with_context("journal read")));
                break;
            }
        };

        attempt.metrics.record_read();
        attempt.watermark.begin(event.sequence);
        let envelope = Envelope {
            sequence: Some(event.sequence),
            change: Change::from(event),
        };
        if !partitions.send(envelope).await {
            break;
        }
    }

    let failure = partitions.finish().await.or(read_error);
    if attempt.token.is_cancelled() {
        if let Some(err) = failure {
            tracing::warn!(job = %attempt.job, error = %err, "error while cancelling, ignored");
        }
        tracing::info!(
            job = %attempt.job,
            committed = ?attempt.watermark.committed(),
            "tail stopped"
        );
        return Ok(AttemptEnd::Cancelled);
    }
    match failure {
        Some(err) => Err(err),
        None => Err(EngineError::Internal("tail attempt stopped without cause".into())),
    }
}
