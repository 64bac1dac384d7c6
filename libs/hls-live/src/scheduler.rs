use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::events::PresentationEvent;
use crate::parser::PresentationShared;
use crate::stream::{StreamPhase, UpdateContext};

/// Refresh every stream of a live presentation until it becomes VOD or
/// `cancel` fires.
pub(crate) async fn run(shared: Arc<PresentationShared>, cancel: CancellationToken) {
    log::debug!("Update loop started for {} streams", shared.streams.len());
    while shared.timeline.is_live() {
        let interval = update_interval(&shared);
        log::debug!("Next update in {:?}", interval);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick(&shared) => {}
        }
    }
    log::debug!("Update loop ended");
}

/// Timer period from the smallest target duration among streams still updating.
pub(crate) fn update_interval(shared: &PresentationShared) -> Duration {
    let target = shared
        .streams
        .iter()
        .filter(|s| !matches!(s.phase(), StreamPhase::Halted | StreamPhase::Terminal))
        .map(|s| s.target_duration())
        .filter(|target| *target > 0)
        .min()
        .unwrap_or(0);
    shared.config.update_interval(target)
}

/// Update all streams once, concurrently.
pub(crate) async fn tick(shared: &PresentationShared) {
    shared.seed_text_rollover().await;
    let ctx = UpdateContext {
        fetcher: shared.fetcher.as_ref(),
        config: &shared.config,
        presentation_type: shared.timeline.presentation_type(),
    };

    let results = join_all(shared.streams.iter().map(|stream| {
        let ctx = &ctx;
        async move { (stream, stream.refresh(ctx).await) }
    }))
    .await;

    let mut ended = false;
    for (stream, result) in results {
        match result {
            Ok(None) => {}
            Ok(Some(update)) => {
                if let Some(error) = update.timestamp_error {
                    shared.emit(PresentationEvent::TimestampUnavailable {
                        stream: stream.id(),
                        error,
                    });
                }
                if update.appended > 0 || update.evicted > 0 {
                    shared.emit(PresentationEvent::IndexUpdated {
                        stream: stream.id(),
                        appended: update.appended,
                        evicted: update.evicted,
                    });
                }
                ended |= update.ended;
            }
            Err(e) => {
                let error = Arc::new(e);
                if stream.phase() == StreamPhase::Halted {
                    shared.emit(PresentationEvent::StreamHalted {
                        stream: stream.id(),
                        error,
                    });
                } else {
                    log::warn!("[{}]Update failed: {}", stream.id(), error);
                    shared.emit(PresentationEvent::UpdateFailed {
                        stream: stream.id(),
                        error,
                    });
                }
            }
        }
    }

    if ended {
        shared.finish();
    }
}
