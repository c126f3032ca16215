use {
    super::store::IdempotencyStore,
    std::{sync::Arc, time::Duration},
    tokio::time::MissedTickBehavior,
    tokio_util::{sync::CancellationToken, task::AbortOnDropHandle},
};

/// Periodically removes expired records and abandoned in-flight markers.
///
/// The task ends when `cancel` fires or when the returned handle is dropped.
pub fn spawn_sweeper(
    store: Arc<dyn IdempotencyStore>,
    interval: Duration,
    stale_after: Duration,
    cancel: CancellationToken,
) -> AbortOnDropHandle<()> {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Idempotency sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let report = store.sweep(stale_after);
                    if report.expired_records > 0 || report.stale_markers > 0 {
                        tracing::info!(
                            expired_records = report.expired_records,
                            stale_markers = report.stale_markers,
                            "Swept idempotency store"
                        );
                    }
                }
            }
        }
    });
    AbortOnDropHandle::new(handle)
}
