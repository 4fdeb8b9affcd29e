use super::{StatusHandle, StrategyContext};
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Basic poller: unconditional re-fetch of every allowed feed on a fixed
/// interval. Fetch failures are recorded in the status but never disturb
/// the schedule.
pub(crate) async fn run(
    ctx: StrategyContext,
    status: StatusHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(ctx.tuning.base_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                fetch_cycle(&ctx, &status).await;
            }
            _ = shutdown.changed() => {
                tracing::debug!("Basic poller shutting down");
                return;
            }
        }
    }
}

/// One polling pass over the feeds the current capability allows
pub(crate) async fn fetch_cycle(ctx: &StrategyContext, status: &StatusHandle) {
    let access = ctx.store.wallet_access().await;
    if !access.has_any() {
        return;
    }

    status
        .update(|s| {
            s.is_loading = true;
            s.error = None;
        })
        .await;

    for feed in access.accessible_feeds.iter().copied() {
        match ctx.fetcher.fetch(feed).await {
            Ok(snapshots) => {
                if ctx.store.apply_snapshots(feed, snapshots.clone()).await {
                    ctx.persister.persist_best_effort(&snapshots).await;
                    status.update(|s| s.last_update = Some(Utc::now())).await;
                }
            }
            Err(e) => {
                tracing::warn!("Error fetching {} data: {}", feed, e);
                status.update(|s| s.error = Some(e.to_string())).await;
            }
        }
    }

    status.update(|s| s.is_loading = false).await;
}
