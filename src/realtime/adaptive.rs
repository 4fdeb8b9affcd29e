use super::{StatusHandle, StrategyContext, StrategyTuning};
use crate::types::{ExchangeSnapshot, Feed};
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Growth factor applied per consecutive unchanged tick
const BACKOFF_FACTOR: f64 = 1.5;
/// The multiplier never exceeds 4x the base interval
const MAX_MULTIPLIER: f64 = 4.0;

/// Adaptive poller: polls like the basic poller but hashes each feed's
/// tracked fields and stretches the interval while nothing changes. Fetch
/// errors escalate the interval on their own path (doubling) instead of
/// through the no-change counter.
pub(crate) async fn run(
    ctx: StrategyContext,
    status: StatusHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state = AdaptiveState::new(&ctx.tuning);
    status
        .update(|s| s.current_interval = Some(state.current_interval))
        .await;

    loop {
        tokio::select! {
            _ = cycle(&ctx, &status, &mut state) => {}
            _ = shutdown.changed() => {
                tracing::debug!("Adaptive poller shutting down");
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(state.current_interval) => {}
            _ = shutdown.changed() => {
                tracing::debug!("Adaptive poller shutting down");
                return;
            }
        }
    }
}

async fn cycle(ctx: &StrategyContext, status: &StatusHandle, state: &mut AdaptiveState) {
    let now = Instant::now();
    if !state.may_fetch(now) {
        tracing::debug!("Rate limiting: skipping fetch request");
        return;
    }

    let access = ctx.store.wallet_access().await;
    if !access.has_any() {
        return;
    }
    state.mark_fetch(now);

    status
        .update(|s| {
            s.is_loading = true;
            s.error = None;
        })
        .await;

    let mut changed = false;
    let mut failed = false;

    for feed in access.accessible_feeds.iter().copied() {
        match ctx.fetcher.fetch(feed).await {
            Ok(snapshots) => {
                let hash = snapshot_hash(&snapshots);
                if state.observe(feed, hash) {
                    changed = true;
                    if ctx.store.apply_snapshots(feed, snapshots.clone()).await {
                        ctx.persister.persist_best_effort(&snapshots).await;
                    }
                    tracing::debug!("{} data changed - updating", feed);
                } else {
                    tracing::debug!("{} data unchanged - skipping update", feed);
                }
                status.update(|s| s.last_update = Some(Utc::now())).await;
            }
            Err(e) => {
                tracing::warn!("Error fetching {} data: {}", feed, e);
                failed = true;
                status.update(|s| s.error = Some(e.to_string())).await;
            }
        }
    }

    if failed {
        state.on_error();
    } else {
        state.on_tick(changed);
    }

    let interval = state.current_interval;
    status
        .update(|s| {
            s.is_loading = false;
            s.current_interval = Some(interval);
        })
        .await;
}

/// Content hash of the fields that indicate a real data change: exchange
/// identity plus price, volume, and balance. The full payload is
/// deliberately excluded so cosmetic series churn does not defeat backoff.
pub fn snapshot_hash(snapshots: &[ExchangeSnapshot]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for s in snapshots {
        s.exchange.hash(&mut hasher);
        s.pair.hash(&mut hasher);
        s.internal_pricing.to_bits().hash(&mut hasher);
        s.generated_volume.to_bits().hash(&mut hasher);
        s.balance_usdt.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

/// Interval after `consecutive` unchanged ticks, clamped to [min, max]
pub fn unchanged_interval(
    base: Duration,
    min: Duration,
    max: Duration,
    consecutive: u32,
) -> Duration {
    let multiplier = BACKOFF_FACTOR.powi(consecutive as i32).min(MAX_MULTIPLIER);
    base.mul_f64(multiplier).min(max).max(min)
}

/// Mutable scheduling state of the adaptive poller
pub struct AdaptiveState {
    base: Duration,
    min: Duration,
    max: Duration,
    pub current_interval: Duration,
    consecutive_no_change: u32,
    last_hashes: HashMap<Feed, u64>,
    last_fetch: Option<Instant>,
}

impl AdaptiveState {
    pub fn new(tuning: &StrategyTuning) -> Self {
        Self {
            base: tuning.base_interval,
            min: tuning.min_interval,
            max: tuning.max_interval,
            current_interval: tuning.base_interval,
            consecutive_no_change: 0,
            last_hashes: HashMap::new(),
            last_fetch: None,
        }
    }

    /// Rate limit: a fetch sooner than min_interval after the previous one
    /// is suppressed
    pub fn may_fetch(&self, now: Instant) -> bool {
        match self.last_fetch {
            Some(last) => now.duration_since(last) >= self.min,
            None => true,
        }
    }

    pub fn mark_fetch(&mut self, now: Instant) {
        self.last_fetch = Some(now);
    }

    /// Record a feed's content hash; returns whether it differs from the
    /// previous one for that feed
    pub fn observe(&mut self, feed: Feed, hash: u64) -> bool {
        self.last_hashes.insert(feed, hash) != Some(hash)
    }

    /// Advance the interval after a clean tick
    pub fn on_tick(&mut self, changed: bool) {
        if changed {
            self.consecutive_no_change = 0;
            self.current_interval = self.base;
        } else {
            self.consecutive_no_change += 1;
            self.current_interval = unchanged_interval(
                self.base,
                self.min,
                self.max,
                self.consecutive_no_change,
            );
        }
    }

    /// A fetch error doubles the interval (capped) without touching the
    /// no-change counter
    pub fn on_error(&mut self) {
        self.current_interval = (self.current_interval * 2).min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> StrategyTuning {
        StrategyTuning {
            base_interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(120),
            sse_url: String::new(),
            ws_url: String::new(),
        }
    }

    fn snapshots(price: f64, volume: f64) -> Vec<ExchangeSnapshot> {
        serde_json::from_value(serde_json::json!([{
            "exchange": "mexc",
            "pair": "KOM/USDT",
            "internal_pricing": price,
            "generated_volume": volume,
            "balance_usdt": 1000.0,
            "spread": 0.4,
        }]))
        .unwrap()
    }

    #[test]
    fn identical_tracked_fields_hash_equal() {
        // The spread differs but is not a tracked field.
        let mut a = snapshots(1.5, 100.0);
        let b = snapshots(1.5, 100.0);
        a[0].spread = 0.9;
        assert_eq!(snapshot_hash(&a), snapshot_hash(&b));
    }

    #[test]
    fn tracked_field_change_alters_the_hash() {
        assert_ne!(
            snapshot_hash(&snapshots(1.5, 100.0)),
            snapshot_hash(&snapshots(1.6, 100.0))
        );
    }

    #[test]
    fn unchanged_ticks_stretch_the_interval() {
        let mut state = AdaptiveState::new(&tuning());

        state.on_tick(false);
        assert_eq!(state.current_interval, Duration::from_secs(45)); // 30 * 1.5
        state.on_tick(false);
        assert_eq!(state.current_interval, Duration::from_millis(67_500)); // 30 * 2.25
        for _ in 0..10 {
            state.on_tick(false);
        }
        // Multiplier caps at 4x, which also matches the max bound here.
        assert_eq!(state.current_interval, Duration::from_secs(120));
    }

    #[test]
    fn a_change_resets_to_the_base_interval() {
        let mut state = AdaptiveState::new(&tuning());
        for _ in 0..5 {
            state.on_tick(false);
        }
        assert!(state.current_interval > state.base);

        state.on_tick(true);
        assert_eq!(state.current_interval, Duration::from_secs(30));

        // And the counter restarts from scratch.
        state.on_tick(false);
        assert_eq!(state.current_interval, Duration::from_secs(45));
    }

    #[test]
    fn equal_hash_must_not_reset_the_interval() {
        let mut state = AdaptiveState::new(&tuning());
        let hash = snapshot_hash(&snapshots(1.5, 100.0));

        assert!(state.observe(Feed::Kom, hash)); // first sighting counts as change
        state.on_tick(true);

        assert!(!state.observe(Feed::Kom, hash));
        state.on_tick(false);
        assert!(state.current_interval > state.base);
    }

    #[test]
    fn hash_state_is_tracked_per_feed() {
        let mut state = AdaptiveState::new(&tuning());
        let hash = snapshot_hash(&snapshots(1.5, 100.0));

        assert!(state.observe(Feed::Kom, hash));
        // The same content on the other feed is still a first sighting.
        assert!(state.observe(Feed::Bba, hash));
        assert!(!state.observe(Feed::Kom, hash));
    }

    #[test]
    fn errors_double_the_interval_up_to_max() {
        let mut state = AdaptiveState::new(&tuning());

        state.on_error();
        assert_eq!(state.current_interval, Duration::from_secs(60));
        state.on_error();
        assert_eq!(state.current_interval, Duration::from_secs(120));
        state.on_error();
        assert_eq!(state.current_interval, Duration::from_secs(120));
    }

    #[test]
    fn rate_limit_suppresses_early_fetches() {
        let mut state = AdaptiveState::new(&tuning());
        let start = Instant::now();

        assert!(state.may_fetch(start));
        state.mark_fetch(start);
        assert!(!state.may_fetch(start + Duration::from_secs(5)));
        assert!(state.may_fetch(start + Duration::from_secs(10)));
    }

    #[test]
    fn unchanged_interval_is_clamped_growth() {
        let base = Duration::from_secs(30);
        let min = Duration::from_secs(10);
        let max = Duration::from_secs(120);

        for n in 1..=8u32 {
            let expected = base
                .mul_f64(1.5f64.powi(n as i32).min(4.0))
                .min(max)
                .max(min);
            assert_eq!(unchanged_interval(base, min, max, n), expected);
        }
    }
}
