use crate::access::WalletAccess;
use crate::aggregation::{self, OverviewData};
use crate::types::{ExchangeSnapshot, Feed};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoreState {
    kom_snapshots: Vec<ExchangeSnapshot>,
    bba_snapshots: Vec<ExchangeSnapshot>,
    selected_feed: Option<Feed>,
    selected_exchange: Option<String>,
    wallet_access: WalletAccess,
}

/// Shared state container for the dashboard core.
///
/// Every update strategy receives a clone of this handle instead of touching
/// a process-global; consistency is last-write-wins by completion order.
#[derive(Clone, Default)]
pub struct ExchangeStore {
    state: Arc<RwLock<StoreState>>,
}

impl ExchangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one feed's snapshots wholesale.
    ///
    /// Stale-response guard: a payload whose feed the current wallet access
    /// no longer grants is rejected, so a slow response for a revoked feed
    /// cannot resurrect data the user should not see. Returns whether the
    /// write was applied.
    pub async fn apply_snapshots(&self, feed: Feed, snapshots: Vec<ExchangeSnapshot>) -> bool {
        let mut state = self.state.write().await;

        if !state.wallet_access.has_feed(feed) {
            tracing::warn!("Dropping stale {} payload: feed access revoked", feed);
            return false;
        }

        match feed {
            Feed::Kom => state.kom_snapshots = snapshots,
            Feed::Bba => state.bba_snapshots = snapshots,
        }
        true
    }

    /// Install a freshly evaluated capability set.
    ///
    /// Snapshots of any feed the new capability revokes are cleared, and the
    /// selected feed is re-homed to an accessible one (or cleared).
    pub async fn set_wallet_access(&self, access: WalletAccess) {
        let mut state = self.state.write().await;

        if !access.has_kom_access {
            state.kom_snapshots.clear();
        }
        if !access.has_bba_access {
            state.bba_snapshots.clear();
        }

        let selected_ok = state
            .selected_feed
            .map(|feed| access.has_feed(feed))
            .unwrap_or(false);
        if !selected_ok {
            state.selected_feed = access.accessible_feeds.first().copied();
            state.selected_exchange = None;
        }

        state.wallet_access = access;
    }

    pub async fn set_selected_feed(&self, feed: Option<Feed>) -> bool {
        let mut state = self.state.write().await;
        match feed {
            Some(feed) if !state.wallet_access.has_feed(feed) => false,
            _ => {
                if state.selected_feed != feed {
                    state.selected_exchange = None;
                }
                state.selected_feed = feed;
                true
            }
        }
    }

    pub async fn set_selected_exchange(&self, exchange: Option<String>) {
        self.state.write().await.selected_exchange = exchange;
    }

    pub async fn wallet_access(&self) -> WalletAccess {
        self.state.read().await.wallet_access.clone()
    }

    pub async fn selected_feed(&self) -> Option<Feed> {
        self.state.read().await.selected_feed
    }

    pub async fn selected_exchange(&self) -> Option<String> {
        self.state.read().await.selected_exchange.clone()
    }

    pub async fn snapshots(&self, feed: Feed) -> Vec<ExchangeSnapshot> {
        let state = self.state.read().await;
        match feed {
            Feed::Kom => state.kom_snapshots.clone(),
            Feed::Bba => state.bba_snapshots.clone(),
        }
    }

    /// The selected feed's snapshot array, empty when nothing is selected
    pub async fn current_snapshots(&self) -> Vec<ExchangeSnapshot> {
        let state = self.state.read().await;
        match state.selected_feed {
            Some(Feed::Kom) => state.kom_snapshots.clone(),
            Some(Feed::Bba) => state.bba_snapshots.clone(),
            None => Vec::new(),
        }
    }

    /// The selected exchange's snapshot within the selected feed
    pub async fn selected_snapshot(&self) -> Option<ExchangeSnapshot> {
        let state = self.state.read().await;
        let snapshots = match state.selected_feed {
            Some(Feed::Kom) => &state.kom_snapshots,
            Some(Feed::Bba) => &state.bba_snapshots,
            None => return None,
        };
        match &state.selected_exchange {
            Some(exchange) => snapshots.iter().find(|s| &s.exchange == exchange).cloned(),
            None => snapshots.first().cloned(),
        }
    }

    /// Cross-exchange overview of the selected feed, recomputed per read
    pub async fn overview(&self) -> Option<OverviewData> {
        let state = self.state.read().await;
        let snapshots = match state.selected_feed {
            Some(Feed::Kom) => &state.kom_snapshots,
            Some(Feed::Bba) => &state.bba_snapshots,
            None => return None,
        };
        aggregation::overview(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(exchange: &str) -> ExchangeSnapshot {
        serde_json::from_value(serde_json::json!({
            "exchange": exchange,
            "pair": format!("{exchange}/USDT"),
            "internal_pricing": 1.0,
            "balance_usdt": 100.0,
        }))
        .unwrap()
    }

    fn access(kom: bool, bba: bool) -> WalletAccess {
        let mut accessible_feeds = Vec::new();
        if kom {
            accessible_feeds.push(Feed::Kom);
        }
        if bba {
            accessible_feeds.push(Feed::Bba);
        }
        WalletAccess {
            has_kom_access: kom,
            has_bba_access: bba,
            accessible_feeds,
            current_wallet: Some("0xabc".into()),
            is_connected: true,
        }
    }

    #[tokio::test]
    async fn stale_response_for_revoked_feed_is_rejected() {
        let store = ExchangeStore::new();
        store.set_wallet_access(access(true, true)).await;
        assert!(store.apply_snapshots(Feed::Kom, vec![snapshot("mexc")]).await);

        // Wallet switches to BBA-only while a KOM fetch is in flight.
        store.set_wallet_access(access(false, true)).await;
        store.apply_snapshots(Feed::Bba, vec![snapshot("gate")]).await;

        // The late KOM payload must not land.
        assert!(!store.apply_snapshots(Feed::Kom, vec![snapshot("mexc")]).await);
        assert!(store.snapshots(Feed::Kom).await.is_empty());
        assert_eq!(store.selected_feed().await, Some(Feed::Bba));
        assert_eq!(store.current_snapshots().await.len(), 1);
    }

    #[tokio::test]
    async fn revoking_access_clears_the_feed() {
        let store = ExchangeStore::new();
        store.set_wallet_access(access(true, false)).await;
        store.apply_snapshots(Feed::Kom, vec![snapshot("mexc")]).await;

        store.set_wallet_access(WalletAccess::default()).await;
        assert!(store.snapshots(Feed::Kom).await.is_empty());
        assert_eq!(store.selected_feed().await, None);
    }

    #[tokio::test]
    async fn cannot_select_an_inaccessible_feed() {
        let store = ExchangeStore::new();
        store.set_wallet_access(access(true, false)).await;

        assert!(!store.set_selected_feed(Some(Feed::Bba)).await);
        assert_eq!(store.selected_feed().await, Some(Feed::Kom));
        assert!(store.set_selected_feed(Some(Feed::Kom)).await);
    }

    #[tokio::test]
    async fn feed_switch_resets_exchange_selection() {
        let store = ExchangeStore::new();
        store.set_wallet_access(access(true, true)).await;
        store.set_selected_exchange(Some("mexc".into())).await;

        store.set_selected_feed(Some(Feed::Bba)).await;
        assert_eq!(store.selected_exchange().await, None);
    }

    #[tokio::test]
    async fn overview_reads_the_selected_feed() {
        let store = ExchangeStore::new();
        store.set_wallet_access(access(true, true)).await;
        store
            .apply_snapshots(Feed::Kom, vec![snapshot("mexc"), snapshot("gate")])
            .await;

        store.set_selected_feed(Some(Feed::Kom)).await;
        let data = store.overview().await.unwrap();
        assert_eq!(data.exchange_count, 2);
        assert_eq!(data.total_usdt_balance, 200.0);

        store.set_selected_feed(Some(Feed::Bba)).await;
        assert!(store.overview().await.is_none());
    }
}
