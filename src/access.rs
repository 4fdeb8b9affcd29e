use crate::config::Config;
use crate::types::Feed;

/// Capability set derived from the connected wallet address.
///
/// Recomputed on every wallet change; never persisted. This is the sole
/// authorization gate for every downstream fetch and display decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletAccess {
    pub has_kom_access: bool,
    pub has_bba_access: bool,
    pub accessible_feeds: Vec<Feed>,
    pub current_wallet: Option<String>,
    pub is_connected: bool,
}

impl WalletAccess {
    pub fn has_feed(&self, feed: Feed) -> bool {
        match feed {
            Feed::Kom => self.has_kom_access,
            Feed::Bba => self.has_bba_access,
        }
    }

    pub fn has_any(&self) -> bool {
        self.has_kom_access || self.has_bba_access
    }
}

/// Evaluate which feeds a wallet address may view.
///
/// Matching is case-insensitive against each feed's allow-list; no address
/// means no access to either feed.
pub fn evaluate(address: Option<&str>, config: &Config) -> WalletAccess {
    let has_kom_access = address
        .map(|addr| matches_allow_list(addr, config.owner_wallets(Feed::Kom)))
        .unwrap_or(false);
    let has_bba_access = address
        .map(|addr| matches_allow_list(addr, config.owner_wallets(Feed::Bba)))
        .unwrap_or(false);

    let mut accessible_feeds = Vec::new();
    if has_kom_access {
        accessible_feeds.push(Feed::Kom);
    }
    if has_bba_access {
        accessible_feeds.push(Feed::Bba);
    }

    WalletAccess {
        has_kom_access,
        has_bba_access,
        accessible_feeds,
        current_wallet: address.map(|a| a.to_string()),
        is_connected: address.is_some(),
    }
}

fn matches_allow_list(address: &str, allow_list: &[String]) -> bool {
    allow_list
        .iter()
        .any(|wallet| wallet.eq_ignore_ascii_case(address))
}
