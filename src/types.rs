use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two independently access-controlled data feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Feed {
    Kom,
    Bba,
}

impl Feed {
    pub const ALL: [Feed; 2] = [Feed::Kom, Feed::Bba];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Kom => "KOM",
            Feed::Bba => "BBA",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "KOM" => Ok(Feed::Kom),
            "BBA" => Ok(Feed::Bba),
            other => Err(format!("unknown feed: {other}")),
        }
    }
}

/// One feed's current state for a single exchange/pair, as served by the
/// upstream JSON endpoint.
///
/// The depth fields use the current upstream schema
/// (`mm_depth_*` / `organic_depth_*`); the older `depth_plus_2` /
/// `depth_minus_2` generation is still accepted on deserialization via
/// aliases but never written back out under the old names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    pub exchange: String,
    pub pair: String,
    #[serde(default)]
    pub internal_pricing: f64,
    #[serde(default)]
    pub generated_volume: f64,
    #[serde(default)]
    pub balance_usdt: f64,
    #[serde(default)]
    pub balance_token: f64,
    #[serde(default)]
    pub deployed_buy: f64,
    #[serde(default)]
    pub deployed_sell: f64,
    #[serde(default)]
    pub estimated_fee: f64,
    #[serde(default)]
    pub spread: f64,
    #[serde(default)]
    pub avg_24h_price: f64,
    #[serde(default, alias = "depth_plus_2")]
    pub mm_depth_plus_2: f64,
    #[serde(default, alias = "depth_minus_2")]
    pub mm_depth_minus_2: f64,
    #[serde(default)]
    pub organic_depth_plus_2: f64,
    #[serde(default)]
    pub organic_depth_minus_2: f64,

    // Trailing-24h series, oldest first, implicitly spaced at 24h / len.
    // The volume series arrives as strings upstream and is parsed on read.
    #[serde(default)]
    pub volume_24h_statistic: Vec<String>,
    #[serde(default)]
    pub spread_24h_statistic: Vec<f64>,
    #[serde(default, alias = "depth_plus_2_24h_statistic")]
    pub mm_depth_plus_2_24h_statistic: Vec<f64>,
    #[serde(default, alias = "depth_minus_2_24h_statistic")]
    pub mm_depth_minus_2_24h_statistic: Vec<f64>,
    #[serde(default)]
    pub organic_depth_plus_2_24h_statistic: Vec<f64>,
    #[serde(default)]
    pub organic_depth_minus_2_24h_statistic: Vec<f64>,
    #[serde(default)]
    pub usdt_balance_24h_statistic: Vec<f64>,
    #[serde(default)]
    pub token_balance_24h_statistic: Vec<f64>,
}

/// One persisted historical sample, used for 24h delta computation
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetricRow {
    #[serde(default)]
    pub id: Option<i64>,
    pub exchange: String,
    pub pair: String,
    pub current_price: f64,
    pub last_vol_24h: f64,
    pub mm_depth_plus_2: f64,
    pub mm_depth_minus_2: f64,
    pub organic_depth_plus_2: f64,
    pub organic_depth_minus_2: f64,
    /// Unix seconds, assigned by the persister at insert time
    pub created_at: i64,
}

/// 24h percentage deltas for one (exchange, pair)
#[derive(Debug, Clone, PartialEq)]
pub struct PercentageChanges {
    pub price_change: f64,
    pub volume_change: f64,
    pub mm_depth_plus_change: f64,
    pub mm_depth_minus_change: f64,
    pub organic_depth_plus_change: f64,
    pub organic_depth_minus_change: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_parses_case_insensitively() {
        assert_eq!("kom".parse::<Feed>().unwrap(), Feed::Kom);
        assert_eq!("BBA".parse::<Feed>().unwrap(), Feed::Bba);
        assert!("ETH".parse::<Feed>().is_err());
    }

    #[test]
    fn snapshot_accepts_legacy_depth_fields() {
        // The upstream feed still serves the previous-generation names.
        let json = r#"{
            "exchange": "mexc",
            "pair": "KOM/USDT",
            "internal_pricing": 0.0012,
            "generated_volume": 54321.0,
            "balance_usdt": 1000.5,
            "depth_plus_2": 42.0,
            "depth_minus_2": 41.0,
            "volume_24h_statistic": ["10", "20"],
            "depth_plus_2_24h_statistic": [1.0, 2.0]
        }"#;

        let snap: ExchangeSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.mm_depth_plus_2, 42.0);
        assert_eq!(snap.mm_depth_minus_2, 41.0);
        assert_eq!(snap.mm_depth_plus_2_24h_statistic, vec![1.0, 2.0]);
        // Fields the old payloads never carried default to empty/zero.
        assert_eq!(snap.organic_depth_plus_2, 0.0);
        assert!(snap.usdt_balance_24h_statistic.is_empty());
    }

    #[test]
    fn snapshot_accepts_canonical_depth_fields() {
        let json = r#"{
            "exchange": "gate",
            "pair": "BBA/USDT",
            "mm_depth_plus_2": 7.0,
            "organic_depth_plus_2": 3.0
        }"#;

        let snap: ExchangeSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.mm_depth_plus_2, 7.0);
        assert_eq!(snap.organic_depth_plus_2, 3.0);
    }
}
