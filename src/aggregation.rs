use crate::types::{ExchangeSnapshot, MetricRow, PercentageChanges};

/// Cross-exchange aggregate of one feed's current snapshot array.
///
/// Totals are sums, rates and depths are arithmetic means, and the combined
/// series are element-wise means padded to the longest input series.
#[derive(Debug, Clone, PartialEq)]
pub struct OverviewData {
    pub exchange_count: usize,
    pub exchanges: Vec<String>,
    pub pairs: Vec<String>,

    pub total_usdt_balance: f64,
    pub total_token_balance: f64,
    pub total_deployed_buy: f64,
    pub total_deployed_sell: f64,
    pub total_estimated_fee: f64,
    pub total_generated_volume: f64,

    pub avg_internal_pricing: f64,
    pub avg_spread: f64,
    pub avg_mm_depth_plus_2: f64,
    pub avg_mm_depth_minus_2: f64,
    pub avg_organic_depth_plus_2: f64,
    pub avg_organic_depth_minus_2: f64,

    pub combined_volume_24h_statistic: Vec<f64>,
    pub combined_spread_24h_statistic: Vec<f64>,
    pub combined_mm_depth_plus_2_24h_statistic: Vec<f64>,
    pub combined_mm_depth_minus_2_24h_statistic: Vec<f64>,
    pub combined_organic_depth_plus_2_24h_statistic: Vec<f64>,
    pub combined_organic_depth_minus_2_24h_statistic: Vec<f64>,
    pub combined_usdt_balance_24h_statistic: Vec<f64>,
    pub combined_token_balance_24h_statistic: Vec<f64>,
}

/// Percentage change between two values; a zero baseline means "no prior
/// baseline" and yields 0 rather than NaN or infinity.
pub fn percentage_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    (current - previous) / previous * 100.0
}

/// 24h deltas comparing the oldest row in the window to the newest.
///
/// Rows must be ascending by time, as returned by the history query.
/// Returns None when fewer than two rows exist in the window.
pub fn percentage_changes(rows: &[MetricRow]) -> Option<PercentageChanges> {
    if rows.len() < 2 {
        return None;
    }

    let previous = &rows[0];
    let current = &rows[rows.len() - 1];

    Some(PercentageChanges {
        price_change: percentage_change(current.current_price, previous.current_price),
        volume_change: percentage_change(current.last_vol_24h, previous.last_vol_24h),
        mm_depth_plus_change: percentage_change(
            current.mm_depth_plus_2,
            previous.mm_depth_plus_2,
        ),
        mm_depth_minus_change: percentage_change(
            current.mm_depth_minus_2,
            previous.mm_depth_minus_2,
        ),
        organic_depth_plus_change: percentage_change(
            current.organic_depth_plus_2,
            previous.organic_depth_plus_2,
        ),
        organic_depth_minus_change: percentage_change(
            current.organic_depth_minus_2,
            previous.organic_depth_minus_2,
        ),
    })
}

/// Combine the current feed's snapshots into the overview aggregate.
///
/// An empty input yields None - the "no data" case the caller renders as a
/// placeholder rather than an error.
pub fn overview(snapshots: &[ExchangeSnapshot]) -> Option<OverviewData> {
    if snapshots.is_empty() {
        return None;
    }

    let count = snapshots.len() as f64;

    let volume_series: Vec<Vec<Option<f64>>> = snapshots
        .iter()
        .map(|s| parse_volume_series(&s.volume_24h_statistic))
        .collect();

    Some(OverviewData {
        exchange_count: snapshots.len(),
        exchanges: snapshots.iter().map(|s| s.exchange.clone()).collect(),
        pairs: snapshots.iter().map(|s| s.pair.clone()).collect(),

        total_usdt_balance: snapshots.iter().map(|s| s.balance_usdt).sum(),
        total_token_balance: snapshots.iter().map(|s| s.balance_token).sum(),
        total_deployed_buy: snapshots.iter().map(|s| s.deployed_buy).sum(),
        total_deployed_sell: snapshots.iter().map(|s| s.deployed_sell).sum(),
        total_estimated_fee: snapshots.iter().map(|s| s.estimated_fee).sum(),
        total_generated_volume: snapshots.iter().map(|s| s.generated_volume).sum(),

        avg_internal_pricing: snapshots.iter().map(|s| s.internal_pricing).sum::<f64>() / count,
        avg_spread: snapshots.iter().map(|s| s.spread).sum::<f64>() / count,
        avg_mm_depth_plus_2: snapshots.iter().map(|s| s.mm_depth_plus_2).sum::<f64>() / count,
        avg_mm_depth_minus_2: snapshots.iter().map(|s| s.mm_depth_minus_2).sum::<f64>() / count,
        avg_organic_depth_plus_2: snapshots.iter().map(|s| s.organic_depth_plus_2).sum::<f64>()
            / count,
        avg_organic_depth_minus_2: snapshots
            .iter()
            .map(|s| s.organic_depth_minus_2)
            .sum::<f64>()
            / count,

        combined_volume_24h_statistic: element_wise_mean(&volume_series),
        combined_spread_24h_statistic: combine(snapshots, |s| &s.spread_24h_statistic),
        combined_mm_depth_plus_2_24h_statistic: combine(snapshots, |s| {
            &s.mm_depth_plus_2_24h_statistic
        }),
        combined_mm_depth_minus_2_24h_statistic: combine(snapshots, |s| {
            &s.mm_depth_minus_2_24h_statistic
        }),
        combined_organic_depth_plus_2_24h_statistic: combine(snapshots, |s| {
            &s.organic_depth_plus_2_24h_statistic
        }),
        combined_organic_depth_minus_2_24h_statistic: combine(snapshots, |s| {
            &s.organic_depth_minus_2_24h_statistic
        }),
        combined_usdt_balance_24h_statistic: combine(snapshots, |s| {
            &s.usdt_balance_24h_statistic
        }),
        combined_token_balance_24h_statistic: combine(snapshots, |s| {
            &s.token_balance_24h_statistic
        }),
    })
}

fn combine<'a, F>(snapshots: &'a [ExchangeSnapshot], series: F) -> Vec<f64>
where
    F: Fn(&'a ExchangeSnapshot) -> &'a Vec<f64>,
{
    let series: Vec<Vec<Option<f64>>> = snapshots
        .iter()
        .map(|s| series(s).iter().copied().map(Some).collect())
        .collect();
    element_wise_mean(&series)
}

/// Element-wise mean across series of unequal length. Positions a series
/// does not reach, or marks absent, are excluded from that position's mean
/// rather than counted as zero.
fn element_wise_mean(series: &[Vec<Option<f64>>]) -> Vec<f64> {
    let max_len = series.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut combined = Vec::with_capacity(max_len);

    for idx in 0..max_len {
        let mut sum = 0.0;
        let mut present = 0usize;
        for s in series {
            if let Some(Some(v)) = s.get(idx) {
                sum += v;
                present += 1;
            }
        }
        combined.push(if present == 0 { 0.0 } else { sum / present as f64 });
    }

    combined
}

/// The volume series arrives as strings; an unparseable entry is absent at
/// its position, keeping later entries aligned with the other exchanges'
/// series.
fn parse_volume_series(raw: &[String]) -> Vec<Option<f64>> {
    raw.iter()
        .map(|v| v.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(price: f64, volume: f64, created_at: i64) -> MetricRow {
        MetricRow {
            id: None,
            exchange: "mexc".into(),
            pair: "KOM/USDT".into(),
            current_price: price,
            last_vol_24h: volume,
            mm_depth_plus_2: 10.0,
            mm_depth_minus_2: 10.0,
            organic_depth_plus_2: 0.0,
            organic_depth_minus_2: 0.0,
            created_at,
        }
    }

    fn snapshot(exchange: &str, usdt: f64, price: f64) -> ExchangeSnapshot {
        ExchangeSnapshot {
            exchange: exchange.to_string(),
            pair: format!("{exchange}/USDT"),
            internal_pricing: price,
            generated_volume: 100.0,
            balance_usdt: usdt,
            balance_token: 50.0,
            deployed_buy: 10.0,
            deployed_sell: 20.0,
            estimated_fee: 1.0,
            spread: 0.5,
            avg_24h_price: price,
            mm_depth_plus_2: 4.0,
            mm_depth_minus_2: 6.0,
            organic_depth_plus_2: 1.0,
            organic_depth_minus_2: 2.0,
            volume_24h_statistic: vec!["10".into(), "20".into()],
            spread_24h_statistic: vec![0.4, 0.6],
            mm_depth_plus_2_24h_statistic: vec![1.0, 2.0],
            mm_depth_minus_2_24h_statistic: vec![1.0, 2.0],
            organic_depth_plus_2_24h_statistic: vec![],
            organic_depth_minus_2_24h_statistic: vec![],
            usdt_balance_24h_statistic: vec![100.0, 110.0],
            token_balance_24h_statistic: vec![50.0],
        }
    }

    #[test]
    fn zero_baseline_yields_zero_not_nan() {
        let change = percentage_change(42.0, 0.0);
        assert_eq!(change, 0.0);
        assert!(change.is_finite());
    }

    #[test]
    fn doubled_value_is_one_hundred_percent() {
        assert_eq!(percentage_change(200.0, 100.0), 100.0);
        assert_eq!(percentage_change(50.0, 100.0), -50.0);
    }

    #[test]
    fn single_row_window_has_no_deltas() {
        assert!(percentage_changes(&[row(1.0, 1.0, 0)]).is_none());
        assert!(percentage_changes(&[]).is_none());
    }

    #[test]
    fn deltas_compare_oldest_to_newest() {
        let rows = vec![row(100.0, 1000.0, 0), row(110.0, 900.0, 60), row(150.0, 500.0, 120)];
        let changes = percentage_changes(&rows).unwrap();
        assert_eq!(changes.price_change, 50.0);
        assert_eq!(changes.volume_change, -50.0);
        // Identical depth values across the window.
        assert_eq!(changes.mm_depth_plus_change, 0.0);
    }

    #[test]
    fn empty_overview_is_none() {
        assert!(overview(&[]).is_none());
    }

    #[test]
    fn balances_are_summed_across_exchanges() {
        let data = overview(&[snapshot("mexc", 100.0, 2.0), snapshot("gate", 200.0, 4.0)]).unwrap();
        assert_eq!(data.total_usdt_balance, 300.0);
        assert_eq!(data.total_token_balance, 100.0);
        assert_eq!(data.total_deployed_buy, 20.0);
        assert_eq!(data.total_generated_volume, 200.0);
        assert_eq!(data.exchange_count, 2);
    }

    #[test]
    fn prices_and_depths_are_averaged() {
        let data = overview(&[snapshot("mexc", 0.0, 2.0), snapshot("gate", 0.0, 4.0)]).unwrap();
        assert_eq!(data.avg_internal_pricing, 3.0);
        assert_eq!(data.avg_spread, 0.5);
        assert_eq!(data.avg_mm_depth_plus_2, 4.0);
    }

    #[test]
    fn series_are_combined_element_wise() {
        let data = overview(&[snapshot("mexc", 0.0, 1.0), snapshot("gate", 0.0, 1.0)]).unwrap();
        assert_eq!(data.combined_usdt_balance_24h_statistic, vec![100.0, 110.0]);
        assert_eq!(data.combined_volume_24h_statistic, vec![10.0, 20.0]);
    }

    #[test]
    fn ragged_series_exclude_missing_positions() {
        let mut short = snapshot("mexc", 0.0, 1.0);
        short.usdt_balance_24h_statistic = vec![100.0];
        let mut long = snapshot("gate", 0.0, 1.0);
        long.usdt_balance_24h_statistic = vec![200.0, 300.0, 400.0];

        let data = overview(&[short, long]).unwrap();
        // Index 0 averages both; later indexes only the longer series.
        assert_eq!(
            data.combined_usdt_balance_24h_statistic,
            vec![150.0, 300.0, 400.0]
        );
    }

    #[test]
    fn unparseable_volume_entries_keep_positions_aligned() {
        let mut gappy = snapshot("mexc", 0.0, 1.0);
        gappy.volume_24h_statistic = vec!["10".into(), "oops".into(), "30".into()];
        let mut clean = snapshot("gate", 0.0, 1.0);
        clean.volume_24h_statistic = vec!["20".into(), "40".into(), "60".into()];

        let data = overview(&[gappy, clean]).unwrap();
        // The bad entry drops out of position 1's mean without shifting
        // position 2 leftward.
        assert_eq!(data.combined_volume_24h_statistic, vec![15.0, 40.0, 45.0]);
    }

    #[test]
    fn non_finite_volume_entries_are_absent_too() {
        let mut snap = snapshot("mexc", 0.0, 1.0);
        snap.volume_24h_statistic = vec!["10".into(), "inf".into(), "NaN".into()];
        let data = overview(&[snap]).unwrap();
        assert_eq!(data.combined_volume_24h_statistic, vec![10.0, 0.0, 0.0]);
    }
}
