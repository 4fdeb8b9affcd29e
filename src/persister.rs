use crate::database::DbPool;
use crate::error::DashboardError;
use crate::types::{ExchangeSnapshot, MetricRow};
use chrono::Utc;

/// Appends fetched snapshots to the historical metrics table and reads
/// trailing windows back for delta computation.
///
/// Writes are best-effort: the table is a side archive, never the source of
/// truth for the current display.
#[derive(Clone)]
pub struct MetricsPersister {
    db: DbPool,
}

impl MetricsPersister {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Write one MetricRow per snapshot, stamping `created_at` at insert time
    pub async fn save_snapshots(
        &self,
        snapshots: &[ExchangeSnapshot],
    ) -> Result<Vec<MetricRow>, DashboardError> {
        let created_at = Utc::now().timestamp();
        let mut rows = Vec::with_capacity(snapshots.len());

        for snapshot in snapshots {
            let id = sqlx::query(
                r#"
                INSERT INTO exchange_metrics
                (exchange, pair, current_price, last_vol_24h,
                 mm_depth_plus_2, mm_depth_minus_2,
                 organic_depth_plus_2, organic_depth_minus_2, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&snapshot.exchange)
            .bind(&snapshot.pair)
            .bind(snapshot.internal_pricing)
            .bind(snapshot.generated_volume)
            .bind(snapshot.mm_depth_plus_2)
            .bind(snapshot.mm_depth_minus_2)
            .bind(snapshot.organic_depth_plus_2)
            .bind(snapshot.organic_depth_minus_2)
            .bind(created_at)
            .execute(&self.db)
            .await?
            .last_insert_rowid();

            rows.push(MetricRow {
                id: Some(id),
                exchange: snapshot.exchange.clone(),
                pair: snapshot.pair.clone(),
                current_price: snapshot.internal_pricing,
                last_vol_24h: snapshot.generated_volume,
                mm_depth_plus_2: snapshot.mm_depth_plus_2,
                mm_depth_minus_2: snapshot.mm_depth_minus_2,
                organic_depth_plus_2: snapshot.organic_depth_plus_2,
                organic_depth_minus_2: snapshot.organic_depth_minus_2,
                created_at,
            });
        }

        Ok(rows)
    }

    /// Best-effort persistence: failures are logged and swallowed so they
    /// never block or roll back the store update that triggered them.
    pub async fn persist_best_effort(&self, snapshots: &[ExchangeSnapshot]) {
        if snapshots.is_empty() {
            return;
        }
        if let Err(e) = self.save_snapshots(snapshots).await {
            tracing::warn!("Failed to save metrics: {}", e);
        }
    }

    /// Rows for one (exchange, pair) within the trailing window, ascending
    /// by creation time
    pub async fn history(
        &self,
        exchange: &str,
        pair: &str,
        hours: i64,
    ) -> Result<Vec<MetricRow>, DashboardError> {
        let cutoff = Utc::now().timestamp() - hours * 3600;

        let rows = sqlx::query_as::<_, MetricRow>(
            r#"
            SELECT id, exchange, pair, current_price, last_vol_24h,
                   mm_depth_plus_2, mm_depth_minus_2,
                   organic_depth_plus_2, organic_depth_minus_2, created_at
            FROM exchange_metrics
            WHERE exchange = ? AND pair = ? AND created_at >= ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(exchange)
        .bind(pair)
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_test_database;

    fn snapshot(exchange: &str, pair: &str, price: f64, volume: f64) -> ExchangeSnapshot {
        ExchangeSnapshot {
            exchange: exchange.to_string(),
            pair: pair.to_string(),
            internal_pricing: price,
            generated_volume: volume,
            balance_usdt: 0.0,
            balance_token: 0.0,
            deployed_buy: 0.0,
            deployed_sell: 0.0,
            estimated_fee: 0.0,
            spread: 0.0,
            avg_24h_price: 0.0,
            mm_depth_plus_2: 12.5,
            mm_depth_minus_2: 11.5,
            organic_depth_plus_2: 3.0,
            organic_depth_minus_2: 2.0,
            volume_24h_statistic: vec![],
            spread_24h_statistic: vec![],
            mm_depth_plus_2_24h_statistic: vec![],
            mm_depth_minus_2_24h_statistic: vec![],
            organic_depth_plus_2_24h_statistic: vec![],
            organic_depth_minus_2_24h_statistic: vec![],
            usdt_balance_24h_statistic: vec![],
            token_balance_24h_statistic: vec![],
        }
    }

    #[tokio::test]
    async fn round_trip_snapshot_to_history() {
        let db = init_test_database().await.unwrap();
        let persister = MetricsPersister::new(db);

        let snapshots = vec![snapshot("mexc", "KOM/USDT", 0.0042, 123_456.0)];
        let written = persister.save_snapshots(&snapshots).await.unwrap();
        assert_eq!(written.len(), 1);

        let rows = persister.history("mexc", "KOM/USDT", 24).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exchange, "mexc");
        assert_eq!(rows[0].pair, "KOM/USDT");
        assert_eq!(rows[0].current_price, 0.0042);
        assert_eq!(rows[0].last_vol_24h, 123_456.0);
        assert_eq!(rows[0].mm_depth_plus_2, 12.5);
        assert_eq!(rows[0].organic_depth_minus_2, 2.0);
    }

    #[tokio::test]
    async fn history_is_filtered_by_exchange_and_pair() {
        let db = init_test_database().await.unwrap();
        let persister = MetricsPersister::new(db);

        persister
            .save_snapshots(&[
                snapshot("mexc", "KOM/USDT", 1.0, 1.0),
                snapshot("gate", "KOM/USDT", 2.0, 2.0),
                snapshot("mexc", "BBA/USDT", 3.0, 3.0),
            ])
            .await
            .unwrap();

        let rows = persister.history("mexc", "KOM/USDT", 24).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].current_price, 1.0);
    }

    #[tokio::test]
    async fn history_orders_rows_ascending() {
        let db = init_test_database().await.unwrap();
        let persister = MetricsPersister::new(db.clone());

        // Backdate one row past the other so ordering is observable.
        persister
            .save_snapshots(&[snapshot("mexc", "KOM/USDT", 2.0, 2.0)])
            .await
            .unwrap();
        let old = Utc::now().timestamp() - 3600;
        sqlx::query(
            "INSERT INTO exchange_metrics
             (exchange, pair, current_price, last_vol_24h, created_at)
             VALUES ('mexc', 'KOM/USDT', 1.0, 1.0, ?)",
        )
        .bind(old)
        .execute(&db)
        .await
        .unwrap();

        let rows = persister.history("mexc", "KOM/USDT", 24).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at <= rows[1].created_at);
        assert_eq!(rows[0].current_price, 1.0);
    }

    #[tokio::test]
    async fn best_effort_swallows_empty_input() {
        let db = init_test_database().await.unwrap();
        let persister = MetricsPersister::new(db);
        // Must not panic or write anything.
        persister.persist_best_effort(&[]).await;
        let rows = persister.history("mexc", "KOM/USDT", 24).await.unwrap();
        assert!(rows.is_empty());
    }
}
