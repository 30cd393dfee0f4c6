//! Postgres persistence: idempotent metric upserts, match diagnostics and
//! the per-page aggregations the analysis layer consumes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gsc_core::{
    DateWindow, MatchResult, MetricsSource, PageMetrics, QueryPageMetrics, SearchAnalyticsRow,
    SourceError,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to encode diagnostics: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub run_id: Uuid,
    pub site_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_synced: i64,
    pub signals: i32,
    pub tasks_created: i32,
    pub summary_json: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Upserts on `(site_url, page, query, date)`; re-syncing a window overwrites it.
    pub async fn upsert_rows(&self, rows: &[SearchAnalyticsRow]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0u64;
        for row in rows {
            affected += sqlx::query(
                r#"
                INSERT INTO search_analytics
                    (site_url, page, query, date, clicks, impressions, ctr, position, synced_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
                ON CONFLICT (site_url, page, query, date) DO UPDATE SET
                    clicks = EXCLUDED.clicks,
                    impressions = EXCLUDED.impressions,
                    ctr = EXCLUDED.ctr,
                    position = EXCLUDED.position,
                    synced_at = NOW()
                "#,
            )
            .bind(&row.site_url)
            .bind(&row.page)
            .bind(&row.query)
            .bind(row.date)
            .bind(row.clicks)
            .bind(row.impressions)
            .bind(row.ctr)
            .bind(row.position)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    pub async fn distinct_pages(&self, site_url: &str, window: DateWindow) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT page
              FROM search_analytics
             WHERE site_url = $1
               AND date BETWEEN $2 AND $3
             ORDER BY page
            "#,
        )
        .bind(site_url)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("page").map_err(StoreError::from))
            .collect()
    }

    /// Records unmatched results and clears rows for URLs that now match.
    pub async fn record_match_results(
        &self,
        site_url: &str,
        results: &[MatchResult],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut unmatched = 0usize;
        let mut resolved = Vec::new();
        for result in results {
            if result.is_matched() {
                resolved.push(result.gsc_url.clone());
                continue;
            }
            let diagnostics = serde_json::to_value(&result.diagnostics)?;
            sqlx::query(
                r#"
                INSERT INTO unmatched_urls
                    (site_url, gsc_url, unmatch_reason, extracted_slug, diagnostics_json)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (site_url, gsc_url) DO UPDATE SET
                    unmatch_reason = EXCLUDED.unmatch_reason,
                    extracted_slug = EXCLUDED.extracted_slug,
                    diagnostics_json = EXCLUDED.diagnostics_json,
                    last_seen_at = NOW()
                "#,
            )
            .bind(site_url)
            .bind(&result.gsc_url)
            .bind(result.unmatch_reason.as_str())
            .bind(result.extracted_slug.as_deref())
            .bind(diagnostics)
            .execute(&mut *tx)
            .await?;
            unmatched += 1;
        }

        if !resolved.is_empty() {
            sqlx::query("DELETE FROM unmatched_urls WHERE site_url = $1 AND gsc_url = ANY($2)")
                .bind(site_url)
                .bind(&resolved)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(unmatched)
    }

    pub async fn query_page_metrics(
        &self,
        site_url: &str,
        window: DateWindow,
        max_position: f64,
    ) -> Result<Vec<QueryPageMetrics>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT query,
                   page,
                   SUM(clicks)::BIGINT AS clicks,
                   SUM(impressions)::BIGINT AS impressions,
                   AVG(position)::FLOAT8 AS position
              FROM search_analytics
             WHERE site_url = $1
               AND date BETWEEN $2 AND $3
             GROUP BY query, page
            HAVING AVG(position) <= $4
             ORDER BY query, impressions DESC
            "#,
        )
        .bind(site_url)
        .bind(window.start)
        .bind(window.end)
        .bind(max_position)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(QueryPageMetrics {
                query: row.try_get("query")?,
                page: row.try_get("page")?,
                clicks: row.try_get("clicks")?,
                impressions: row.try_get("impressions")?,
                position: row.try_get("position")?,
            });
        }
        Ok(out)
    }

    pub async fn aggregate_pages(&self, site_url: &str, window: DateWindow) -> Result<Vec<PageMetrics>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT page,
                   SUM(clicks)::BIGINT AS clicks,
                   SUM(impressions)::BIGINT AS impressions,
                   AVG(ctr)::FLOAT8 AS ctr,
                   AVG(position)::FLOAT8 AS position
              FROM search_analytics
             WHERE site_url = $1
               AND date BETWEEN $2 AND $3
             GROUP BY page
             ORDER BY page
            "#,
        )
        .bind(site_url)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(PageMetrics {
                page: row.try_get("page")?,
                clicks: row.try_get("clicks")?,
                impressions: row.try_get("impressions")?,
                ctr: row.try_get("ctr")?,
                position: row.try_get("position")?,
            });
        }
        Ok(out)
    }

    pub async fn record_sync_run(&self, run: &SyncRunRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs
                (run_id, site_url, started_at, finished_at, rows_synced, signals, tasks_created, summary_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run.run_id)
        .bind(&run.site_url)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.rows_synced)
        .bind(run.signals)
        .bind(run.tasks_created)
        .bind(&run.summary_json)
        .execute(&self.pool)
        .await?;
        info!(run_id = %run.run_id, "sync run recorded");
        Ok(())
    }
}

#[async_trait]
impl MetricsSource for PgStore {
    async fn page_metrics(
        &self,
        site_url: &str,
        window: DateWindow,
    ) -> Result<Vec<PageMetrics>, SourceError> {
        let span = info_span!("page_metrics", site_url, start = %window.start, end = %window.end);
        self.aggregate_pages(site_url, window)
            .instrument(span)
            .await
            .map_err(|err| SourceError::Anyhow(err.into()))
    }
}
