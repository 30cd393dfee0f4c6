//! Search Console `searchAnalytics.query` client.

use chrono::NaiveDate;
use gsc_core::{DateWindow, SearchAnalyticsRow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::http::{ApiClient, ApiError};

pub const GSC_API_BASE: &str = "https://www.googleapis.com/webmasters/v3";
pub const GSC_MAX_ROW_LIMIT: u32 = 25_000;
const SERVICE: &str = "gsc";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchAnalyticsRequest<'a> {
    start_date: String,
    end_date: String,
    dimensions: [&'a str; 3],
    row_limit: u32,
    start_row: u32,
    data_state: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchAnalyticsResponse {
    #[serde(default)]
    rows: Vec<ApiRow>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiRow {
    keys: Vec<String>,
    #[serde(default)]
    clicks: f64,
    #[serde(default)]
    impressions: f64,
    #[serde(default)]
    ctr: f64,
    #[serde(default)]
    position: f64,
}

#[derive(Debug, Clone)]
pub struct GscClient {
    http: ApiClient,
    api_base: String,
    access_token: String,
    row_limit: u32,
}

impl GscClient {
    pub fn new(http: ApiClient, access_token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: GSC_API_BASE.to_string(),
            access_token: access_token.into(),
            row_limit: GSC_MAX_ROW_LIMIT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_row_limit(mut self, row_limit: u32) -> Self {
        self.row_limit = row_limit.clamp(1, GSC_MAX_ROW_LIMIT);
        self
    }

    pub fn query_url(&self, site_url: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(site_url.as_bytes()).collect();
        format!(
            "{}/sites/{}/searchAnalytics/query",
            self.api_base.trim_end_matches('/'),
            encoded
        )
    }

    /// Fetches every `[page, query, date]` row in the window, paging by `startRow`.
    pub async fn fetch_rows(
        &self,
        site_url: &str,
        window: DateWindow,
    ) -> Result<Vec<SearchAnalyticsRow>, ApiError> {
        if self.access_token.is_empty() {
            return Err(ApiError::MissingConfig("GSC_ACCESS_TOKEN"));
        }

        let url = self.query_url(site_url);
        let mut out = Vec::new();
        let mut start_row = 0u32;
        loop {
            let body = SearchAnalyticsRequest {
                start_date: window.start.to_string(),
                end_date: window.end.to_string(),
                dimensions: ["page", "query", "date"],
                row_limit: self.row_limit,
                start_row,
                data_state: "final",
            };
            let page: SearchAnalyticsResponse = self
                .http
                .send_json(SERVICE, &url, |client| {
                    client.post(&url).bearer_auth(&self.access_token).json(&body)
                })
                .await?;

            let fetched = page.rows.len() as u32;
            debug!(start_row, fetched, "fetched search analytics page");
            out.extend(page.rows.into_iter().filter_map(|row| to_row(site_url, row)));

            if fetched < self.row_limit {
                break;
            }
            start_row += fetched;
        }

        info!(site_url, rows = out.len(), start = %window.start, end = %window.end, "gsc rows fetched");
        Ok(out)
    }
}

fn to_row(site_url: &str, row: ApiRow) -> Option<SearchAnalyticsRow> {
    let [page, query, date] = <[String; 3]>::try_from(row.keys).ok()?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
    Some(SearchAnalyticsRow {
        site_url: site_url.to_string(),
        page,
        query,
        date,
        clicks: row.clicks.round() as i64,
        impressions: row.impressions.round() as i64,
        ctr: row.ctr,
        position: row.position,
    })
}
