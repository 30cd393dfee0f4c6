//! Sanity HTTP API client: GROQ document lookup and mutation writes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use gsc_core::{
    ContentDocument, DocumentSource, InsightSink, PerformanceSnapshot, RefreshTask, SourceError,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;

use crate::http::{ApiClient, ApiError};

const SERVICE: &str = "sanity";
const MUTATION_BATCH: usize = 100;
pub const REFRESH_TASK_TYPE: &str = "contentRefreshTask";
pub const SNAPSHOT_TYPE: &str = "gscSnapshot";

#[derive(Debug, Clone)]
pub struct SanityConfig {
    pub project_id: String,
    pub dataset: String,
    pub api_version: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct QueryResponse<T> {
    result: T,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_type")]
    content_type: String,
    slug: Option<String>,
    #[serde(rename = "_createdAt")]
    created_at: Option<DateTime<Utc>>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MutationResponse {
    #[serde(default)]
    results: Vec<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct SanityClient {
    http: ApiClient,
    config: SanityConfig,
}

impl SanityClient {
    pub fn new(http: ApiClient, config: SanityConfig) -> Result<Self, ApiError> {
        if config.project_id.trim().is_empty() {
            return Err(ApiError::MissingConfig("SANITY_PROJECT_ID"));
        }
        Ok(Self { http, config })
    }

    fn api_base(&self) -> String {
        format!(
            "https://{}.api.sanity.io/v{}",
            self.config.project_id, self.config.api_version
        )
    }

    pub fn query_url(&self) -> String {
        format!("{}/data/query/{}", self.api_base(), self.config.dataset)
    }

    pub fn mutate_url(&self) -> String {
        format!("{}/data/mutate/{}", self.api_base(), self.config.dataset)
    }

    async fn mutate(&self, mutations: Vec<JsonValue>) -> Result<usize, ApiError> {
        let token = self
            .config
            .token
            .as_deref()
            .ok_or(ApiError::MissingConfig("SANITY_TOKEN"))?;
        let url = self.mutate_url();
        let mut applied = 0usize;
        for chunk in mutations.chunks(MUTATION_BATCH) {
            let body = json!({ "mutations": chunk });
            let resp: MutationResponse = self
                .http
                .send_json(SERVICE, &url, |client| {
                    client.post(&url).bearer_auth(token).json(&body)
                })
                .await?;
            applied += resp.results.len();
        }
        Ok(applied)
    }
}

/// Builds the document query; the slug field is interpolated, so it must be a plain path.
pub fn documents_query(slug_field: &str) -> Result<String, SourceError> {
    let valid = !slug_field.is_empty()
        && slug_field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid {
        return Err(SourceError::Message(format!("invalid slug field '{slug_field}'")));
    }
    Ok(format!(
        "*[_type in $types && defined({slug_field}.current)]{{_id, _type, \"slug\": {slug_field}.current, _createdAt, publishedAt}}"
    ))
}

fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub fn refresh_task_mutation(task: &RefreshTask) -> JsonValue {
    json!({
        "createIfNotExists": {
            "_id": format!("{REFRESH_TASK_TYPE}.{}", task.id),
            "_type": REFRESH_TASK_TYPE,
            "document": { "_type": "reference", "_ref": task.document_id },
            "page": task.page,
            "reason": task.reason.as_str(),
            "severity": task.severity.as_str(),
            "summary": task.summary,
            "metrics": {
                "positionBefore": task.metrics.position_before,
                "positionNow": task.metrics.position_now,
                "positionDelta": task.metrics.position_delta,
                "ctrBefore": task.metrics.ctr_before,
                "ctrNow": task.metrics.ctr_now,
                "impressions": task.metrics.impressions,
            },
            "detectedOn": task.detected_on.to_string(),
            "status": "open",
        }
    })
}

pub fn snapshot_mutation(snapshot: &PerformanceSnapshot) -> JsonValue {
    json!({
        "createOrReplace": {
            "_id": format!("{SNAPSHOT_TYPE}.{}", snapshot.document_id),
            "_type": SNAPSHOT_TYPE,
            "document": { "_type": "reference", "_ref": snapshot.document_id },
            "page": snapshot.page,
            "windowStart": snapshot.window.start.to_string(),
            "windowEnd": snapshot.window.end.to_string(),
            "clicks": snapshot.clicks,
            "impressions": snapshot.impressions,
            "ctr": snapshot.ctr,
            "position": snapshot.position,
        }
    })
}

#[async_trait]
impl DocumentSource for SanityClient {
    async fn fetch_documents(
        &self,
        content_types: &[String],
        slug_field: &str,
    ) -> Result<Vec<ContentDocument>, SourceError> {
        let groq = documents_query(slug_field)?;
        let types = serde_json::to_string(content_types).map_err(anyhow::Error::from)?;
        let url = self.query_url();
        let token = self.config.token.clone();

        let resp: QueryResponse<Vec<RawDocument>> = self
            .http
            .send_json(SERVICE, &url, |client| {
                let req = client
                    .get(&url)
                    .query(&[("query", groq.as_str()), ("$types", types.as_str())]);
                match &token {
                    Some(token) => req.bearer_auth(token),
                    None => req,
                }
            })
            .await
            .map_err(anyhow::Error::from)?;

        let documents = resp
            .result
            .into_iter()
            .map(|raw| ContentDocument {
                published_at: raw.published_at.as_deref().and_then(parse_published_at),
                id: raw.id,
                content_type: raw.content_type,
                slug: raw.slug,
                created_at: raw.created_at,
            })
            .collect::<Vec<_>>();
        info!(documents = documents.len(), "sanity documents fetched");
        Ok(documents)
    }
}

#[async_trait]
impl InsightSink for SanityClient {
    async fn create_refresh_tasks(&self, tasks: &[RefreshTask]) -> Result<usize, SourceError> {
        if tasks.is_empty() {
            return Ok(0);
        }
        let mutations = tasks.iter().map(refresh_task_mutation).collect();
        Ok(self.mutate(mutations).await.map_err(anyhow::Error::from)?)
    }

    async fn write_snapshots(&self, snapshots: &[PerformanceSnapshot]) -> Result<usize, SourceError> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let mutations = snapshots.iter().map(snapshot_mutation).collect();
        Ok(self.mutate(mutations).await.map_err(anyhow::Error::from)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClientConfig;
    use gsc_core::{DecayMetrics, DecayRuleKind, Severity};
    use uuid::Uuid;

    fn client() -> SanityClient {
        SanityClient::new(
            ApiClient::new(HttpClientConfig::default()).unwrap(),
            SanityConfig {
                project_id: "abc123".into(),
                dataset: "production".into(),
                api_version: "2024-01-01".into(),
                token: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn endpoints_follow_project_and_dataset() {
        let c = client();
        assert_eq!(c.query_url(), "https://abc123.api.sanity.io/v2024-01-01/data/query/production");
        assert_eq!(c.mutate_url(), "https://abc123.api.sanity.io/v2024-01-01/data/mutate/production");
    }

    #[test]
    fn slug_field_is_validated_before_interpolation() {
        let q = documents_query("seo.slug").unwrap();
        assert!(q.contains("defined(seo.slug.current)"));
        assert!(documents_query("slug] | order(x)").is_err());
        assert!(documents_query("").is_err());
    }

    #[test]
    fn published_at_accepts_timestamps_and_dates() {
        assert!(parse_published_at("2025-06-01T10:00:00Z").is_some());
        assert_eq!(
            parse_published_at("2025-06-01").unwrap().date_naive(),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
        );
        assert!(parse_published_at("soon").is_none());
    }

    #[test]
    fn refresh_task_mutation_is_idempotent_create() {
        let task = RefreshTask {
            id: Uuid::nil(),
            document_id: "doc-a".into(),
            page: "https://x.com/a".into(),
            reason: DecayRuleKind::LowCtr,
            severity: Severity::High,
            summary: "CTR is low".into(),
            metrics: DecayMetrics {
                position_before: 3.0,
                position_now: 4.0,
                position_delta: 1.0,
                ctr_before: 0.03,
                ctr_now: 0.001,
                impressions: 4000,
            },
            detected_on: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        };
        let m = refresh_task_mutation(&task);
        let doc = &m["createIfNotExists"];
        assert_eq!(doc["_id"], format!("contentRefreshTask.{}", Uuid::nil()));
        assert_eq!(doc["document"]["_ref"], "doc-a");
        assert_eq!(doc["reason"], "low_ctr");
        assert_eq!(doc["severity"], "high");
    }

    #[test]
    fn missing_project_id_is_a_config_error() {
        let err = SanityClient::new(
            ApiClient::new(HttpClientConfig::default()).unwrap(),
            SanityConfig {
                project_id: " ".into(),
                dataset: "production".into(),
                api_version: "2024-01-01".into(),
                token: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::MissingConfig("SANITY_PROJECT_ID")));
    }
}
