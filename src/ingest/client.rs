//! REST client for the upstream event-management system.
//!
//! The client is an explicit object constructed with a base URL and
//! optional credentials; the session token lives on the client, never in
//! process-wide state. Loosely-typed upstream JSON is validated and
//! converted into the records of `crate::models` right here; malformed
//! records are skipped with a warning instead of propagating partial
//! objects downstream.

use crate::error::{Error, Result};
use crate::models::{MetricDefinition, MetricKind, MetricSample, Occurrence, SampleValue, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parking_lot::RwLock;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use super::EventSource;

/// Upstream login credentials.
#[derive(Debug, Clone)]
pub struct UpstreamCredentials {
    pub username: String,
    pub password: String,
}

/// HTTP client for the upstream system.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    credentials: Option<UpstreamCredentials>,
    token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RawMetricDefinition {
    id: i64,
    name: String,
    #[serde(rename = "translatedName")]
    translated_name: Option<String>,
    kind: String,
    unit: Option<String>,
    #[serde(rename = "sortKey", default)]
    sort_key: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawCalendar {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawOccurrence {
    id: i64,
    name: String,
    #[serde(rename = "startDate")]
    start_date: String,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
    calendar: Option<RawCalendar>,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    #[serde(rename = "occurrenceId", default)]
    occurrence_id: Option<i64>,
    #[serde(rename = "metricId")]
    metric_id: i64,
    value: serde_json::Value,
    #[serde(rename = "modifiedDate")]
    modified_date: Option<String>,
}

impl UpstreamClient {
    pub fn new(
        base_url: &str,
        credentials: Option<UpstreamCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Authenticate against the upstream system and keep the session token.
    pub async fn login(&self) -> Result<()> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Authentication("No upstream credentials configured".into()))?;

        let response = self
            .client
            .post(format!("{}/api/login", self.base_url))
            .json(&serde_json::json!({
                "username": credentials.username,
                "password": credentials.password,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            return Err(Error::Authentication(format!(
                "Upstream login rejected: {}",
                response.status()
            )));
        }
        let response = response
            .error_for_status()
            .map_err(|e| Error::UpstreamFetch(format!("Upstream login failed: {e}")))?;

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamFetch(format!("Invalid login response: {e}")))?;
        *self.token.write() = Some(login.token);
        Ok(())
    }

    async fn ensure_session(&self) -> Result<String> {
        if let Some(token) = self.token.read().clone() {
            return Ok(token);
        }
        self.login().await?;
        self.token
            .read()
            .clone()
            .ok_or_else(|| Error::Authentication("Login yielded no session token".into()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.ensure_session().await?;
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // The session is gone; the caller has to re-trigger after
            // re-authentication, there is no in-flight retry
            *self.token.write() = None;
            return Err(Error::Authentication("Upstream session expired".into()));
        }
        let response = response
            .error_for_status()
            .map_err(|e| Error::UpstreamFetch(format!("Upstream request failed: {e}")))?;

        response
            .json()
            .await
            .map_err(|e| Error::UpstreamFetch(format!("Invalid upstream response: {e}")))
    }
}

#[async_trait]
impl EventSource for UpstreamClient {
    async fn fetch_metric_definitions(&self) -> Result<Vec<MetricDefinition>> {
        let envelope: Envelope<RawMetricDefinition> = self.get_json("/api/metrics", &[]).await?;
        Ok(envelope
            .data
            .into_iter()
            .filter_map(convert_definition)
            .collect())
    }

    async fn fetch_occurrences(&self, range: &TimeRange) -> Result<Vec<Occurrence>> {
        let envelope: Envelope<RawOccurrence> = self
            .get_json(
                "/api/occurrences",
                &[
                    ("from", range.from.to_rfc3339()),
                    ("to", range.to.to_rfc3339()),
                ],
            )
            .await?;
        Ok(envelope
            .data
            .into_iter()
            .filter_map(convert_occurrence)
            .collect())
    }

    async fn fetch_samples(&self, occurrence_id: i64) -> Result<Vec<MetricSample>> {
        let envelope: Envelope<RawSample> = self
            .get_json(&format!("/api/occurrences/{occurrence_id}/samples"), &[])
            .await?;
        Ok(envelope
            .data
            .into_iter()
            .filter_map(|raw| convert_sample(occurrence_id, raw))
            .collect())
    }
}

fn convert_definition(raw: RawMetricDefinition) -> Option<MetricDefinition> {
    let Some(kind) = MetricKind::parse(&raw.kind) else {
        warn!(metric_id = raw.id, kind = %raw.kind, "Skipping metric with unknown kind");
        return None;
    };
    Some(MetricDefinition {
        id: raw.id,
        translated_name: raw.translated_name.unwrap_or_else(|| raw.name.clone()),
        name: raw.name,
        kind,
        unit: raw.unit,
        sort_key: raw.sort_key.unwrap_or(0),
    })
}

fn convert_occurrence(raw: RawOccurrence) -> Option<Occurrence> {
    let Some(start) = parse_timestamp(&raw.start_date) else {
        warn!(
            occurrence_id = raw.id,
            start_date = %raw.start_date,
            "Skipping occurrence with unparseable start date"
        );
        return None;
    };
    Some(Occurrence {
        id: raw.id,
        name: raw.name,
        start,
        end: raw.end_date.as_deref().and_then(parse_timestamp),
        category: raw.calendar.map(|c| c.name),
    })
}

fn convert_sample(path_occurrence_id: i64, raw: RawSample) -> Option<MetricSample> {
    let value = match raw.value {
        serde_json::Value::Number(n) => SampleValue::Number(n.as_f64()?),
        serde_json::Value::String(s) => SampleValue::Text(s),
        serde_json::Value::Null => return None,
        other => {
            warn!(
                occurrence_id = path_occurrence_id,
                metric_id = raw.metric_id,
                "Skipping sample with unsupported value type: {other}"
            );
            return None;
        }
    };
    Some(MetricSample {
        occurrence_id: raw.occurrence_id.unwrap_or(path_occurrence_id),
        metric_id: raw.metric_id,
        value,
        category: None,
        modified: raw.modified_date.as_deref().and_then(parse_timestamp),
    })
}

/// Accept the timestamp shapes the upstream system is known to emit:
/// RFC 3339, a bare datetime, or a bare date (midnight UTC).
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}
