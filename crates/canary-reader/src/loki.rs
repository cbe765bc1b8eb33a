//! Loki-backed [`QueryReader`].
//!
//! Canary lines start with the write timestamp in unix nanoseconds followed
//! by padding, so the stored entry's identity is read from the line itself
//! rather than from the backend's ingestion timestamp.

use canary_config::ReaderConfig;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::{QueryReader, ReaderError};

#[derive(Debug, Clone)]
pub struct LokiReader {
    http: reqwest::Client,
    base_url: String,
    labels: String,
    limit: u32,
}

impl LokiReader {
    pub fn new(cfg: &ReaderConfig) -> Result<Self, ReaderError> {
        let base_url = cfg.address.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ReaderError::Config(format!(
                "reader address must be an http(s) URL, got {:?}",
                cfg.address
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            labels: cfg.labels.clone(),
            limit: cfg.query_limit,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ReaderError> {
        let resp = self
            .http
            .get(self.url(path))
            .query(params)
            .send()
            .await
            .map_err(|e| ReaderError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ReaderError::Api {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| ReaderError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl QueryReader for LokiReader {
    async fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, ReaderError> {
        let start_ns = unix_nanos(start)?;
        let end_ns = unix_nanos(end)?;
        debug!(start_ns, end_ns, labels = %self.labels, "range query");

        let body: QueryResponse<StreamResult> = self
            .get(
                "/loki/api/v1/query_range",
                &[
                    ("query", self.labels.clone()),
                    ("start", start_ns.to_string()),
                    ("end", end_ns.to_string()),
                    ("limit", self.limit.to_string()),
                    ("direction", "forward".to_string()),
                ],
            )
            .await?;

        let mut out = Vec::new();
        for stream in body.data.result {
            for (_ingested_ns, line) in stream.values {
                out.push(parse_line_timestamp(&line)?);
            }
        }
        Ok(out)
    }

    async fn query_count_over_time(&self, range: &str) -> Result<f64, ReaderError> {
        let query = format!("count_over_time({}[{}])", self.labels, range);
        debug!(%query, "count query");

        let body: QueryResponse<VectorSample> = self
            .get("/loki/api/v1/query", &[("query", query)])
            .await?;

        let mut total = 0.0;
        for sample in body.data.result {
            let (_ts, raw) = sample.value;
            let v: f64 = raw
                .parse()
                .map_err(|_| ReaderError::Decode(format!("non-numeric sample value {raw:?}")))?;
            total += v;
        }
        Ok(total)
    }
}

fn unix_nanos(ts: DateTime<Utc>) -> Result<i64, ReaderError> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| ReaderError::Config(format!("timestamp {ts} outside nanosecond range")))
}

/// First whitespace-separated field of a canary line, as unix nanoseconds.
fn parse_line_timestamp(line: &str) -> Result<DateTime<Utc>, ReaderError> {
    let field = line
        .split_whitespace()
        .next()
        .ok_or_else(|| ReaderError::Decode("empty log line".to_string()))?;
    let ns: i64 = field
        .parse()
        .map_err(|_| ReaderError::Decode(format!("line does not start with a timestamp: {line:?}")))?;
    Ok(Utc.timestamp_nanos(ns))
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct QueryResponse<R> {
    data: QueryData<R>,
}

#[derive(Debug, Deserialize)]
struct QueryData<R> {
    #[serde(default = "Vec::new")]
    result: Vec<R>,
}

#[derive(Debug, Deserialize)]
struct StreamResult {
    #[serde(default)]
    values: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    /// `[<unix seconds as number>, "<value>"]`
    value: (serde_json::Value, String),
}
