//! HTTP race source.
//!
//! Issues one `GET <base_url><path_template>` per fetch and expects a JSON
//! array of record objects (or an object wrapping that array under
//! `records`). Site-specific page parsing is out of scope: whatever sits
//! behind the endpoint is expected to hand back flat records.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::policy::AccessPolicy;
use super::types::{
    CollectorError, CollectorResult, RaceSource, RawRecord, ScrapingConfig, SourceConfig,
};

/// Race source backed by a JSON HTTP endpoint.
pub struct HttpRaceSource {
    http_client: Client,
    name: String,
    base_url: String,
    path_template: String,
    timeout: std::time::Duration,
}

impl HttpRaceSource {
    /// Build a source from its location and the session's scraping settings.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::HttpError` if the HTTP client cannot be built.
    pub fn new(source: &SourceConfig, scraping: &ScrapingConfig) -> CollectorResult<Self> {
        let http_client = Client::builder()
            .timeout(scraping.timeout)
            .user_agent(scraping.user_agent.clone())
            .build()
            .map_err(|e| CollectorError::HttpError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            name: source.name.clone(),
            base_url: source.base_url.trim_end_matches('/').to_string(),
            path_template: source.path_template.clone(),
            timeout: scraping.timeout,
        })
    }

    fn robots_url(&self) -> String {
        format!("{}/robots.txt", self.base_url)
    }

    fn map_send_error(&self, err: reqwest::Error) -> CollectorError {
        if err.is_timeout() {
            CollectorError::Timeout(self.timeout)
        } else {
            CollectorError::HttpError(err.to_string())
        }
    }
}

#[async_trait]
impl RaceSource for HttpRaceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn request_url(&self, date: NaiveDate) -> String {
        let path = self.path_template.replace("{date}", &date.to_string());
        format!("{}{}", self.base_url, path)
    }

    async fn access_policy(&self, user_agent: &str) -> CollectorResult<AccessPolicy> {
        let url = self.robots_url();
        let response = self
            .http_client
            .get(&url)
            .header("User-Agent", user_agent)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        // No robots.txt means no restrictions.
        if status == StatusCode::NOT_FOUND {
            return Ok(AccessPolicy::allow_all());
        }
        if !status.is_success() {
            return Err(CollectorError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| CollectorError::HttpError(e.to_string()))?;
        Ok(AccessPolicy::parse(&text))
    }

    async fn fetch_records(&self, date: NaiveDate) -> CollectorResult<Vec<RawRecord>> {
        let url = self.request_url(date);
        tracing::debug!(url = %url, "GET race records");

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Ok(Vec::new()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CollectorError::AccessDenied { url });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok());
                return Err(CollectorError::RateLimited { retry_after });
            }
            s if s.is_server_error() => {
                return Err(CollectorError::ServerError { status: s.as_u16() });
            }
            s if !s.is_success() => {
                return Err(CollectorError::UnexpectedStatus {
                    status: s.as_u16(),
                    url,
                });
            }
            _ => {}
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CollectorError::ParseError(format!("Failed to parse response: {}", e)))?;
        records_from_json(body)
    }
}

/// Split a JSON payload into raw records.
///
/// Accepts a top-level array or an object holding the array under
/// `records`. Non-object entries are rejected.
pub(crate) fn records_from_json(body: Value) -> CollectorResult<Vec<RawRecord>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("records") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(CollectorError::ParseError(
                    "expected a JSON array of records".to_string(),
                ))
            }
        },
        Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(CollectorError::ParseError(
                "expected a JSON array of records".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(map) => Ok(RawRecord::from(map)),
            other => Err(CollectorError::ParseError(format!(
                "record {} is not an object: {}",
                idx, other
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_url_substitutes_date() {
        let source_config = SourceConfig {
            base_url: "https://example.com/".to_string(),
            ..Default::default()
        };
        let source = HttpRaceSource::new(&source_config, &ScrapingConfig::default())
            .expect("client should build");
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date");

        assert_eq!(
            source.request_url(date),
            "https://example.com/racing/2024-01-15.json"
        );
        assert_eq!(source.robots_url(), "https://example.com/robots.txt");
    }

    #[test]
    fn test_records_from_array() {
        let records = records_from_json(json!([
            {"date": "2024-01-15", "venue": "Ellerslie"},
            {"date": "2024-01-15", "venue": "Trentham"}
        ]))
        .expect("array should parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get_str("venue"), Some("Trentham"));
    }

    #[test]
    fn test_records_from_wrapped_object() {
        let records = records_from_json(json!({"records": [{"race_number": 1}]}))
            .expect("wrapped array should parse");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_records_rejects_scalars() {
        assert!(records_from_json(json!([1, 2])).is_err());
        assert!(records_from_json(json!("text")).is_err());
        assert!(records_from_json(Value::Null).expect("null is empty").is_empty());
    }
}
