//! HTTP API sources
//!
//! Each endpoint answers with `{"data": [...]}`. Rows are reduced to the
//! configured fields, and string values that carry markup are rejected.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{extract_failed, ExtractOutput};
use crate::error::{EtlError, Result};
use crate::pipeline::{ApiDescriptor, ApiExtractConfig, FilterGroup};
use crate::working_set::Row;

const API_KEY_HEADER: &str = "x-api-key";

pub struct HttpExtractor {
    client: Client,
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn header_error(err: impl std::fmt::Display) -> EtlError {
    EtlError::Config(format!("invalid header: {}", err))
}

/// Whether a string contains something a browser would parse as a tag
fn looks_like_markup(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        *b == b'<'
            && bytes[i + 1..]
                .iter()
                .find(|c| !c.is_ascii_whitespace())
                .map_or(false, |c| c.is_ascii_alphabetic() || *c == b'/' || *c == b'!' || *c == b'?')
    })
}

/// Keep only `fields`, refusing rows whose strings contain markup
fn clean_row(raw: &Value, fields: &[String]) -> Result<Row> {
    let Value::Object(object) = raw else {
        return Ok(Row::new());
    };

    let mut row = Row::new();
    for field in fields {
        if let Some(value) = object.get(field) {
            if let Value::String(text) = value {
                if looks_like_markup(text) {
                    return Err(EtlError::Config(format!(
                        "markup detected in field '{}' of extracted data",
                        field
                    )));
                }
            }
            row.insert(field.clone(), value.clone());
        }
    }
    Ok(row)
}

/// Request-body filters with dynamic values resolved
fn body_filters(filters: &[FilterGroup], watermark: Option<i64>) -> Result<Vec<Value>> {
    filters
        .iter()
        .map(|group| {
            Ok(json!({
                "fields": group.columns,
                "operator": group.operator,
                "value": group.value.resolve(watermark)?,
            }))
        })
        .collect()
}

impl HttpExtractor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Extract every endpoint; endpoints are requested concurrently
    pub async fn extract(
        &self,
        api: &ApiDescriptor,
        configs: &[ApiExtractConfig],
        watermark: Option<i64>,
    ) -> ExtractOutput {
        let headers = match self.build_headers(api).await {
            Ok(headers) => headers,
            Err(e) => {
                warn!(base_url = %api.base_url, error = %e, "Authentication failed");
                let message = format!("authentication failed: {}", e);
                return configs
                    .iter()
                    .map(|config| {
                        let err = EtlError::ExtractFailed {
                            table: config.target.clone(),
                            message: message.clone(),
                        };
                        (config.name.clone(), Err(err))
                    })
                    .collect();
            },
        };

        let results = join_all(
            configs
                .iter()
                .map(|config| self.extract_endpoint(api, config, &headers, watermark)),
        )
        .await;

        configs
            .iter()
            .zip(results)
            .map(|(config, result)| {
                let result = result.map_err(|e| extract_failed(&config.target, e));
                match &result {
                    Ok(rows) => info!(endpoint = %config.target, rows = rows.len(), "Extracted endpoint"),
                    Err(e) => warn!(endpoint = %config.target, error = %e, "Extraction failed"),
                }
                (config.name.clone(), result)
            })
            .collect()
    }

    async fn build_headers(&self, api: &ApiDescriptor) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &api.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).map_err(header_error)?,
                HeaderValue::from_str(value).map_err(header_error)?,
            );
        }

        match api.auth_type.as_str() {
            "bearer" => {
                let auth_path = api
                    .auth_url
                    .as_deref()
                    .ok_or_else(|| EtlError::Config("bearer auth requires 'auth_url'".into()))?;
                let response: Value = self
                    .client
                    .post(join_url(&api.base_url, auth_path))
                    .headers(headers.clone())
                    .json(&json!({ "auth_key": api.auth_key }))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                let token = response
                    .pointer("/data/token")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| EtlError::Config("token not found in bearer response".into()))?;
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", token)).map_err(header_error)?,
                );
            },
            "api_key" => {
                headers.insert(
                    HeaderName::from_static(API_KEY_HEADER),
                    HeaderValue::from_str(&api.auth_key).map_err(header_error)?,
                );
            },
            "basic" => {
                let encoded = BASE64.encode(api.auth_key.as_bytes());
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Basic {}", encoded)).map_err(header_error)?,
                );
            },
            other => {
                return Err(EtlError::Config(format!("unsupported auth type: {}", other)));
            },
        }

        Ok(headers)
    }

    async fn extract_endpoint(
        &self,
        api: &ApiDescriptor,
        config: &ApiExtractConfig,
        headers: &HeaderMap,
        watermark: Option<i64>,
    ) -> Result<Vec<Row>> {
        let url = join_url(&api.base_url, &config.target);
        let method = config
            .http_method
            .as_deref()
            .unwrap_or("post")
            .to_ascii_lowercase();

        let request = match method.as_str() {
            "post" => {
                let mut body = json!({ "filters": body_filters(&config.filters, watermark)? });
                if let Some(pagination) = &config.pagination {
                    body["pagination"] = pagination.clone();
                }
                self.client.post(&url).json(&body)
            },
            "get" => {
                let mut request = self.client.get(&url);
                if let Some(Value::Object(pagination)) = &config.pagination {
                    let query: Vec<(String, String)> = pagination
                        .iter()
                        .map(|(k, v)| {
                            let text = match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            (k.clone(), text)
                        })
                        .collect();
                    request = request.query(&query);
                }
                request
            },
            other => {
                return Err(EtlError::Config(format!("unsupported HTTP method: {}", other)));
            },
        };

        let response: Value = request
            .headers(headers.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.get("data") {
            Some(Value::Array(items)) => items.iter().map(|item| clean_row(item, &config.fields)).collect(),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer, auth: Value) -> ApiDescriptor {
        let mut descriptor = json!({"base_url": format!("{}/", server.uri())});
        for (k, v) in auth.as_object().unwrap() {
            descriptor[k] = v.clone();
        }
        serde_json::from_value(descriptor).unwrap()
    }

    fn endpoint(value: Value) -> ApiExtractConfig {
        serde_json::from_value(value).unwrap()
    }

    fn extractor() -> HttpExtractor {
        HttpExtractor::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_markup_detection() {
        assert!(looks_like_markup("<script>alert(1)</script>"));
        assert!(looks_like_markup("a < /b>"));
        assert!(!looks_like_markup("1 < 2 and 3 > 2"));
        assert!(!looks_like_markup("plain"));
    }

    #[tokio::test]
    async fn test_bearer_post_with_watermark() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .and(body_partial_json(json!({"auth_key": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "t0k"}})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header("authorization", "Bearer t0k"))
            .and(body_partial_json(json!({
                "filters": [{"fields": ["updated_at"], "operator": "gte", "value": "2024-03-05"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": 1, "total": 5, "internal": "x"}, {"id": 2, "total": 7}]
            })))
            .mount(&server)
            .await;

        let api = api(&server, json!({"auth_type": "bearer", "auth_key": "secret", "auth_url": "/auth/token"}));
        let configs = vec![endpoint(json!({
            "name": "orders", "target": "/orders", "fields": ["id", "total"],
            "filters": [{"type": "dynamic", "fields": ["updated_at"], "operator": "gte", "value": "2024-01-01"}]
        }))];

        let output = extractor().extract(&api, &configs, Some(1_709_622_489_000)).await;
        let rows = output["orders"].as_ref().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].contains_key("internal"));
    }

    #[tokio::test]
    async fn test_get_with_api_key_and_markup_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(header("x-api-key", "k1"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"name": "<img src=x onerror=alert(1)>"}]
            })))
            .mount(&server)
            .await;

        let api = api(&server, json!({"auth_type": "api_key", "auth_key": "k1"}));
        let configs = vec![endpoint(json!({
            "name": "users", "target": "users", "fields": ["name"],
            "http_method": "GET", "pagination": {"page": 2}
        }))];

        let output = extractor().extract(&api, &configs, None).await;
        let err = output["users"].as_ref().unwrap_err();
        assert!(err.to_string().contains("markup detected"));
    }

    #[tokio::test]
    async fn test_unsupported_auth_fails_every_endpoint() {
        let server = MockServer::start().await;
        let api = api(&server, json!({"auth_type": "oauth", "auth_key": "k"}));
        let configs = vec![
            endpoint(json!({"name": "a", "target": "a", "fields": []})),
            endpoint(json!({"name": "b", "target": "b", "fields": []})),
        ];

        let output = extractor().extract(&api, &configs, None).await;
        assert!(output.values().all(|r| r.is_err()));
    }
}
