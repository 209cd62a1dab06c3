use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::Sink;
use crate::config::SinkConfig;

/// Sends one JSON request per record to a configured endpoint.
pub struct HttpSink {
    url: Option<String>,
    method: String,
    headers: HashMap<String, String>,
    timeout_secs: u64,
    client: Option<reqwest::Client>,
    request: Option<(Method, HeaderMap)>,
}

impl HttpSink {
    #[cfg(test)]
    pub fn new(
        url: &str,
        method: &str,
        headers: HashMap<String, String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            url: Some(url.to_string()),
            method: method.to_string(),
            headers,
            timeout_secs,
            client: None,
            request: None,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            url: config.url.clone().filter(|u| !u.is_empty()),
            method: config.method.clone(),
            headers: config.headers.clone(),
            timeout_secs: config.timeout,
            client: None,
            request: None,
        }
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name.as_str()))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn init(&mut self) -> Result<()> {
        if self.url.is_none() {
            anyhow::bail!("'url' is required");
        }
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method: {}", self.method))?;
        let headers = self.build_headers()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        self.request = Some((method, headers));
        self.client = Some(client);
        Ok(())
    }

    async fn deliver(&self, record: &Value) -> Result<()> {
        let (Some(url), Some(client), Some((method, headers))) =
            (&self.url, &self.client, &self.request)
        else {
            anyhow::bail!("HTTP sink used before init");
        };

        let response = client
            .request(method.clone(), url)
            .headers(headers.clone())
            .json(record)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        // Drain the body so the connection can be reused.
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() >= 400 {
            anyhow::bail!("{} responded with status {}: {}", url, status, body);
        }

        debug!("Delivered record to {} ({})", url, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn ready_sink(url: &str, method: &str, headers: HashMap<String, String>) -> HttpSink {
        let mut sink = HttpSink::new(url, method, headers, 5);
        sink.init().await.unwrap();
        sink
    }

    #[tokio::test]
    async fn test_posts_record_as_json() {
        let server = MockServer::start().await;
        let record = json!({"id": 5, "message": "hi"});

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-token", "secret"))
            .and(body_json(&record))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let headers = HashMap::from([("X-Token".to_string(), "secret".to_string())]);
        let sink = ready_sink(&format!("{}/hook", server.uri()), "post", headers).await;
        sink.deliver(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_configured_method_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = ready_sink(&server.uri(), "PUT", HashMap::new()).await;
        sink.deliver(&json!({"id": 1})).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .expect(1)
            .mount(&server)
            .await;

        let sink = ready_sink(&server.uri(), "POST", HashMap::new()).await;
        let err = sink.deliver(&json!({"id": 1})).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_init_requires_url() {
        let mut sink = HttpSink::from_config(&SinkConfig {
            kind: "http".to_string(),
            ..SinkConfig::default()
        });
        assert!(sink.init().await.is_err());
    }

    #[tokio::test]
    async fn test_init_rejects_bad_header() {
        let headers = HashMap::from([("bad header".to_string(), "v".to_string())]);
        let mut sink = HttpSink::new("http://localhost", "POST", headers, 5);
        assert!(sink.init().await.is_err());
    }
}
