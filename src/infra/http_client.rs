use crate::app::ports::{HttpClientPort, HttpGetResult, HttpRequest};
use crate::constants::USER_AGENT;
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    /// `timeout` bounds a whole request; retry policies add their own
    /// per-attempt deadline on top.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Network(format!("timeout: {}", e))
    } else {
        FetchError::Network(e.to_string())
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, request: HttpRequest) -> Result<HttpGetResult, FetchError> {
        tracing::debug!("HTTP GET request to: {}", request.url);
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp = builder.send().await.map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await.map_err(map_reqwest_error)?.to_vec();
        tracing::debug!("HTTP response: status={}, size={} bytes", status, bytes.len());
        Ok(HttpGetResult {
            status,
            bytes,
            content_type,
        })
    }
}
