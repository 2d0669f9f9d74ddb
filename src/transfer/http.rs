//! reqwest-backed transport

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use reqwest::header::LAST_MODIFIED;

use super::{ChunkSink, FetchMeta, Transport};
use crate::config::HttpConfig;
use crate::error::TransportError;

/// Plain HTTP GET transport streaming the body chunk by chunk
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, sink: ChunkSink) -> Result<FetchMeta, TransportError> {
        let mut response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let content_length = response.content_length();

        let mut received: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
            sink.send(chunk)
                .map_err(|_| TransportError::Task("transfer closed by receiver".to_string()))?;
        }

        log::debug!("GET {} -> {} ({} bytes)", url, status, received);

        Ok(FetchMeta {
            status: status.as_u16(),
            content_length,
            last_modified,
        })
    }
}

/// Parse an HTTP-date (`Wed, 21 Oct 2015 07:28:00 GMT`)
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn collect(transport: &HttpTransport, url: &str) -> (Result<FetchMeta, TransportError>, Vec<u8>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = transport.fetch(url, tx).await;
        let mut body = Vec::new();
        while let Some(chunk) = rx.recv().await {
            body.extend_from_slice(&chunk);
        }
        (result, body)
    }

    #[test]
    fn test_parse_http_date() {
        let dt = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(dt.timestamp(), 1_445_412_480);
        assert!(parse_http_date("yesterday").is_none());
    }

    #[tokio::test]
    async fn test_fetch_streams_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/tex/grass.png")
            .with_status(200)
            .with_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT")
            .with_body("texture-bytes")
            .create_async()
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let url = format!("{}/tex/grass.png", server.url());
        let (result, body) = collect(&transport, &url).await;

        let meta = result.unwrap();
        assert_eq!(meta.status, 200);
        assert_eq!(meta.last_modified.map(|d| d.timestamp()), Some(1_445_412_480));
        assert_eq!(body, b"texture-bytes");
    }

    #[tokio::test]
    async fn test_fetch_maps_http_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/missing.obj")
            .with_status(404)
            .create_async()
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let url = format!("{}/missing.obj", server.url());
        let (result, body) = collect(&transport, &url).await;

        assert!(matches!(
            result,
            Err(TransportError::Status { status: 404, .. })
        ));
        assert!(body.is_empty());
    }
}
