//! Authenticated, gzip-aware HTTP transport used by every other component to
//! talk to the control plane.

mod error;

pub use error::{ApiError, TransportError};

use std::io::Read;
use std::sync::RwLock;
use std::time::Duration;

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

/// Bodies larger than this are gzip-compressed before sending.
const GZIP_THRESHOLD_BYTES: usize = 1024;
/// Decompressed response bodies are bounded to defend against gzip bombs.
const MAX_DECOMPRESSED_BYTES: usize = 10 * 1024 * 1024;
/// Error-body snippets are read up to this many bytes.
const ERROR_BODY_SNIPPET_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub tls_insecure_skip_verify: bool,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            tls_insecure_skip_verify: false,
            user_agent: format!("plexd-agent/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Authenticated HTTP client for the control plane.
///
/// Holds the bearer auth token behind a `RwLock` so `set_auth_token` can be
/// called from any task (e.g. after a `rotate_keys` event) while requests
/// are being built concurrently elsewhere.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    user_agent: String,
    auth_token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        if config.tls_insecure_skip_verify {
            tracing::warn!("TLS certificate verification is disabled; do not use in production");
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .danger_accept_invalid_certs(config.tls_insecure_skip_verify)
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            user_agent: config.user_agent,
            auth_token: RwLock::new(None),
        })
    }

    pub fn set_auth_token(&self, token: impl Into<String>) {
        let mut guard = self.auth_token.write().expect("auth token lock poisoned");
        *guard = Some(token.into());
    }

    fn resolve_url(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join(path)?)
    }

    fn new_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .header("Accept-Encoding", "gzip");

        if let Some(token) = self.auth_token.read().expect("auth token lock poisoned").as_ref() {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder
    }

    fn encode_body(body_json: Vec<u8>) -> Result<(Vec<u8>, bool), TransportError> {
        if body_json.len() <= GZIP_THRESHOLD_BYTES {
            return Ok((body_json, false));
        }
        let mut encoder = GzEncoder::new(body_json.as_slice(), Compression::default());
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(TransportError::Compression)?;
        Ok((compressed, true))
    }

    async fn send_with_body<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, TransportError> {
        let url = self.resolve_url(path)?;
        let mut builder = self.new_request(method, url);

        if let Some(body) = body {
            let json = serde_json::to_vec(body)?;
            let (payload, gzipped) = Self::encode_body(json)?;
            if gzipped {
                builder = builder.header("Content-Encoding", "gzip");
            }
            builder = builder.header("Content-Type", "application/json").body(payload);
        }

        let response = builder.send().await?;
        Self::check_status(response).await
    }

    async fn check_status(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after_secs = retry_after_seconds(&response);
        let message = read_error_snippet(response).await;
        Err(TransportError::Api(ApiError::from_status(
            status.as_u16(),
            message,
            retry_after_secs,
        )))
    }

    async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
        let is_gzip = response
            .headers()
            .get("content-encoding")
            .map(|v| v.as_bytes() == b"gzip")
            .unwrap_or(false);

        let bytes = response.bytes().await?;
        let decoded = if is_gzip {
            decompress_bounded(&bytes, MAX_DECOMPRESSED_BYTES)?
        } else {
            bytes.to_vec()
        };
        Ok(serde_json::from_slice(&decoded)?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let response = self.send_with_body::<()>(Method::GET, path, None).await?;
        Self::decode_json(response).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        let response = self
            .send_with_body(Method::POST, path, Some(body))
            .await?;
        Self::decode_json(response).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        let response = self.send_with_body(Method::PUT, path, Some(body)).await?;
        Self::decode_json(response).await
    }

    /// Issues a raw request without decoding the response body, for SSE
    /// streams and binary artifact downloads. The caller owns the response
    /// and is responsible for draining or closing its body.
    pub async fn raw(
        &self,
        method: Method,
        path: &str,
        extra_headers: &[(&str, String)],
    ) -> Result<Response, TransportError> {
        let url = self.resolve_url(path)?;
        let mut builder = self.new_request(method, url);
        for (name, value) in extra_headers {
            builder = builder.header(*name, value);
        }
        let response = builder.send().await?;
        Self::check_status(response).await
    }
}

fn retry_after_seconds(response: &Response) -> Option<u64> {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

async fn read_error_snippet(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            let cut = bytes.len().min(ERROR_BODY_SNIPPET_BYTES);
            String::from_utf8_lossy(&bytes[..cut]).into_owned()
        }
        Err(_) => String::new(),
    }
}

fn decompress_bounded(input: &[u8], limit: usize) -> Result<Vec<u8>, TransportError> {
    let mut decoder = GzDecoder::new(input).take(limit as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(TransportError::Decompression)?;
    if out.len() > limit {
        return Err(TransportError::ResponseTooLarge { limit_bytes: limit });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_is_not_gzipped() {
        let (_, gzipped) = HttpTransport::encode_body(vec![0u8; GZIP_THRESHOLD_BYTES]).unwrap();
        assert!(!gzipped);
    }

    #[test]
    fn large_body_is_gzipped() {
        let (_, gzipped) =
            HttpTransport::encode_body(vec![0u8; GZIP_THRESHOLD_BYTES + 1]).unwrap();
        assert!(gzipped);
    }

    #[test]
    fn api_error_classification() {
        for (status, is_server) in [
            (400u16, false),
            (401, false),
            (403, false),
            (404, false),
            (409, false),
            (413, false),
            (429, false),
            (500, true),
            (502, true),
            (504, true),
            (418, false),
        ] {
            let err = ApiError::from_status(status, "x".into(), None);
            assert_eq!(err.status(), status);
            assert_eq!(err.is_server_error(), is_server);
        }
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = ApiError::from_status(429, "slow down".into(), Some(30));
        assert_eq!(err.retry_after_secs(), Some(30));
    }

    #[tokio::test]
    async fn get_decodes_json_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/ping")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(TransportConfig {
            base_url: format!("{}/", server.url()),
            ..Default::default()
        })
        .unwrap();

        #[derive(serde::Deserialize)]
        struct Pong {
            ok: bool,
        }
        let pong: Pong = transport.get("v1/ping").await.unwrap();
        assert!(pong.ok);
    }

    #[tokio::test]
    async fn error_status_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/ping")
            .with_status(429)
            .with_header("Retry-After", "12")
            .with_body("rate limited")
            .create_async()
            .await;

        let transport = HttpTransport::new(TransportConfig {
            base_url: format!("{}/", server.url()),
            ..Default::default()
        })
        .unwrap();

        let err = transport.get::<serde_json::Value>("v1/ping").await.unwrap_err();
        match err {
            TransportError::Api(ApiError::RateLimit {
                retry_after_secs, ..
            }) => assert_eq!(retry_after_secs, Some(12)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
