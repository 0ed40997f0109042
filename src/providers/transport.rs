//! Resilient HTTP transport to the model backend.
//!
//! Every call makes at most two attempts. The first goes over a pooled
//! keep-alive connection; when it fails at the network level or with a 5xx,
//! the transport pauses briefly and retries once on a fresh connection
//! (`Connection: close`, no pooling). A 4xx is terminal on the first attempt.
//!
//! Both HTTP clients are created on first use and reused for the lifetime of
//! the transport; share one transport (behind an `Arc`) per process.

use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::ProviderError;
use crate::utils::string::preview;

/// Characters of a failed response body kept in logs and errors.
const BODY_PREVIEW_CHARS: usize = 200;

/// Timeouts and pooling for [`ResilientTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Longest silence tolerated on a single socket read, headers included
    pub read_timeout: Duration,
    /// Pause before the fresh-connection attempt
    pub retry_delay: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&BackendConfig::default())
    }
}

impl From<&BackendConfig> for TransportConfig {
    fn from(config: &BackendConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            pool_max_idle_per_host: config.pool_max_idle_per_host,
        }
    }
}

/// Two-stage JSON POST client.
pub struct ResilientTransport {
    config: TransportConfig,
    pooled: OnceCell<Client>,
    fresh: OnceCell<Client>,
}

impl ResilientTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            pooled: OnceCell::new(),
            fresh: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn pooled_client(&self) -> Result<&Client, ProviderError> {
        self.pooled.get_or_try_init(|| {
            Client::builder()
                .connect_timeout(self.config.connect_timeout)
                .read_timeout(self.config.read_timeout)
                .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
                .build()
                .map_err(|e| ProviderError::Transient(format!("HTTP client init failed: {}", e)))
        })
    }

    fn fresh_client(&self) -> Result<&Client, ProviderError> {
        self.fresh.get_or_try_init(|| {
            Client::builder()
                .connect_timeout(self.config.connect_timeout)
                .read_timeout(self.config.read_timeout)
                .pool_max_idle_per_host(0)
                .build()
                .map_err(|e| ProviderError::Transient(format!("HTTP client init failed: {}", e)))
        })
    }

    /// POST `payload` to `endpoint` with the two-attempt policy.
    ///
    /// # Arguments
    /// * `endpoint` - Full URL of the chat-completions endpoint
    /// * `api_key` - Bearer token; never logged
    /// * `payload` - JSON request body
    ///
    /// # Returns
    /// The parsed JSON body of a 2xx response, or the classified failure of
    /// the last attempt made.
    pub async fn post(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<Value, ProviderError> {
        match self.attempt(endpoint, api_key, payload, false).await {
            Err(e) if e.is_retryable() => {
                warn!(
                    component = "transport",
                    error = %e,
                    "Backend attempt failed, retrying on a fresh connection"
                );
                tokio::time::sleep(self.config.retry_delay).await;
                self.attempt(endpoint, api_key, payload, true).await
            }
            other => other,
        }
    }

    /// POST once over a fresh, unpooled connection.
    pub async fn post_fresh(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<Value, ProviderError> {
        self.attempt(endpoint, api_key, payload, true).await
    }

    async fn attempt(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        fresh: bool,
    ) -> Result<Value, ProviderError> {
        let client = if fresh {
            self.fresh_client()?
        } else {
            self.pooled_client()?
        };

        let mut request = client
            .post(endpoint)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(payload);
        if fresh {
            request = request.header(CONNECTION, "close");
        }

        let response = request.send().await.map_err(|e| {
            warn!(fresh, timeout = e.is_timeout(), connect = e.is_connect(), "Backend request failed: {}", e);
            ProviderError::Transient(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("reading body failed: {}", e)))?;

        if status.is_success() {
            debug!(status = status.as_u16(), fresh, bytes = body.len(), "Backend responded");
            return serde_json::from_str(&body).map_err(|e| {
                warn!(status = status.as_u16(), body = %preview(&body, BODY_PREVIEW_CHARS), "Backend returned non-JSON body");
                ProviderError::MalformedResponse(format!("{}: {}", e, preview(&body, BODY_PREVIEW_CHARS)))
            });
        }

        warn!(
            status = status.as_u16(),
            fresh,
            body = %preview(&body, BODY_PREVIEW_CHARS),
            "Backend returned error status"
        );
        Err(classify_status(status, &body))
    }
}

/// Map a non-2xx status to a failure class.
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = preview(body, BODY_PREVIEW_CHARS);
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ProviderError::PayloadTooLarge(message)
    } else if status.is_client_error() {
        ProviderError::ClientRejection {
            status: status.as_u16(),
            message,
        }
    } else {
        ProviderError::Transient(format!("HTTP {}: {}", status.as_u16(), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(500),
            retry_delay: Duration::from_millis(10),
            pool_max_idle_per_host: 4,
        }
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.map(|r| r.len()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_success_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let transport = ResilientTransport::new(fast_config());
        let body = transport
            .post(&format!("{}/chat/completions", server.uri()), "sk-test", &json!({}))
            .await
            .unwrap();
        assert_eq!(body, json!({"ok": true}));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_fails_once_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"attempt": 2})))
            .mount(&server)
            .await;

        let transport = ResilientTransport::new(fast_config());
        let body = transport.post(&server.uri(), "k", &json!({})).await.unwrap();
        assert_eq!(body["attempt"], 2);
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
            .mount(&server)
            .await;

        let transport = ResilientTransport::new(fast_config());
        let err = transport.post(&server.uri(), "k", &json!({})).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert!(!err.is_retryable());
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_payload_too_large_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413))
            .mount(&server)
            .await;

        let transport = ResilientTransport::new(fast_config());
        let err = transport.post(&server.uri(), "k", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::PayloadTooLarge(_)));
        assert!(err.triggers_downgrade());
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_two_server_errors_give_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = ResilientTransport::new(fast_config());
        let err = transport.post(&server.uri(), "k", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_read_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let transport = ResilientTransport::new(fast_config());
        let err = transport.post(&server.uri(), "k", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
    }

    /// Serves one response whose body arrives in chunks `gap` apart.
    async fn trickle_server(chunks: Vec<&'static str>, gap: Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let body_len: usize = chunks.iter().map(|c| c.len()).sum();
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body_len
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            for chunk in chunks {
                tokio::time::sleep(gap).await;
                socket.write_all(chunk.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_slow_body_within_read_timeout_succeeds() {
        // 3 gaps of 300ms: each under the 500ms read timeout, the total over it
        let uri = trickle_server(vec![r#"{"ok""#, r#":tr"#, r#"ue}"#], Duration::from_millis(300)).await;

        let transport = ResilientTransport::new(fast_config());
        let body = transport.post(&uri, "k", &json!({})).await.unwrap();
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let transport = ResilientTransport::new(fast_config());
        let err = transport.post(&server.uri(), "k", &json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_post_fresh_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let transport = ResilientTransport::new(fast_config());
        assert!(transport.post_fresh(&server.uri(), "k", &json!({})).await.is_err());
        assert_eq!(request_count(&server).await, 1);
    }

    #[test]
    fn test_config_from_backend() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(4));
        assert_eq!(config.read_timeout, Duration::from_secs(20));
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert_eq!(config.pool_max_idle_per_host, 64);
    }
}
