//! Single-shot HTTP retrieval of script bytes.

use crate::error::RunError;
use crate::source::ResolvedSource;
use std::time::Duration;
use tracing::{debug, warn};

/// How much of an error body is kept for diagnostics.
const ERROR_BODY_PREVIEW: usize = 512;

/// GETs scripts with a shared client. The client's timeout covers connect, headers and body.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("http client: {}", e))?;
        Ok(Self { client, timeout })
    }

    /// Fetch once. No retries.
    pub async fn fetch(&self, source: &ResolvedSource) -> Result<Vec<u8>, RunError> {
        debug!(url = %source, "Fetching script");

        let response = self
            .client
            .get(source.url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let preview = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_PREVIEW)])
                .trim()
                .to_string();
            warn!(url = %source, %status, "Remote returned non-success status");
            return Err(RunError::FetchFailed(if preview.is_empty() {
                format!("{} returned {}", source, status)
            } else {
                format!("{} returned {}: {}", source, status, preview)
            }));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        debug!(url = %source, bytes = body.len(), "Script fetched");
        Ok(body.to_vec())
    }

    fn classify(&self, err: reqwest::Error) -> RunError {
        if err.is_timeout() {
            RunError::FetchTimeout(self.timeout.as_millis() as u64)
        } else {
            RunError::FetchFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer, p: &str) -> ResolvedSource {
        ResolvedSource {
            url: Url::parse(&format!("{}{}", server.uri(), p)).unwrap(),
        }
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acme/tools/main/run.py"))
            .respond_with(ResponseTemplate::new(200).set_body_string("print(42)\n"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
        let bytes = fetcher.fetch(&source(&server, "/acme/tools/main/run.py")).await.unwrap();
        assert_eq!(bytes, b"print(42)\n");
    }

    #[tokio::test]
    async fn not_found_is_fetch_failed_with_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("404: Not Found"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
        let err = fetcher.fetch(&source(&server, "/missing.py")).await.unwrap_err();
        match err {
            RunError::FetchFailed(msg) => {
                assert!(msg.contains("404"), "{}", msg);
                assert!(msg.contains("Not Found"), "{}", msg);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_remote_is_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(Duration::from_millis(200)).unwrap();
        let err = fetcher.fetch(&source(&server, "/slow.py")).await.unwrap_err();
        assert!(matches!(err, RunError::FetchTimeout(200)), "{:?}", err);
    }

    #[tokio::test]
    async fn connection_refused_is_fetch_failed() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = Fetcher::new(Duration::from_secs(2)).unwrap();
        let src = ResolvedSource {
            url: Url::parse(&format!("http://{}/x.py", addr)).unwrap(),
        };
        let err = fetcher.fetch(&src).await.unwrap_err();
        assert!(matches!(err, RunError::FetchFailed(_)), "{:?}", err);
    }
}
