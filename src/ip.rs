use thiserror::Error;

use crate::engine::IpSource;
use crate::http::{self, HttpClient};

/// The discovery endpoint could not produce a usable answer this run. There
/// is nothing to compare against, so reconciliation cannot proceed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("IP discovery via {url} unavailable: {reason}")]
pub struct IpUnavailable {
    pub url: Box<str>,
    pub reason: Box<str>,
}

/// Asks `url` what the caller's public IP is and returns the trimmed body.
///
/// The body is deliberately not parsed as an address: the update endpoint is
/// the authority on what it accepts, and a malformed body surfaces there as a
/// rejected update carrying the provider's own diagnostics.
pub fn discover(client: &HttpClient, url: &str) -> Result<Box<str>, IpUnavailable> {
    let unavailable = |reason: String| IpUnavailable {
        url: url.into(),
        reason: reason.into(),
    };

    let response = match client.get(url).call() {
        Ok(r) => r,
        Err(http::Error::Status(code, _)) => {
            return Err(unavailable(format!("HTTP status {}", code)))
        }
        Err(http::Error::Tls(reason)) | Err(http::Error::Transport(reason)) => {
            return Err(unavailable(reason.into()))
        }
    };

    let body = response.into_string().map_err(|e| unavailable(e.to_string()))?;
    Ok(body.trim().into())
}

/// Live [`IpSource`] over the shared HTTP client.
pub struct HttpIpSource<'a> {
    client: &'a HttpClient,
}

impl<'a> HttpIpSource<'a> {
    pub fn new(client: &'a HttpClient) -> Self {
        Self { client }
    }
}

impl IpSource for HttpIpSource<'_> {
    fn discover(&self, url: &str) -> Result<Box<str>, IpUnavailable> {
        discover(self.client, url)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client() -> HttpClient {
        HttpClient::new("ddns-sync-test", Duration::from_secs(5))
    }

    async fn serve_body(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/myip"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn surrounding_whitespace_is_trimmed() {
        let server = serve_body("  203.0.113.7\r\n").await;
        let client = client();

        let ip = discover(&client, &format!("{}/myip", server.uri())).unwrap();
        assert_eq!(&*ip, "203.0.113.7");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn body_is_not_validated_as_an_address() {
        // Whatever the endpoint says is taken literally; a bogus body will be
        // caught by the provider, not here.
        let server = serve_body("surprise!").await;
        let client = client();

        let ip = discover(&client, &format!("{}/myip", server.uri())).unwrap();
        assert_eq!(&*ip, "surprise!");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn error_status_means_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/myip"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let client = client();

        let err = discover(&client, &format!("{}/myip", server.uri())).unwrap_err();
        assert!(err.reason.contains("503"), "got: {}", err.reason);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_endpoint_means_unavailable() {
        let client = client();

        // Nothing listens on the discard port.
        let err = discover(&client, "http://127.0.0.1:9/myip").unwrap_err();
        assert_eq!(&*err.url, "http://127.0.0.1:9/myip");
    }
}
