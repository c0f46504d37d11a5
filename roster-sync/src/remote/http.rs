//! reqwest-backed [`RemoteClient`].

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::{debug, trace};
use url::Url;

use super::{Endpoint, RemoteClient, RemoteError, RemoteRequest, RemoteResponse};
use crate::{Error, Result};

const API_KEY_HEADER: &str = "X-Api-Key";
const CHARACTER_HEADER: &str = "X-Character-Name";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// HTTP client for the roster service.
#[derive(Clone)]
pub struct HttpRemoteClient {
    client: Client,
    base_url: Url,
}

impl HttpRemoteClient {
    /// Create a client for `base_url`. A zero `timeout` disables the
    /// per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        install_rustls_provider();

        let base_url = Url::parse(base_url)
            .map_err(|e| Error::config(format!("Invalid server URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(format!(
                "Server URL '{}' cannot be used as a base",
                base_url
            )));
        }

        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve the method and absolute URL of an endpoint.
    pub fn route(&self, endpoint: &Endpoint) -> std::result::Result<(Method, Url), RemoteError> {
        let (method, segments): (Method, Vec<&str>) = match endpoint {
            Endpoint::Heartbeat => (Method::POST, vec!["api", "heartbeat"]),
            Endpoint::FriendList => (Method::GET, vec!["api", "friends"]),
            Endpoint::FriendRequests => (Method::GET, vec!["api", "friends", "requests"]),
            Endpoint::Preferences => (Method::PATCH, vec!["api", "preferences"]),
            Endpoint::StatusFlags => (Method::PATCH, vec!["api", "characters", "privacy"]),
            Endpoint::RemoveFriend(name) => (Method::DELETE, vec!["api", "friends", name.as_str()]),
        };

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidRequest("base URL has no path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok((method, url))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn call(&self, request: &RemoteRequest) -> std::result::Result<RemoteResponse, RemoteError> {
        let (method, url) = self.route(&request.endpoint)?;
        trace!(endpoint = %request.endpoint, %method, %url, "Sending request");

        let mut builder = self
            .client
            .request(method, url)
            .header(API_KEY_HEADER, &request.session.api_key)
            .header(CHARACTER_HEADER, &request.session.character_name);
        if let Some(body) = &request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        trace!(endpoint = %request.endpoint, status, bytes = body.len(), "Received response");
        Ok(RemoteResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes() {
        let client = HttpRemoteClient::new("https://api.example.com/v1/", Duration::ZERO).unwrap();

        let (method, url) = client.route(&Endpoint::Heartbeat).unwrap();
        assert_eq!(method, Method::POST);
        assert_eq!(url.as_str(), "https://api.example.com/v1/api/heartbeat");

        let (method, url) = client
            .route(&Endpoint::RemoveFriend("Aria Jones".to_string()))
            .unwrap();
        assert_eq!(method, Method::DELETE);
        assert_eq!(url.as_str(), "https://api.example.com/v1/api/friends/Aria%20Jones");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpRemoteClient::new("not a url", Duration::ZERO),
            Err(Error::Configuration(_))
        ));
    }
}
