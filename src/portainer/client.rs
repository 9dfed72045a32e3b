// ABOUTME: HTTP client for the Portainer API and its Docker proxy endpoints
// Normalises the API base, injects credentials, and decodes typed JSON responses

use crate::error::{ApiError, AuthError};
use crate::portainer::auth::{AuthHeader, Authenticator, Credentials};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

pub struct PortainerClient {
    http: reqwest::Client,
    base_url: String,
    endpoint_id: u64,
    auth: Authenticator,
    timeout: Duration,
}

impl PortainerClient {
    pub fn new(
        api_url: &str,
        endpoint_id: u64,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(api_url);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ApiError::Request {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            base_url,
            endpoint_id,
            auth: Authenticator::new(credentials),
            timeout,
        })
    }

    /// API base without a trailing slash, e.g. `https://portainer.local/api`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint_id(&self) -> u64 {
        self.endpoint_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn uses_api_key(&self) -> bool {
        self.auth.credentials().uses_api_key()
    }

    pub async fn credential(&self) -> Result<AuthHeader, AuthError> {
        self.auth.credential(&self.http, &self.base_url).await
    }

    /// Path under the endpoint's Docker proxy, e.g. `containers/json`.
    pub fn docker_url(&self, path: &str) -> String {
        format!(
            "{}/endpoints/{}/docker/{}",
            self.base_url,
            self.endpoint_id,
            path.trim_start_matches('/')
        )
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let body = self.send(Method::GET, url, None::<&()>).await?;
        decode(url, &body)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        payload: &B,
    ) -> Result<T, ApiError> {
        let body = self.send(Method::POST, url, Some(payload)).await?;
        decode(url, &body)
    }

    /// POST whose response body is not interesting; only the status is checked.
    pub async fn post_discard<B: Serialize>(&self, url: &str, payload: &B) -> Result<(), ApiError> {
        self.send(Method::POST, url, Some(payload)).await.map(|_| ())
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        url: &str,
        payload: Option<&B>,
    ) -> Result<Vec<u8>, ApiError> {
        let credential = self.credential().await?;
        let mut request = self.authorized(self.http.request(method.clone(), url), &credential);
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        debug!(%method, %url, "sending portainer request");
        let response = request.send().await.map_err(|source| ApiError::Request {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|source| ApiError::Request {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).trim().to_string();
            warn!(%method, %url, status = status.as_u16(), "portainer request failed");
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(body.to_vec())
    }

    fn authorized(&self, request: RequestBuilder, credential: &AuthHeader) -> RequestBuilder {
        let (name, value) = credential.header();
        request
            .header(reqwest::header::ACCEPT, "application/json")
            .header(name, value)
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}

/// Strips a single trailing slash from the configured API URL.
pub fn normalize_base_url(api_url: &str) -> String {
    api_url.strip_suffix('/').unwrap_or(api_url).to_string()
}

/// Websocket base for the API: `http` becomes `ws`, `https` becomes `wss`.
pub fn websocket_base_url(base_url: &str) -> String {
    match base_url.strip_prefix("http") {
        Some(rest) => format!("ws{}", rest),
        None => base_url.to_string(),
    }
}
