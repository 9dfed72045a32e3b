// ABOUTME: Portainer authentication via static API key or a cached JWT exchange
// The JWT is fetched at most once per client, on the first authenticated call

use crate::error::AuthError;
use crate::portainer::types::{AuthRequest, AuthResponse};
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Exactly one scheme is active per session. An API key always wins.
#[derive(Clone)]
pub enum Credentials {
    ApiKey(String),
    Password { username: String, password: String },
}

impl Credentials {
    pub fn new(user: &str, password: &str, api_key: &str) -> Result<Self, AuthError> {
        if !api_key.is_empty() {
            return Ok(Credentials::ApiKey(api_key.to_string()));
        }
        if user.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        Ok(Credentials::Password {
            username: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn uses_api_key(&self) -> bool {
        matches!(self, Credentials::ApiKey(_))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::ApiKey(_) => f.write_str("Credentials::ApiKey(<redacted>)"),
            Credentials::Password { username, .. } => f
                .debug_struct("Credentials::Password")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// What an authenticated request has to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthHeader {
    ApiKey(String),
    Bearer(String),
}

impl AuthHeader {
    /// Token for the websocket `token` query parameter; API-key sessions send it empty.
    pub fn query_token(&self) -> &str {
        match self {
            AuthHeader::ApiKey(_) => "",
            AuthHeader::Bearer(jwt) => jwt,
        }
    }

    /// Header name and value for HTTP calls and the websocket handshake.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            AuthHeader::ApiKey(key) => (API_KEY_HEADER, key.clone()),
            AuthHeader::Bearer(jwt) => ("Authorization", format!("Bearer {}", jwt)),
        }
    }
}

pub struct Authenticator {
    credentials: Credentials,
    token: OnceCell<String>,
}

impl Authenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            token: OnceCell::new(),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns the header to attach to an authenticated call.
    ///
    /// API-key sessions never touch the network. Password sessions exchange
    /// credentials at `POST {base_url}/auth` once; concurrent first callers wait
    /// on the same exchange instead of racing.
    pub async fn credential(
        &self,
        http: &reqwest::Client,
        base_url: &str,
    ) -> Result<AuthHeader, AuthError> {
        match &self.credentials {
            Credentials::ApiKey(key) => Ok(AuthHeader::ApiKey(key.clone())),
            Credentials::Password { username, password } => {
                let jwt = self
                    .token
                    .get_or_try_init(|| exchange(http, base_url, username, password))
                    .await?;
                Ok(AuthHeader::Bearer(jwt.clone()))
            }
        }
    }
}

async fn exchange(
    http: &reqwest::Client,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<String, AuthError> {
    eprintln!("Retrieving access token");
    let url = format!("{}/auth", base_url);
    debug!(%url, username, "exchanging credentials for jwt");

    let response = http
        .post(&url)
        .json(&AuthRequest { username, password })
        .send()
        .await
        .map_err(|e| AuthError::Exchange(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| AuthError::Exchange(e.to_string()))?;
    let parsed: AuthResponse = serde_json::from_slice(&body)
        .map_err(|e| AuthError::Exchange(format!("unexpected /auth response: {}", e)))?;

    info!("Obtained access token");
    Ok(parsed.jwt)
}
