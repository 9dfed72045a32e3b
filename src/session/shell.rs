// ABOUTME: Coordinates one remote shell: resolve, spawn exec, connect, proxy, exit code
// Every stage before the proxy starts is fatal on its first error

use crate::config::ExecTarget;
use crate::error::{ShellError, TransportError};
use crate::portainer::auth::AuthHeader;
use crate::portainer::client::websocket_base_url;
use crate::portainer::{
    Chooser, ContainerResolver, ExecInstanceId, ExecSessionManager, PortainerClient,
};
use crate::terminal::{ResizeSignaler, SizeSource, TerminalProxy};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

pub type ShellTransport = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected shell: exec instance, live transport and its resize signaler.
pub struct ShellSession {
    exec_id: ExecInstanceId,
    exec: ExecSessionManager,
    transport: ShellTransport,
    resize: ResizeSignaler,
}

impl ShellSession {
    /// Runs every setup stage up to and including the websocket handshake.
    pub async fn establish(
        client: Arc<PortainerClient>,
        target: &ExecTarget,
        chooser: Arc<dyn Chooser>,
        sizes: Arc<dyn SizeSource>,
    ) -> Result<Self, ShellError> {
        eprintln!("Searching for container {}", target.container_pattern);
        let resolver = ContainerResolver::new(Arc::clone(&client), chooser);
        let container = resolver.resolve(&target.container_pattern).await?;
        eprintln!("Target Container: {}, ID {}", container.name, container.id);

        let exec = ExecSessionManager::new(Arc::clone(&client));
        let exec_id = exec
            .spawn(
                &container.id,
                &target.command,
                target.run_as_user.as_deref(),
                target.workdir.as_deref(),
            )
            .await?;

        let credential = client.credential().await?;
        let ws_url = exec_websocket_url(
            client.base_url(),
            client.endpoint_id(),
            &exec_id,
            credential.query_token(),
        )?;

        let mut resize = ResizeSignaler::spawn(exec.clone(), exec_id.clone(), sizes);
        if let Err(e) = resize.watch_window_changes() {
            warn!("Terminal size changes will not be forwarded: {}", e);
        }

        eprintln!("Connecting to a shell ...");
        let request = handshake_request(&ws_url, client.base_url(), &credential)?;
        let timeout = client.timeout();
        let (transport, response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::HandshakeTimeout(timeout.as_secs()))?
            .map_err(TransportError::Handshake)?;
        info!(
            exec_id = %exec_id,
            status = response.status().as_u16(),
            "websocket connected"
        );

        // The remote end only honours a resize once the websocket is up.
        resize.trigger();

        Ok(Self {
            exec_id,
            exec,
            transport,
            resize,
        })
    }

    pub fn exec_id(&self) -> &ExecInstanceId {
        &self.exec_id
    }

    /// Drives the proxy to completion and returns the remote command's exit code.
    pub async fn run<R, W>(self, proxy: TerminalProxy<R, W>) -> Result<i32, ShellError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            exec_id,
            exec,
            transport,
            resize,
        } = self;

        let outcome = proxy.run(transport).await;
        for failure in resize.finish().await {
            debug!("resize failure during session: {}", failure);
        }
        outcome?;

        // The transport is fully closed at this point.
        exec.exit_code(&exec_id).await.map_err(ShellError::from)
    }
}

/// `{ws-base}/websocket/exec?token=..&endpointId=..&id=..`; the token is empty for API-key sessions.
pub fn exec_websocket_url(
    base_url: &str,
    endpoint_id: u64,
    exec_id: &ExecInstanceId,
    token: &str,
) -> Result<Url, TransportError> {
    let raw = format!("{}/websocket/exec", websocket_base_url(base_url));
    let mut url = Url::parse(&raw).map_err(|e| TransportError::InvalidUrl {
        url: raw.clone(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("endpointId", &endpoint_id.to_string())
        .append_pair("id", &exec_id.0);
    Ok(url)
}

/// Handshake request carrying `Origin` and the session's credential header.
pub fn handshake_request(
    url: &Url,
    origin: &str,
    credential: &AuthHeader,
) -> Result<Request, TransportError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(TransportError::Handshake)?;

    let (name, value) = credential.header();
    let headers = request.headers_mut();
    headers.insert("Origin", header_value(origin)?);
    headers.insert(name, header_value(&value)?);
    Ok(request)
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| TransportError::InvalidUrl {
        url: value.to_string(),
        reason: format!("not a valid header value: {}", e),
    })
}
