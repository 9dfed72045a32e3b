// ABOUTME: Error types for every stage of a remote shell session
// Setup stages are fatal on first error; the proxy reports only its first pump failure

use thiserror::Error;

/// Raw failures talking to the Portainer HTTP API, wrapped by the stage errors below.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("both username and password should be provided for JWT auth")]
    MissingCredentials,

    #[error("authentication rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token exchange failed: {0}")]
    Exchange(String),
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(
        "container {pattern} not existed in system, not running, or you don't have access permissions"
    )]
    NotFound { pattern: String },

    #[error("invalid selection {input:?}: expected a number between 1 and {count}")]
    InvalidSelection { input: String, count: usize },

    #[error("invalid container name pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to read container selection: {0}")]
    Prompt(#[from] std::io::Error),

    #[error("failed to list containers: {0}")]
    Api(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum ExecSpawnError {
    #[error("failed to run exec on container {container_id}: {source}")]
    Create {
        container_id: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to inspect exec instance {exec_id}: {source}")]
    Inspect {
        exec_id: String,
        #[source]
        source: ApiError,
    },

    #[error("exec instance {exec_id} has not reported an exit code")]
    MissingExitCode { exec_id: String },

    #[error("failed to resize exec instance {exec_id}: {source}")]
    Resize {
        exec_id: String,
        #[source]
        source: ApiError,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid websocket url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("we couldn't connect to this container: {0}")]
    Handshake(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("websocket handshake timed out after {0}s")]
    HandshakeTimeout(u64),

    #[error("connection closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("websocket failure: {0}")]
    Socket(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("{pump} pump failed: {reason}")]
    PumpFailed { pump: &'static str, reason: String },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum TerminalIoError {
    #[error("failed to switch terminal to raw mode: {0}")]
    RawMode(#[source] std::io::Error),

    #[error("failed to read local input: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write local output: {0}")]
    Write(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Everything that can end a session before the remote command reports an exit code.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    ExecSpawn(#[from] ExecSpawnError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    TerminalIo(#[from] TerminalIoError),
}

impl ShellError {
    /// Process exit status used when the session could not report a remote exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::Config(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T, E = ShellError> = std::result::Result<T, E>;
