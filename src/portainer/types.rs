// ABOUTME: Typed request and response bodies for the Portainer and Docker proxy endpoints
// Field names follow the remote JSON exactly, so renames are explicit

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub jwt: String,
}

/// One entry of `GET /docker/containers/json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Names", default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecCreateRequest {
    #[serde(rename = "AttachStdin")]
    pub attach_stdin: bool,
    #[serde(rename = "AttachStdout")]
    pub attach_stdout: bool,
    #[serde(rename = "AttachStderr")]
    pub attach_stderr: bool,
    #[serde(rename = "Cmd")]
    pub cmd: Vec<String>,
    #[serde(rename = "Tty")]
    pub tty: bool,
    pub id: String,
    #[serde(rename = "User", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "WorkingDir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl ExecCreateRequest {
    /// Interactive request: all streams attached and a TTY allocated.
    pub fn interactive(
        container_id: &ContainerId,
        cmd: &[String],
        user: Option<&str>,
        working_dir: Option<&str>,
    ) -> Self {
        Self {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            cmd: cmd.to_vec(),
            tty: true,
            id: container_id.to_string(),
            user: non_empty(user),
            working_dir: non_empty(working_dir),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecCreateResponse {
    #[serde(rename = "Id")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInspectResponse {
    #[serde(rename = "ExitCode")]
    pub exit_code: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResizeRequest {
    #[serde(rename = "Height")]
    pub height: u16,
    #[serde(rename = "Width")]
    pub width: u16,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecInstanceId(pub String);

impl fmt::Display for ExecInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalDimensions {
    pub width: u16,
    pub height: u16,
}
