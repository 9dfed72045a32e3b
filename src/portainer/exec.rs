// ABOUTME: Exec instance lifecycle on the Docker proxy: create, resize, and inspect exit code

use crate::error::ExecSpawnError;
use crate::portainer::client::PortainerClient;
use crate::portainer::types::{
    ContainerId, ExecCreateRequest, ExecCreateResponse, ExecInspectResponse, ExecInstanceId,
    ExecResizeRequest, TerminalDimensions,
};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ExecSessionManager {
    client: Arc<PortainerClient>,
}

impl ExecSessionManager {
    pub fn new(client: Arc<PortainerClient>) -> Self {
        Self { client }
    }

    /// Creates a TTY exec instance running `command` as an argument vector.
    pub async fn spawn(
        &self,
        container_id: &ContainerId,
        command: &[String],
        run_as_user: Option<&str>,
        workdir: Option<&str>,
    ) -> Result<ExecInstanceId, ExecSpawnError> {
        let request = ExecCreateRequest::interactive(container_id, command, run_as_user, workdir);
        let url = self
            .client
            .docker_url(&format!("containers/{}/exec", container_id));

        let response: ExecCreateResponse = self
            .client
            .post_json(&url, &request)
            .await
            .map_err(|source| ExecSpawnError::Create {
                container_id: container_id.to_string(),
                source,
            })?;

        info!(container_id = %container_id, exec_id = %response.id, ?command, "spawned exec instance");
        Ok(ExecInstanceId(response.id))
    }

    /// Exit code of a finished exec instance, truncated to an integer.
    ///
    /// Only meaningful once the shell transport has closed.
    pub async fn exit_code(&self, exec_id: &ExecInstanceId) -> Result<i32, ExecSpawnError> {
        let url = self.client.docker_url(&format!("exec/{}/json", exec_id));
        let inspect: ExecInspectResponse =
            self.client
                .get_json(&url)
                .await
                .map_err(|source| ExecSpawnError::Inspect {
                    exec_id: exec_id.to_string(),
                    source,
                })?;

        let code = inspect
            .exit_code
            .ok_or_else(|| ExecSpawnError::MissingExitCode {
                exec_id: exec_id.to_string(),
            })?;
        #[allow(clippy::cast_possible_truncation)]
        let code = code.trunc() as i32;
        debug!(exec_id = %exec_id, code, "exec instance finished");
        Ok(code)
    }

    pub async fn resize(
        &self,
        exec_id: &ExecInstanceId,
        size: TerminalDimensions,
    ) -> Result<(), ExecSpawnError> {
        let url = self.client.docker_url(&format!(
            "exec/{}/resize?h={}&w={}",
            exec_id, size.height, size.width
        ));
        let request = ExecResizeRequest {
            height: size.height,
            width: size.width,
            id: exec_id.to_string(),
        };

        self.client
            .post_discard(&url, &request)
            .await
            .map_err(|source| ExecSpawnError::Resize {
                exec_id: exec_id.to_string(),
                source,
            })?;
        debug!(exec_id = %exec_id, width = size.width, height = size.height, "pushed terminal size");
        Ok(())
    }
}
