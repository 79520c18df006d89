//! Docker API wrapper using the bollard crate.
//!
//! This module provides a high-level interface to the Docker operations the
//! sandbox layer needs: network and container lifecycle, command execution
//! with demuxed output, deadline-bounded execution, and tar-streamed file
//! uploads into running containers.

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use futures::StreamExt;

use crate::error::SandboxError;
use crate::sandbox::resources::ResourceCaps;

/// Configuration for creating a new sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique name for the container.
    pub name: String,
    /// Docker image to use.
    pub image: String,
    /// Command keeping the container alive.
    pub cmd: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Resource caps applied at creation time.
    pub caps: ResourceCaps,
    /// Network the container attaches to.
    pub network: Option<String>,
    /// Labels identifying the container to the sweeper.
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    /// Creates a new container spec with the given name, image and caps.
    pub fn new(name: impl Into<String>, image: impl Into<String>, caps: ResourceCaps) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cmd: vec!["sleep".to_string(), "infinity".to_string()],
            working_dir: None,
            caps,
            network: None,
            labels: HashMap::new(),
        }
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Attaches the container to a network.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Sets the container labels.
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// Result of executing a command in a container.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Outcome of a deadline-bounded command execution.
#[derive(Debug)]
pub enum ExecOutcome {
    /// Command finished before the deadline.
    Completed(ExecResult),
    /// Deadline elapsed; output collected up to the kill is preserved.
    TimedOut { stdout: String, stderr: String },
}

/// Summary of a container found through a label query.
#[derive(Debug, Clone)]
pub struct LabelledContainer {
    /// Container ID.
    pub id: String,
    /// Primary container name, without the leading slash.
    pub name: String,
}

/// Docker client wrapper for sandbox operations.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::DaemonUnavailable` if the daemon is not
    /// accessible.
    pub fn new() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Creates a new client from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Creates a private bridge network.
    pub async fn create_network(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<(), SandboxError> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            labels,
            ..Default::default()
        };

        self.docker
            .create_network(options)
            .await
            .map_err(|e| SandboxError::NetworkFailed(format!("Failed to create network: {e}")))?;

        Ok(())
    }

    /// Removes a network by name. Not-found is treated as success.
    pub async fn remove_network(&self, name: &str) -> Result<(), SandboxError> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(SandboxError::NetworkFailed(format!(
                "Failed to remove network: {e}"
            ))),
        }
    }

    /// Lists networks carrying the given label.
    pub async fn list_networks_by_label(&self, label: &str) -> Result<Vec<String>, SandboxError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);

        let options = ListNetworksOptions { filters };
        let networks = self
            .docker
            .list_networks(Some(options))
            .await
            .map_err(|e| SandboxError::NetworkFailed(format!("Failed to list networks: {e}")))?;

        Ok(networks.into_iter().filter_map(|n| n.name).collect())
    }

    /// Creates and starts a container from the given spec.
    ///
    /// Pulls the image first if it is not available locally.
    ///
    /// # Returns
    ///
    /// The container ID on success.
    pub async fn run_container(&self, spec: ContainerSpec) -> Result<String, SandboxError> {
        self.ensure_image(&spec.image).await?;

        let host_config = HostConfig {
            memory: Some(spec.caps.memory_bytes),
            cpu_period: spec.caps.cpu_quota().map(|_| spec.caps.cpu_period()),
            cpu_quota: spec.caps.cpu_quota(),
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: spec.working_dir.clone(),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            tty: Some(true),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::RunFailed(format!("Failed to create container: {e}")))?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::RunFailed(format!("Failed to start container: {e}")))?;

        Ok(response.id)
    }

    /// Stops a container, waiting up to 5 seconds before SIGKILL.
    ///
    /// Not-found is treated as success.
    pub async fn stop_container(&self, name: &str) -> Result<(), SandboxError> {
        let options = StopContainerOptions { t: 5 };

        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(SandboxError::RunFailed(format!(
                "Failed to stop container: {e}"
            ))),
        }
    }

    /// Force-removes a container. Not-found is treated as success.
    pub async fn remove_container(&self, name: &str) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(SandboxError::RunFailed(format!(
                "Failed to remove container: {e}"
            ))),
        }
    }

    /// Resolves a container ID by name.
    ///
    /// Returns `None` when no container with that name exists.
    pub async fn container_id_by_name(&self, name: &str) -> Result<Option<String>, SandboxError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info.id),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(SandboxError::RunFailed(format!(
                "Failed to inspect container: {e}"
            ))),
        }
    }

    /// Lists all containers (running or not) carrying the given label.
    pub async fn list_containers_by_label(
        &self,
        label: &str,
    ) -> Result<Vec<LabelledContainer>, SandboxError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| SandboxError::RunFailed(format!("Failed to list containers: {e}")))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())?;
                Some(LabelledContainer { id, name })
            })
            .collect())
    }

    /// Executes a command inside a running container.
    ///
    /// # Returns
    ///
    /// `ExecResult` containing exit code, stdout, and stderr.
    pub async fn exec_command(&self, id: &str, cmd: &[&str]) -> Result<ExecResult, SandboxError> {
        match self.exec_with_deadline(id, cmd, None).await? {
            ExecOutcome::Completed(result) => Ok(result),
            // Unreachable without a deadline; kept total for the type.
            ExecOutcome::TimedOut { .. } => Err(SandboxError::RunFailed(
                "Command did not complete".to_string(),
            )),
        }
    }

    /// Executes a command with an optional wall-clock deadline.
    ///
    /// Output collected before the deadline elapsed is preserved in the
    /// `TimedOut` outcome; the command itself is left to the caller to kill.
    pub async fn exec_with_deadline(
        &self,
        id: &str,
        cmd: &[&str],
        deadline: Option<Duration>,
    ) -> Result<ExecOutcome, SandboxError> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| SandboxError::RunFailed(format!("Failed to create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::RunFailed(format!("Failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            let collect = async {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(SandboxError::RunFailed(format!(
                                "Error reading output: {e}"
                            )));
                        }
                    }
                }
                Ok(())
            };

            let timed_out = match deadline {
                Some(limit) => {
                    let result = tokio::time::timeout(limit, collect).await;
                    match result {
                        Ok(Ok(())) => false,
                        Ok(Err(e)) => return Err(e),
                        Err(_) => true,
                    }
                }
                None => {
                    collect.await?;
                    false
                }
            };

            if timed_out {
                return Ok(ExecOutcome::TimedOut { stdout, stderr });
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::RunFailed(format!("Failed to inspect exec: {e}")))?;

        let exit_code = exec_info.exit_code.unwrap_or(-1);

        Ok(ExecOutcome::Completed(ExecResult {
            exit_code,
            stdout,
            stderr,
        }))
    }

    /// Uploads a single file into a container directory via a tar stream.
    ///
    /// This avoids shell interpolation entirely, so file contents may hold
    /// arbitrary quotes and escapes.
    pub async fn upload_file(
        &self,
        id: &str,
        dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> Result<(), SandboxError> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, file_name, contents)
            .map_err(|e| SandboxError::CopyFailed(format!("Failed to build archive: {e}")))?;
        let archive = builder
            .into_inner()
            .map_err(|e| SandboxError::CopyFailed(format!("Failed to finish archive: {e}")))?;

        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await
            .map_err(|e| SandboxError::CopyFailed(format!("Failed to upload to container: {e}")))?;

        Ok(())
    }

    /// Pulls an image if it is not available locally.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxError::RunFailed(format!("Failed to pull image: {e}")))?;
        }

        Ok(())
    }
}

/// Whether a bollard error is a 404 from the daemon.
fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_spec_builder() {
        let caps = ResourceCaps::controller(512 * 1024 * 1024, 0.5);
        let spec = ContainerSpec::new("ansibox_u1_abc", "ansible/ansible:latest", caps)
            .with_working_dir("/ansible")
            .with_network("ansibox_net_u1_abc")
            .with_labels(HashMap::from([(
                "app".to_string(),
                "ansibox".to_string(),
            )]));

        assert_eq!(spec.name, "ansibox_u1_abc");
        assert_eq!(spec.image, "ansible/ansible:latest");
        assert_eq!(spec.cmd, vec!["sleep", "infinity"]);
        assert_eq!(spec.working_dir.as_deref(), Some("/ansible"));
        assert_eq!(spec.network.as_deref(), Some("ansibox_net_u1_abc"));
        assert_eq!(spec.labels.get("app").map(String::as_str), Some("ansibox"));
        assert_eq!(spec.caps.cpu_quota(), Some(50_000));
    }

    #[test]
    fn test_exec_result() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "PLAY RECAP".to_string(),
            stderr: String::new(),
        };

        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("PLAY RECAP"));
        assert!(result.stderr.is_empty());
    }
}
