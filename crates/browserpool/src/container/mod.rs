//! Container runtime management.
//!
//! Async interface over the Docker or Podman CLI, reduced to the operations
//! the session controller needs: run a container bound to a host port,
//! inspect its state, fetch its logs, stop and remove it. The runtime is
//! auto-detected or can be configured explicitly.

mod config;
mod error;

pub use config::{ContainerConfig, PortMapping, validate_container_name, validate_image_name};
pub use error::{ContainerError, ContainerResult};

use config::validate_container_id_or_name;

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime.
    #[default]
    Docker,
    /// Podman runtime.
    Podman,
}

impl RuntimeType {
    /// Binary name for this runtime.
    pub fn binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

/// Container runtime capability used by the session controller.
///
/// The controller only ever talks to this trait; tests substitute a fake.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Create and start a container, returning its ID.
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String>;

    /// Stop a running container, with an optional grace timeout in seconds.
    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()>;

    /// Remove a container. A missing container is not an error so teardown
    /// stays idempotent.
    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()>;

    /// Get the container state status string (e.g. "running", "exited").
    /// Returns `Ok(None)` when the container does not exist.
    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>>;

    /// Fetch container logs (stdout and stderr combined).
    async fn get_logs(&self, container_id: &str, tail: Option<u32>) -> ContainerResult<String>;
}

/// Container runtime client shelling out to the docker/podman CLI.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    binary: String,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a new container runtime with auto-detection. Tries Docker
    /// first, then Podman; defaults to Docker if neither is on PATH (calls
    /// will fail at runtime with a clear error).
    pub fn new() -> Self {
        for runtime_type in [RuntimeType::Docker, RuntimeType::Podman] {
            if Self::is_binary_available(runtime_type.binary()) {
                return Self::with_type(runtime_type);
            }
        }
        Self::with_type(RuntimeType::Docker)
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.binary().to_string(),
            runtime_type,
        }
    }

    /// Get the runtime type.
    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run one CLI subcommand and return its stdout.
    async fn run_command(&self, command: &str, args: &[String]) -> ContainerResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Check if the container runtime is available and working.
    pub async fn health_check(&self) -> ContainerResult<String> {
        self.run_command("version", &["version".to_string()]).await
    }
}

fn is_missing_container(err: &ContainerError) -> bool {
    match err {
        ContainerError::CommandFailed { message, .. } => {
            let message = message.to_lowercase();
            message.contains("no such container") || message.contains("not found")
        }
        _ => false,
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;

        let mut args: Vec<String> = vec!["run".to_string(), "-d".to_string()];

        if let Some(ref name) = config.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }

        for port in &config.ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", port.host_port, port.container_port));
        }

        for (key, value) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(config.image.clone());

        let stdout = self.run_command("run", &args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut args: Vec<String> = vec!["stop".to_string()];
        if let Some(t) = timeout_seconds {
            args.push("-t".to_string());
            args.push(t.to_string());
        }
        args.push(container_id.to_string());

        match self.run_command("stop", &args).await {
            Ok(_) => Ok(()),
            Err(err) if is_missing_container(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut args: Vec<String> = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(container_id.to_string());

        match self.run_command("rm", &args).await {
            Ok(_) => Ok(()),
            Err(err) if is_missing_container(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>> {
        validate_container_id_or_name(id_or_name)?;

        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            id_or_name.to_string(),
        ];

        match self.run_command("inspect", &args).await {
            Ok(stdout) => {
                let status = stdout.trim().trim_matches('"').to_string();
                if status.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(status))
                }
            }
            // Container not found is not an error; callers treat it as missing.
            Err(ContainerError::CommandFailed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get_logs(&self, container_id: &str, tail: Option<u32>) -> ContainerResult<String> {
        validate_container_id_or_name(container_id)?;

        let mut args: Vec<String> = vec!["logs".to_string()];
        if let Some(n) = tail {
            args.push("--tail".to_string());
            args.push(n.to_string());
        }
        args.push(container_id.to_string());

        // Browsers log the DevTools line on stderr, so capture both streams.
        let output = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "logs".to_string(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(format!("{stdout}{stderr}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_type_binary_names() {
        assert_eq!(RuntimeType::Docker.binary(), "docker");
        assert_eq!(RuntimeType::Podman.binary(), "podman");
        assert_eq!(ContainerRuntime::with_type(RuntimeType::Podman).runtime_type(), RuntimeType::Podman);
    }

    #[test]
    fn missing_container_errors_are_recognized() {
        let err = ContainerError::CommandFailed {
            command: "rm".to_string(),
            message: "Error: No such container: browser-123".to_string(),
        };
        assert!(is_missing_container(&err));

        let err = ContainerError::CommandFailed {
            command: "stop".to_string(),
            message: "permission denied".to_string(),
        };
        assert!(!is_missing_container(&err));
    }

    #[tokio::test]
    async fn health_check_when_runtime_installed() {
        let runtime = ContainerRuntime::new();
        // Only asserts when docker/podman is actually present.
        if let Ok(version) = runtime.health_check().await {
            assert!(!version.is_empty());
        }
    }
}
