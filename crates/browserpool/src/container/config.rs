//! Container configuration and input validation.

use std::collections::HashMap;

use super::error::{ContainerError, ContainerResult};

/// Port mapping from a host port to a container port (tcp).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port on the host.
    pub host_port: u16,
    /// Port in the container.
    pub container_port: u16,
}

/// Configuration for creating a new container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name (optional).
    pub name: Option<String>,
    /// Docker/OCI image to use.
    pub image: String,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Port mappings.
    pub ports: Vec<PortMapping>,
}

impl ContainerConfig {
    /// Create a new container config with the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add a port mapping.
    pub fn port(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push(PortMapping {
            host_port,
            container_port,
        });
        self
    }

    /// Validate all fields before handing them to the runtime CLI.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;

        if let Some(ref name) = self.name {
            validate_container_name(name)?;
        }

        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }

        Ok(())
    }
}

/// Validate a Docker/OCI image name.
///
/// Image names follow `[registry/][namespace/]name[:tag][@digest]`; only
/// alphanumerics and `.`, `-`, `_`, `/`, `:`, `@` are accepted.
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };

    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{image}' contains invalid characters"
        )));
    }

    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate a container name: alphanumeric with hyphens and underscores,
/// starting with an alphanumeric character or underscore.
pub fn validate_container_name(name: &str) -> ContainerResult<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container name cannot be empty".to_string(),
        ));
    }

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container name exceeds maximum length of 128 characters".to_string(),
        ));
    }

    let mut chars = name.chars();
    let first = chars.next().unwrap_or('-');
    if !first.is_ascii_alphanumeric() && first != '_' {
        return Err(ContainerError::InvalidInput(
            "container name must start with an alphanumeric character or underscore".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container name '{name}' contains invalid characters"
        )));
    }

    Ok(())
}

/// Validate a container ID or name as passed to stop/rm/inspect/logs.
pub fn validate_container_id_or_name(id: &str) -> ContainerResult<()> {
    if id.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container ID or name cannot be empty".to_string(),
        ));
    }

    if id.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container ID or name exceeds maximum length".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !id.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container ID or name '{id}' contains invalid characters"
        )));
    }

    Ok(())
}

/// Validate an environment variable key (POSIX conventions).
fn validate_env_var_key(key: &str) -> ContainerResult<()> {
    if key.is_empty() {
        return Err(ContainerError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    }

    let mut chars = key.chars();
    let first = chars.next().unwrap_or('-');
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{key}' must start with a letter or underscore"
        )));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if !key.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{key}' contains invalid characters"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_names() {
        assert!(validate_image_name("chromium-cdp").is_ok());
        assert!(validate_image_name("chromium-cdp:latest").is_ok());
        assert!(validate_image_name("myregistry.io/browser:v1.0").is_ok());
        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("image with spaces").is_err());
        assert!(validate_image_name("image$(whoami)").is_err());
        assert!(validate_image_name("../../../etc/passwd").is_err());
    }

    #[test]
    fn container_names() {
        assert!(validate_container_name("browser-9100").is_ok());
        assert!(validate_container_name("_scratch").is_ok());
        assert!(validate_container_name("-starts-with-dash").is_err());
        assert!(validate_container_name("has;semicolon").is_err());
        assert!(validate_container_name("").is_err());
    }

    #[test]
    fn ids_passed_to_cli() {
        assert!(validate_container_id_or_name("3f8a9c2b1d").is_ok());
        assert!(validate_container_id_or_name("browser-abc123").is_ok());
        assert!(validate_container_id_or_name("$(id)").is_err());
    }

    #[test]
    fn config_validation() {
        let config = ContainerConfig::new("chromium-cdp")
            .name("browser-test")
            .env("DISPLAY", ":99")
            .port(9100, 9222);
        assert!(config.validate().is_ok());

        let bad = ContainerConfig::new("chromium-cdp").name("bad name");
        assert!(bad.validate().is_err());

        let bad_env = ContainerConfig::new("chromium-cdp").env("1BAD", "x");
        assert!(bad_env.validate().is_err());
    }
}
