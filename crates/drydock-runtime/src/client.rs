//! The runtime client capability and the request/response shapes it uses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeResult;

/// Tag used when an image reference does not carry one.
pub const DEFAULT_TAG: &str = "latest";

/// Create-container request, already converted to runtime units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub domainname: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub memory_bytes: u64,
    /// Relative CPU weight; 1024 is one full engine.
    pub cpu_shares: u64,
}

/// Options applied when a created container is started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub publish_all_ports: bool,
}

/// What the runtime reports about one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
}

/// Operations the scheduler needs from a container runtime endpoint.
///
/// Every call is a network round-trip in a real implementation; callers
/// must not hold locks across them.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Create a container. Returns `NotFound` if the image is not present locally.
    async fn create_container(&self, config: &ContainerConfig) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str, host: &HostConfig) -> RuntimeResult<()>;

    async fn kill_container(&self, id: &str) -> RuntimeResult<()>;

    async fn remove_container(&self, id: &str) -> RuntimeResult<()>;

    /// Look a container up by runtime ID or by name.
    async fn inspect_container(&self, id_or_name: &str) -> RuntimeResult<ContainerInfo>;

    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<()>;

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>>;
}

/// An image reference split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Split `repo[:tag]` or `repo@digest`. A colon before the last `/`
    /// belongs to a registry port, not a tag. A digest wins over any tag
    /// written alongside it.
    pub fn parse(image: &str) -> Self {
        if let Some((name, digest)) = image.split_once('@') {
            let repository = Self::parse(name).repository;
            if digest.is_empty() {
                return Self {
                    repository,
                    tag: DEFAULT_TAG.to_string(),
                };
            }
            return Self {
                repository,
                tag: digest.to_string(),
            };
        }
        let slash = image.rfind('/').map_or(0, |i| i + 1);
        match image[slash..].rfind(':') {
            Some(colon) if colon + 1 < image.len() - slash => Self {
                repository: image[..slash + colon].to_string(),
                tag: image[slash + colon + 1..].to_string(),
            },
            Some(colon) => Self {
                repository: image[..slash + colon].to_string(),
                tag: DEFAULT_TAG.to_string(),
            },
            None => Self {
                repository: image.to_string(),
                tag: DEFAULT_TAG.to_string(),
            },
        }
    }

    /// Digests are `algorithm:hex`; tags never contain a colon.
    pub fn is_digest(&self) -> bool {
        self.tag.contains(':')
    }

    /// `repository:tag`, or `repository@digest`.
    pub fn canonical(&self) -> String {
        if self.is_digest() {
            format!("{}@{}", self.repository, self.tag)
        } else {
            format!("{}:{}", self.repository, self.tag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_image_defaults_to_latest() {
        let r = ImageReference::parse("nginx");
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.canonical(), "nginx:latest");
    }

    #[test]
    fn explicit_tag_is_kept() {
        let r = ImageReference::parse("library/redis:7.2");
        assert_eq!(r.repository, "library/redis");
        assert_eq!(r.tag, "7.2");
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let r = ImageReference::parse("registry.local:5000/team/api");
        assert_eq!(r.repository, "registry.local:5000/team/api");
        assert_eq!(r.tag, "latest");

        let tagged = ImageReference::parse("registry.local:5000/team/api:v3");
        assert_eq!(tagged.repository, "registry.local:5000/team/api");
        assert_eq!(tagged.tag, "v3");
    }

    #[test]
    fn trailing_colon_falls_back_to_latest() {
        let r = ImageReference::parse("busybox:");
        assert_eq!(r.repository, "busybox");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn digest_reference_keeps_repository_whole() {
        let r = ImageReference::parse("nginx@sha256:abc");
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, "sha256:abc");
        assert!(r.is_digest());
        assert_eq!(r.canonical(), "nginx@sha256:abc");
    }

    #[test]
    fn digest_with_registry_port_and_tag() {
        let r = ImageReference::parse("registry.local:5000/team/api:v3@sha256:0f1e");
        assert_eq!(r.repository, "registry.local:5000/team/api");
        assert_eq!(r.tag, "sha256:0f1e");

        let bare = ImageReference::parse("busybox@");
        assert_eq!(bare.canonical(), "busybox:latest");
        assert!(!bare.is_digest());
    }

    #[test]
    fn container_config_serializes() {
        let config = ContainerConfig {
            name: "web".to_string(),
            image: "nginx".to_string(),
            env: vec!["A=1".to_string()],
            memory_bytes: 1024,
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["memory_bytes"], 1024);
        assert_eq!(json["env"][0], "A=1");
    }
}
