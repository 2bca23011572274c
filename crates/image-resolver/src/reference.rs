//! Image reference parsing
//!
//! Splits a repository name into the registry host and the repository path
//! the distribution API expects, applying Docker Hub's conventions for short
//! names (`alpine` is `registry-1.docker.io/library/alpine`).

use crate::error::ImageError;

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// A parsed `name` + `tag` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Name exactly as configured, used when rendering the result
    pub name: String,
    /// Registry host serving the distribution API
    pub registry: String,
    /// Repository path on that registry
    pub repository: String,
    /// Tag or `sha256:` digest
    pub tag: String,
}

impl ImageReference {
    /// Parse a repository name and tag
    pub fn parse(name: &str, tag: &str) -> Result<Self, ImageError> {
        let name = name.trim();
        let tag = tag.trim();
        if name.is_empty() || tag.is_empty() {
            return Err(ImageError::InvalidReference(format!("{name}:{tag}")));
        }
        if name.contains('@') || name.chars().any(char::is_whitespace) {
            return Err(ImageError::InvalidReference(name.to_string()));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => (first.to_string(), rest.to_string()),
            Some(_) => (DOCKER_HUB.to_string(), name.to_string()),
            None => (DOCKER_HUB.to_string(), format!("library/{name}")),
        };

        let registry = if registry == DOCKER_HUB || registry == "index.docker.io" {
            DOCKER_HUB_API.to_string()
        } else {
            registry
        };

        Ok(Self {
            name: name.to_string(),
            registry,
            repository,
            tag: tag.to_string(),
        })
    }

    /// The tag already pins a digest
    pub fn is_digest(&self) -> bool {
        self.tag.starts_with("sha256:")
    }

    /// `name:tag`, as written when resolution is skipped
    pub fn tagged(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// `name@digest`
    pub fn pinned(&self, digest: &str) -> String {
        format!("{}@{}", self.name, digest)
    }

    /// Manifest URL for the distribution API
    pub fn manifest_url(&self) -> String {
        let scheme = if self.registry.starts_with("localhost") { "http" } else { "https" };
        format!("{}://{}/v2/{}/manifests/{}", scheme, self.registry, self.repository, self.tag)
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_docker_hub_name() {
        let r = ImageReference::parse("alpine", "3.20").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "library/alpine");
        assert_eq!(r.tagged(), "alpine:3.20");
    }

    #[test]
    fn test_docker_hub_org_name() {
        let r = ImageReference::parse("microscaler/scanner", "1.0").unwrap();
        assert_eq!(r.registry, "registry-1.docker.io");
        assert_eq!(r.repository, "microscaler/scanner");
    }

    #[test]
    fn test_explicit_registry() {
        let r = ImageReference::parse("ghcr.io/microscaler/audit-scanner", "latest").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "microscaler/audit-scanner");
        assert_eq!(
            r.manifest_url(),
            "https://ghcr.io/v2/microscaler/audit-scanner/manifests/latest"
        );
        assert_eq!(
            r.pinned("sha256:abc"),
            "ghcr.io/microscaler/audit-scanner@sha256:abc"
        );
    }

    #[test]
    fn test_local_registry_uses_http() {
        let r = ImageReference::parse("localhost:5000/scanner", "dev").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert!(r.manifest_url().starts_with("http://localhost:5000/v2/scanner/"));
    }

    #[test]
    fn test_digest_tag() {
        let r = ImageReference::parse("ghcr.io/x/y", "sha256:0123").unwrap();
        assert!(r.is_digest());
    }

    #[test]
    fn test_rejects_empty_and_malformed() {
        assert!(ImageReference::parse("", "latest").is_err());
        assert!(ImageReference::parse("alpine", " ").is_err());
        assert!(ImageReference::parse("alpine@sha256:1", "x").is_err());
    }
}
