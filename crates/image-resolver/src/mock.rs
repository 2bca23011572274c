//! Static ImageResolver for unit testing
//!
//! Resolves without network access: `name:tag` is pinned to a digest derived
//! from the reference, or returned as-is when resolution is skipped.

use std::sync::{Arc, Mutex};

use crate::error::ImageError;
use crate::reference::ImageReference;
use crate::resolver_trait::ImageResolver;

/// Deterministic resolver with optional failure injection
#[derive(Debug, Clone, Default)]
pub struct StaticImageResolver {
    fail: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticImageResolver {
    /// Create a resolver that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every resolution fail with a registry error carrying `message`
    pub fn fail_with(&self, message: &str) {
        *self.fail.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(message.to_string());
    }

    /// `name:tag` pairs requested so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Digest the resolver assigns to `name:tag`
    pub fn digest_for(name: &str, tag: &str) -> String {
        let sum = format!("{name}:{tag}")
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x100_0000_01b3));
        format!("sha256:{sum:016x}{sum:016x}{sum:016x}{sum:016x}")
    }
}

#[async_trait::async_trait]
impl ImageResolver for StaticImageResolver {
    async fn resolve(&self, name: &str, tag: &str, skip_resolution: bool) -> Result<String, ImageError> {
        let reference = ImageReference::parse(name, tag)?;
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(reference.tagged());

        if let Some(message) = self.fail.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone() {
            return Err(ImageError::Registry { status: 503, message });
        }
        if skip_resolution || reference.is_digest() {
            return Ok(if reference.is_digest() {
                reference.pinned(&reference.tag)
            } else {
                reference.tagged()
            });
        }
        Ok(reference.pinned(&Self::digest_for(&reference.name, &reference.tag)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pins_deterministically() {
        let resolver = StaticImageResolver::new();
        let a = resolver.resolve("ghcr.io/x/y", "1.0", false).await.unwrap();
        let b = resolver.resolve("ghcr.io/x/y", "1.0", false).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("ghcr.io/x/y@sha256:"));
        assert_eq!(resolver.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let resolver = StaticImageResolver::new();
        resolver.fail_with("registry down");
        let err = resolver.resolve("ghcr.io/x/y", "1.0", true).await.unwrap_err();
        assert!(matches!(err, ImageError::Registry { status: 503, .. }));
    }
}
