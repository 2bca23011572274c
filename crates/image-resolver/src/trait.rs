//! ImageResolver trait for mocking

use crate::error::ImageError;

/// Scanner image used when the AuditConfig leaves the name empty
pub const DEFAULT_SCANNER_IMAGE: &str = "ghcr.io/microscaler/audit-scanner";
/// Scanner tag used when the AuditConfig leaves the tag empty
pub const DEFAULT_SCANNER_TAG: &str = "latest";
/// Operator image, also serving the admission webhook and the scan API
pub const DEFAULT_OPERATOR_IMAGE: &str = "ghcr.io/microscaler/audit-operator";
/// Operator tag used when none is configured
pub const DEFAULT_OPERATOR_TAG: &str = "latest";

/// Resolves container images for the reconcilers
///
/// Implementations must be stateless from the caller's point of view: the
/// same inputs yield the same reference as long as the registry does not
/// move the tag.
#[async_trait::async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolve `name:tag` to a fully qualified reference. With
    /// `skip_resolution` the tag is trusted and returned as `name:tag`.
    async fn resolve(&self, name: &str, tag: &str, skip_resolution: bool) -> Result<String, ImageError>;

    /// Scanner image, with defaults applied to empty fields
    async fn scanner_image(&self, name: &str, tag: &str, skip_resolution: bool) -> Result<String, ImageError> {
        let name = non_empty_or(name, DEFAULT_SCANNER_IMAGE);
        let tag = non_empty_or(tag, DEFAULT_SCANNER_TAG);
        self.resolve(name, tag, skip_resolution).await
    }

    /// Operator image, with defaults applied to empty fields
    async fn operator_image(&self, name: &str, tag: &str, skip_resolution: bool) -> Result<String, ImageError> {
        let name = non_empty_or(name, DEFAULT_OPERATOR_IMAGE);
        let tag = non_empty_or(tag, DEFAULT_OPERATOR_TAG);
        self.resolve(name, tag, skip_resolution).await
    }
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { default } else { trimmed }
}
