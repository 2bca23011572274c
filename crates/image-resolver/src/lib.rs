//! Container image resolution
//!
//! Turns a user-facing `name:tag` into the fully qualified reference the
//! operator writes into pod specs. By default tags are pinned to the
//! manifest digest the registry currently serves, so a moving tag such as
//! `latest` does not silently change running scanners. Operator-wide policy
//! can skip resolution and trust the tag as-is.
//!
//! # Example
//!
//! ```no_run
//! use image_resolver::{ImageResolver, RegistryImageResolver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = RegistryImageResolver::new()?;
//! let image = resolver.scanner_image("", "", false).await?;
//! assert!(image.contains("@sha256:"));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod reference;
pub mod registry;
#[path = "trait.rs"]
pub mod resolver_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::ImageError;
pub use reference::ImageReference;
pub use registry::RegistryImageResolver;
pub use resolver_trait::{
    DEFAULT_OPERATOR_IMAGE, DEFAULT_OPERATOR_TAG, DEFAULT_SCANNER_IMAGE, DEFAULT_SCANNER_TAG, ImageResolver,
};
#[cfg(any(test, feature = "test-util"))]
pub use mock::StaticImageResolver;
