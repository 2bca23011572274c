//! Registry-backed resolver
//!
//! Resolves a tag with a `HEAD` on the manifest endpoint of the OCI
//! distribution API and reads the `Docker-Content-Digest` header. Public
//! registries answer anonymous requests with a 401 challenge; the resolver
//! follows the bearer-token flow once and retries.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ImageError;
use crate::reference::ImageReference;
use crate::resolver_trait::ImageResolver;

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.v2+json";

const DIGEST_HEADER: &str = "docker-content-digest";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Parsed `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct BearerChallenge {
    pub(crate) realm: String,
    pub(crate) service: Option<String>,
    pub(crate) scope: Option<String>,
}

/// Resolves tags against the image registry
#[derive(Debug, Clone)]
pub struct RegistryImageResolver {
    client: Client,
}

impl RegistryImageResolver {
    /// Create a resolver with a 30 second request timeout
    pub fn new() -> Result<Self, ImageError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client })
    }

    async fn head_manifest(&self, url: &str, token: Option<&str>) -> Result<reqwest::Response, ImageError> {
        let mut request = self.client.head(url).header(ACCEPT, MANIFEST_MEDIA_TYPES);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        Ok(request.send().await?)
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, ImageError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }

        debug!("Requesting registry token from {}", challenge.realm);
        let response = self.client.get(&challenge.realm).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(ImageError::Authentication(format!(
                "token endpoint {} returned {}",
                challenge.realm,
                response.status()
            )));
        }
        let body: TokenResponse = response.json().await?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| ImageError::Authentication(format!("no token in response from {}", challenge.realm)))
    }

    async fn resolve_digest(&self, reference: &ImageReference) -> Result<String, ImageError> {
        let url = reference.manifest_url();
        debug!("Resolving {} via {}", reference.tagged(), url);

        let mut response = self.head_manifest(&url, None).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = parse_bearer_challenge(response.headers()).ok_or_else(|| {
                ImageError::Authentication(format!("unsupported auth challenge for {}", reference.registry))
            })?;
            let token = self.fetch_token(&challenge).await?;
            response = self.head_manifest(&url, Some(&token)).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Registry {
                status: status.as_u16(),
                message: reference.tagged(),
            });
        }

        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ImageError::MissingDigest(reference.tagged()))
    }
}

#[async_trait::async_trait]
impl ImageResolver for RegistryImageResolver {
    async fn resolve(&self, name: &str, tag: &str, skip_resolution: bool) -> Result<String, ImageError> {
        let reference = ImageReference::parse(name, tag)?;
        if reference.is_digest() {
            return Ok(reference.pinned(&reference.tag));
        }
        if skip_resolution {
            debug!("Skipping resolution for {}", reference.tagged());
            return Ok(reference.tagged());
        }

        let digest = self.resolve_digest(&reference).await?;
        info!("Resolved {} to {}", reference.tagged(), digest);
        Ok(reference.pinned(&digest))
    }
}

/// Parse `Bearer realm="...",service="...",scope="..."`
pub(crate) fn parse_bearer_challenge(headers: &HeaderMap) -> Option<BearerChallenge> {
    let raw = headers.get(WWW_AUTHENTICATE)?.to_str().ok()?;
    let params = raw.trim().strip_prefix("Bearer ").or_else(|| raw.trim().strip_prefix("bearer "))?;

    let mut challenge = BearerChallenge::default();
    for part in split_params(params) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "realm" => challenge.realm = value,
            "service" => challenge.service = Some(value),
            "scope" => challenge.scope = Some(value),
            _ => {}
        }
    }

    if challenge.realm.is_empty() { None } else { Some(challenge) }
}

/// Split on commas that are not inside quotes (scopes contain commas).
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}
