//! Absolute-URL reconstruction for annotated images.
//!
//! Annotated images are served by whichever backend drew them, but the
//! pipeline response only carries service-relative paths. The resolver picks
//! the right host from the path shape and joins it with exactly one slash.

use url::Url;

use crate::config::{join_url, PipelineConfig};

/// Static-mount prefix the autism service serves annotated images under.
const AUTISM_PREFIX: &str = "/annotated/";
/// Static-mount prefix of the face-filter gateway.
const FACE_PREFIX: &str = "/annotated_face";
/// Static-mount prefix of the age service.
const AGE_PREFIX: &str = "/annotated_age";

#[derive(Debug, Clone)]
pub struct ImageUrlResolver {
    face_base: String,
    age_base: String,
    autism_base: String,
    default_base: String,
}

impl ImageUrlResolver {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            face_base: config.face_base_url.clone(),
            age_base: config.age_base_url.clone(),
            autism_base: config.autism_base_url.clone(),
            default_base: config.default_base_url.clone(),
        }
    }

    /// Turn a service-relative path into an absolute URL.
    ///
    /// Already-absolute input passes through unchanged, so resolving twice
    /// is idempotent. Empty input resolves to None.
    pub fn resolve(&self, path: &str) -> Option<String> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        // A bare "host:port/..." also parses, but as a cannot-be-a-base URL;
        // only real base URLs pass through untouched.
        let absolute = Url::parse(path)
            .map(|url| !url.cannot_be_a_base())
            .unwrap_or(false);
        if absolute {
            return Some(path.to_string());
        }

        let base = if path.contains("autism") || path.starts_with(AUTISM_PREFIX) {
            &self.autism_base
        } else if path.starts_with(FACE_PREFIX) {
            &self.face_base
        } else if path.starts_with(AGE_PREFIX) {
            &self.age_base
        } else {
            &self.default_base
        };
        Some(join_url(base, path))
    }

    /// Convenience for optional paths coming out of normalization.
    pub fn resolve_opt(&self, path: Option<&str>) -> Option<String> {
        path.and_then(|p| self.resolve(p))
    }
}
