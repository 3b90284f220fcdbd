use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

// Grammar from the distribution reference spec: lowercase path components
// separated by '/', tags up to 128 characters.
static COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*$").unwrap());
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$").unwrap()
});
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").unwrap());

const DEFAULT_DOMAIN: &str = "docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";

/// A repository name in canonical normalized form: `foo` becomes
/// `docker.io/library/foo`, `ghcr.io/a/b` stays as is. The backing image
/// store keys image records by normalized names, so every reference composed
/// by the registry goes through this type first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    domain: String,
    path: String,
}

impl ImageReference {
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() || name.len() > 255 {
            return Err(Error::InvalidReference(name.to_string()));
        }

        // The leading component is a registry host only if it looks like one.
        let (domain, remainder) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first, rest)
            }
            _ => (DEFAULT_DOMAIN, name),
        };

        let mut domain = domain.to_ascii_lowercase();
        if domain == "index.docker.io" || domain == "registry-1.docker.io" {
            domain = DEFAULT_DOMAIN.to_string();
        }
        if !DOMAIN_RE.is_match(&domain) {
            return Err(Error::InvalidReference(name.to_string()));
        }

        if remainder.is_empty() {
            return Err(Error::InvalidReference(name.to_string()));
        }
        let path = if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
            format!("{OFFICIAL_REPO_PREFIX}{remainder}")
        } else {
            remainder.to_string()
        };
        if !path.split('/').all(|component| COMPONENT_RE.is_match(component)) {
            return Err(Error::InvalidReference(name.to_string()));
        }

        Ok(Self { domain, path })
    }

    /// The registry host of the normalized name.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The repository path of the normalized name.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The full normalized name, e.g. `docker.io/library/busybox`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Compose the image reference `<name>:<tag>` used to key image records.
    pub fn tagged(&self, tag: &str) -> Result<String> {
        if !TAG_RE.is_match(tag) {
            return Err(Error::InvalidTag(tag.to_string()));
        }
        Ok(format!("{}:{}", self.name(), tag))
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)
    }
}

impl std::str::FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
