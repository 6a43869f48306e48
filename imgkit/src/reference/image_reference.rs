use super::{Name, Tag};
use crate::{error::*, Digest};
use regex::Regex;
use std::fmt;
use url::Url;

pub const DEFAULT_DOMAIN: &str = "docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const NAME_TOTAL_LENGTH_MAX: usize = 255;

lazy_static::lazy_static! {
    static ref DOMAIN_RE: Regex = Regex::new(
        r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$"
    ).unwrap();
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[a-f0-9]{64}$").unwrap();
}

/// Fully qualified reference to an image, `domain/name[:tag][@digest]`
///
/// Parsing follows the Docker normalization rules: a missing domain becomes
/// `docker.io`, and a single-component name on `docker.io` gets the `library/` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub domain: String,
    pub name: Name,
    pub tag: Option<Tag>,
    pub digest: Option<Digest>,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.name)?;
        self.fmt_suffix(f)
    }
}

/// Split the domain part from a Docker image name
fn split_docker_domain(name: &str) -> (String, String) {
    let (domain, remainder) = match name.split_once('/') {
        Some((head, rest))
            if head.contains('.')
                || head.contains(':')
                || head == "localhost"
                || head.to_lowercase() != head =>
        {
            (head.to_string(), rest.to_string())
        }
        _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
    };
    let domain = if domain == LEGACY_DEFAULT_DOMAIN {
        DEFAULT_DOMAIN.to_string()
    } else {
        domain
    };
    let remainder = if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
        format!("{}{}", OFFICIAL_REPO_PREFIX, remainder)
    } else {
        remainder
    };
    (domain, remainder)
}

impl ImageReference {
    /// Parse a user-facing reference like `ubuntu:20.04` or `ghcr.io/owner/app@sha256:...`
    pub fn parse_normalized(input: &str) -> Result<Self> {
        let bad = || Error::InvalidReference(input.to_string());
        if input.is_empty() {
            return Err(bad());
        }
        if IDENTIFIER_RE.is_match(input) {
            return Err(Error::InvalidReference(format!(
                "{}: cannot specify 64-byte hexadecimal strings",
                input
            )));
        }

        let (named, digest) = match input.split_once('@') {
            Some((named, digest)) => (named, Some(Digest::new(digest)?)),
            None => (input, None),
        };
        let (domain, remainder) = split_docker_domain(named);

        let last_slash = remainder.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match remainder[last_slash..].rfind(':') {
            Some(i) => {
                let at = last_slash + i;
                (&remainder[..at], Some(Tag::new(&remainder[at + 1..])?))
            }
            None => (remainder.as_str(), None),
        };
        if path.to_lowercase() != path {
            return Err(Error::InvalidReference(format!(
                "{}: repository name must be lowercase",
                input
            )));
        }
        if !DOMAIN_RE.is_match(&domain) {
            return Err(bad());
        }
        let name = Name::new(path)?;
        if domain.len() + 1 + name.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(Error::InvalidName(format!(
                "{}: repository name must not be more than {} characters",
                input, NAME_TOTAL_LENGTH_MAX
            )));
        }
        Ok(ImageReference {
            domain,
            name,
            tag,
            digest,
        })
    }

    /// `domain/name` without tag and digest
    pub fn repository(&self) -> String {
        format!("{}/{}", self.domain, self.name)
    }

    /// Shortest name which normalizes back to the same repository, e.g. `ubuntu` for `docker.io/library/ubuntu`
    pub fn familiar_name(&self) -> String {
        if self.domain == DEFAULT_DOMAIN {
            match self.name.strip_prefix(OFFICIAL_REPO_PREFIX) {
                Some(short) if !short.contains('/') => short.to_string(),
                _ => self.name.to_string(),
            }
        } else {
            self.repository()
        }
    }

    /// Familiar name with tag and digest, e.g. `ubuntu:20.04`
    pub fn familiar(&self) -> String {
        format!("{}{}", self.familiar_name(), Suffix(self))
    }

    /// Drop the tag, keeping the digest
    pub fn without_tag(&self) -> Self {
        Self {
            tag: None,
            ..self.clone()
        }
    }

    /// The reference part used in `/v2/<name>/manifests/<reference>`, digest preferred
    pub fn tag_or_digest(&self) -> Option<String> {
        self.digest
            .as_ref()
            .map(|d| d.to_string())
            .or_else(|| self.tag.as_ref().map(|t| t.to_string()))
    }

    /// URL of the registry API endpoint
    pub fn registry_url(&self) -> Result<Url> {
        let url = if self.domain == DEFAULT_DOMAIN {
            "https://registry-1.docker.io".to_string()
        } else if self.domain.starts_with("localhost") {
            format!("http://{}", self.domain)
        } else {
            format!("https://{}", self.domain)
        };
        Ok(Url::parse(&url)?)
    }

    fn fmt_suffix(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

struct Suffix<'a>(&'a ImageReference);

impl fmt::Display for Suffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_suffix(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn image_reference() -> Result<()> {
        let r = ImageReference::parse_normalized("ghcr.io/termoshtt/ocipkg/testing:latest")?;
        assert_eq!(
            r,
            ImageReference {
                domain: "ghcr.io".to_string(),
                name: Name::new("termoshtt/ocipkg/testing")?,
                tag: Some(Tag::new("latest")?),
                digest: None,
            }
        );

        let r = ImageReference::parse_normalized("localhost:5000/test_repo:tag1")?;
        assert_eq!(r.domain, "localhost:5000");
        assert_eq!(r.name.as_str(), "test_repo");
        assert_eq!(r.registry_url()?.as_str(), "http://localhost:5000/");

        let r = ImageReference::parse_normalized("ubuntu:20.04")?;
        assert_eq!(r.to_string(), "docker.io/library/ubuntu:20.04");
        assert_eq!(r.familiar(), "ubuntu:20.04");

        let r = ImageReference::parse_normalized("alpine")?;
        assert_eq!(r.tag, None);
        assert_eq!(r.familiar_name(), "alpine");

        let r = ImageReference::parse_normalized("index.docker.io/termoshtt/app")?;
        assert_eq!(r.repository(), "docker.io/termoshtt/app");
        assert_eq!(r.familiar_name(), "termoshtt/app");
        Ok(())
    }

    #[test]
    fn with_digest() -> Result<()> {
        let r = ImageReference::parse_normalized(&format!("app:v1@{}", DIGEST))?;
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert_eq!(r.digest, Some(Digest::new(DIGEST)?));
        assert_eq!(r.tag_or_digest(), Some(DIGEST.to_string()));
        assert_eq!(r.without_tag().familiar(), format!("app@{}", DIGEST));
        Ok(())
    }

    #[test]
    fn invalid() {
        assert!(ImageReference::parse_normalized("").is_err());
        assert!(ImageReference::parse_normalized("Ubuntu").is_err());
        assert!(ImageReference::parse_normalized("ubuntu:bad@tag").is_err());
        assert!(ImageReference::parse_normalized("app@sha256:abc").is_err());
        assert!(ImageReference::parse_normalized(&DIGEST[7..]).is_err());
        assert!(ImageReference::parse_normalized(&"a".repeat(256)).is_err());
    }
}
