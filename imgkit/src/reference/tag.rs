use crate::error::*;
use regex::Regex;
use std::fmt;

/// Tag of container image stored in the repository
///
/// In [OCI distribution spec](https://github.com/opencontainers/distribution-spec/blob/main/spec.md):
/// > `<reference>` as a tag MUST be at most 128 characters
/// > in length and MUST match the following regular expression:
/// > ```text
/// > [a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}
/// > ```
/// This struct checks this restriction at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl std::ops::Deref for Tag {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

lazy_static::lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap();
}

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new(tag: &str) -> Result<Self> {
        if TAG_RE.is_match(tag) {
            Ok(Tag(tag.to_string()))
        } else {
            Err(Error::InvalidTag(tag.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag() {
        assert_eq!(Tag::new("latest").unwrap().as_str(), "latest");
        assert!(Tag::new("v1.0-rc_1").is_ok());
        // @ is not allowed
        assert!(Tag::new("my_super_tag@2").is_err());
        assert!(Tag::new(".hidden").is_err());
        assert!(Tag::new(&"a".repeat(129)).is_err());
    }
}
