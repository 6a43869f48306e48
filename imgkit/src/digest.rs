use crate::error::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use std::{fmt, path::PathBuf, str::FromStr};

/// Digest of contents
///
/// Digest is defined in [OCI image spec](https://github.com/opencontainers/image-spec/blob/v1.0.1/descriptor.md#digests)
/// as a string satisfies following EBNF:
///
/// ```text
/// digest                ::= algorithm ":" encoded
/// algorithm             ::= algorithm-component (algorithm-separator algorithm-component)*
/// algorithm-component   ::= [a-z0-9]+
/// algorithm-separator   ::= [+._-]
/// encoded               ::= [a-zA-Z0-9=_-]+
/// ```
///
/// Only the registered algorithms `sha256`, `sha384` and `sha512` are accepted,
/// and the encoded part must be lowercase hex of the matching length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    pub algorithm: String,
    pub encoded: String,
}

/// Algorithms whose directories are walked in the layer and image databases
pub const SUPPORTED_ALGORITHMS: [&str; 3] = ["sha256", "sha384", "sha512"];

lazy_static::lazy_static! {
    static ref ALGORITHM_RE: Regex = Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*$").unwrap();
    static ref HEX_RE: Regex = Regex::new(r"^[a-f0-9]+$").unwrap();
}

fn hex_len(algorithm: &str) -> Option<usize> {
    match algorithm {
        "sha256" => Some(64),
        "sha384" => Some(96),
        "sha512" => Some(128),
        _ => None,
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = Error;
    fn from_str(input: &str) -> Result<Self> {
        Digest::new(input)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Digest, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::new(&s).map_err(serde::de::Error::custom)
    }
}

impl Digest {
    pub fn new(input: &str) -> Result<Self> {
        let (algorithm, encoded) = input
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(input.to_string()))?;
        Self::from_parts(algorithm, encoded).map_err(|_| Error::InvalidDigest(input.to_string()))
    }

    /// Build from an algorithm name and its encoded hex, e.g. a `{algo}/{hex}` directory pair
    pub fn from_parts(algorithm: &str, encoded: &str) -> Result<Self> {
        if !ALGORITHM_RE.is_match(algorithm) {
            return Err(Error::InvalidDigest(format!("{}:{}", algorithm, encoded)));
        }
        match hex_len(algorithm) {
            Some(len) if encoded.len() == len && HEX_RE.is_match(encoded) => Ok(Digest {
                algorithm: algorithm.to_string(),
                encoded: encoded.to_string(),
            }),
            Some(_) => Err(Error::InvalidDigest(format!("{}:{}", algorithm, encoded))),
            None => Err(Error::Unsupported(format!(
                "digest algorithm `{}`",
                algorithm
            ))),
        }
    }

    /// Accepts both `sha256:<hex>` and a bare 64-character hex string
    pub fn parse_image_id(input: &str) -> Result<Self> {
        if input.contains(':') {
            Self::new(input)
        } else {
            Self::from_parts("sha256", input)
                .map_err(|_| Error::InvalidDigest(input.to_string()))
        }
    }

    /// As a relative path `{algorithm}/{encoded}` used in content-addressed directories
    pub fn as_path(&self) -> PathBuf {
        PathBuf::from(&self.algorithm).join(&self.encoded)
    }

    /// First 12 characters of the encoded part, as `docker images` shows
    pub fn short_id(&self) -> &str {
        &self.encoded[..12.min(self.encoded.len())]
    }

    /// Calc digest using SHA-256 algorithm
    pub fn from_buf_sha256(buf: &[u8]) -> Self {
        let hash = Sha256::digest(buf);
        Self {
            algorithm: "sha256".to_string(),
            encoded: base16ct::lower::encode_string(&hash),
        }
    }

    /// Calc digest of the buffer using the same algorithm as `self`
    pub fn digest_of(&self, buf: &[u8]) -> Self {
        let encoded = match self.algorithm.as_str() {
            "sha384" => base16ct::lower::encode_string(&Sha384::digest(buf)),
            "sha512" => base16ct::lower::encode_string(&Sha512::digest(buf)),
            _ => base16ct::lower::encode_string(&Sha256::digest(buf)),
        };
        Self {
            algorithm: self.algorithm.clone(),
            encoded,
        }
    }

    /// Check the buffer has this digest
    pub fn matches(&self, buf: &[u8]) -> bool {
        self.digest_of(buf) == *self
    }

    /// Fold the `DiffID`s of layers into chain IDs
    ///
    /// ```text
    /// ChainID(L0)   = DiffID(L0)
    /// ChainID(L0|n) = SHA256(ChainID(L0|n-1) + " " + DiffID(Ln))
    /// ```
    ///
    /// See [image-spec](https://github.com/opencontainers/image-spec/blob/v1.0.1/config.md#layer-chainid).
    pub fn chain_ids(diff_ids: &[Digest]) -> Vec<Digest> {
        diff_ids
            .iter()
            .scan(None::<Digest>, |parent, diff_id| {
                let chain_id = match parent.as_ref() {
                    None => diff_id.clone(),
                    Some(parent) => {
                        Digest::from_buf_sha256(format!("{} {}", parent, diff_id).as_bytes())
                    }
                };
                *parent = Some(chain_id.clone());
                Some(chain_id)
            })
            .collect()
    }
}
