//! Decode image manifests in OCI, Docker schema 2 and the deprecated Docker schema 1 formats
//!
//! Manifests keep the exact bytes they were decoded from. Digests are always computed
//! over those bytes, never over a re-serialization.

pub mod media_type;

pub(crate) mod jws;
mod oci;
mod registry;
mod schema1;
mod schema2;
mod validate;

pub use oci::{OciIndex, OciManifest};
pub use registry::{detect_media_type, DecodeFn, SchemaRegistry};
pub use schema1::{FsLayer, Schema1Manifest, V1Compatibility};
pub use schema2::{Schema2List, Schema2Manifest};
pub use validate::{validate_unambiguous_manifest_format, AllowedFields};

use crate::{error::*, Digest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to a content-addressed blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: Digest,
    /// `-1` when unknown, as for schema 1 layers
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn new(media_type: &str, digest: Digest, size: i64) -> Self {
        Descriptor {
            media_type: media_type.to_string(),
            digest,
            size,
            urls: None,
            annotations: None,
            platform: None,
        }
    }

    /// Descriptor of the given bytes
    pub fn from_bytes(media_type: &str, raw: &[u8]) -> Self {
        Self::new(media_type, Digest::from_buf_sha256(raw), raw.len() as i64)
    }
}

/// Platform a manifest in an index is built for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str, variant: Option<&str>) -> Self {
        Platform {
            architecture: architecture.to_string(),
            os: os.to_string(),
            os_version: None,
            os_features: None,
            variant: variant.map(str::to_string),
            features: None,
        }
    }

    /// Platform of the running process, in OCI names
    pub fn host() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "x86" => "386",
            "aarch64" => "arm64",
            "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
            "mips64" if cfg!(target_endian = "little") => "mips64le",
            other => other,
        };
        Self::new(std::env::consts::OS, architecture, None)
    }

    /// `self` is the wanted platform. The variant is compared only when wanted.
    pub fn matches(&self, candidate: &Platform) -> bool {
        self.os == candidate.os
            && self.architecture == candidate.architecture
            && match &self.variant {
                Some(variant) => candidate.variant.as_ref() == Some(variant),
                None => true,
            }
    }
}

/// Layer entry of an image manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub descriptor: Descriptor,
    /// Throwaway layer which carries history but no filesystem content
    pub empty: bool,
}

/// Manifests describing a single image: a config and layers
pub trait ImageManifest {
    /// Config blob, `None` for schema 1 which embeds its config in the history
    fn config(&self) -> Option<&Descriptor>;
    /// Layers ordered from the base layer to the top
    fn layers(&self) -> Vec<LayerDescriptor>;
}

/// Manifests listing other manifests, e.g. one per platform
pub trait IndexManifest {
    fn manifests(&self) -> &[Descriptor];
}

/// A decoded manifest in one of the supported formats
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    OciManifest(OciManifest),
    OciIndex(OciIndex),
    Schema2(Schema2Manifest),
    Schema2List(Schema2List),
    Schema1(Schema1Manifest),
}

impl Manifest {
    pub fn media_type(&self) -> &str {
        match self {
            Manifest::OciManifest(m) => m.media_type(),
            Manifest::OciIndex(m) => m.media_type(),
            Manifest::Schema2(m) => m.media_type(),
            Manifest::Schema2List(m) => m.media_type(),
            Manifest::Schema1(m) => m.media_type(),
        }
    }

    /// Exactly the bytes this manifest was decoded from
    pub fn payload(&self) -> &[u8] {
        match self {
            Manifest::OciManifest(m) => &m.payload,
            Manifest::OciIndex(m) => &m.payload,
            Manifest::Schema2(m) => &m.payload,
            Manifest::Schema2List(m) => &m.payload,
            Manifest::Schema1(m) => &m.payload,
        }
    }

    /// Digest of [Manifest::payload]
    pub fn digest(&self) -> Digest {
        Digest::from_buf_sha256(self.payload())
    }

    /// Descriptor of this manifest itself
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::from_bytes(self.media_type(), self.payload())
    }

    /// Child blobs, highest priority first: the config before layers, or the listed manifests
    pub fn references(&self) -> Vec<Descriptor> {
        if let Some(index) = self.as_index_manifest() {
            return index.manifests().to_vec();
        }
        match self.as_image_manifest() {
            Some(image) => image
                .config()
                .cloned()
                .into_iter()
                .chain(image.layers().into_iter().map(|l| l.descriptor))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn as_image_manifest(&self) -> Option<&dyn ImageManifest> {
        match self {
            Manifest::OciManifest(m) => Some(m),
            Manifest::Schema2(m) => Some(m),
            Manifest::Schema1(m) => Some(m),
            Manifest::OciIndex(_) | Manifest::Schema2List(_) => None,
        }
    }

    pub fn as_index_manifest(&self) -> Option<&dyn IndexManifest> {
        match self {
            Manifest::OciIndex(m) => Some(m),
            Manifest::Schema2List(m) => Some(m),
            _ => None,
        }
    }

    /// Pick the manifest built for `platform` from an index
    pub fn select_platform(&self, platform: &Platform) -> Result<Descriptor> {
        let index = self.as_index_manifest().ok_or_else(|| {
            Error::Unsupported(format!(
                "{} is not an index, cannot select a platform",
                self.media_type()
            ))
        })?;
        index
            .manifests()
            .iter()
            .find(|desc| match &desc.platform {
                Some(candidate) => platform.matches(candidate),
                None => false,
            })
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "manifest for {}/{} in index",
                    platform.os, platform.architecture
                ))
            })
    }
}

/// Digest of manifest bytes
pub fn manifest_digest(raw: &[u8]) -> Digest {
    Digest::from_buf_sha256(raw)
}

/// Check the manifest bytes have the expected digest
///
/// A signed schema 1 manifest is addressed by registries through its payload without
/// signatures, so that digest is accepted as well.
pub fn matches_digest(raw: &[u8], expected: &Digest) -> bool {
    if expected.matches(raw) {
        return true;
    }
    match jws::parse_pretty_signature(raw) {
        Ok(Some(signed)) => expected.matches(&signed.payload),
        _ => false,
    }
}

/// Layers which contribute filesystem content, in the original order
pub fn non_empty_layers(layers: &[LayerDescriptor]) -> Vec<&LayerDescriptor> {
    layers.iter().filter(|layer| !layer.empty).collect()
}

/// Total size of the non-empty layers. Unknown sizes count as zero.
pub fn image_size(layers: &[LayerDescriptor]) -> i64 {
    non_empty_layers(layers)
        .iter()
        .map(|layer| layer.descriptor.size.max(0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(data: &[u8], size: i64, empty: bool) -> LayerDescriptor {
        LayerDescriptor {
            descriptor: Descriptor::new(
                media_type::DOCKER_V2_LAYER_GZIP,
                Digest::from_buf_sha256(data),
                size,
            ),
            empty,
        }
    }

    #[test]
    fn non_empty() {
        let layers = vec![
            layer(b"a", 10, false),
            layer(b"b", 20, true),
            layer(b"c", 30, false),
            layer(b"d", 40, true),
        ];
        let kept = non_empty_layers(&layers);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0], &layers[0]);
        assert_eq!(kept[1], &layers[2]);
    }

    #[test]
    fn size_ignores_empty_and_unknown() {
        let layers = vec![
            layer(b"a", 10, false),
            layer(b"b", 20, true),
            layer(b"c", -1, false),
            layer(b"d", 5, false),
        ];
        assert_eq!(image_size(&layers), 15);
        assert_eq!(image_size(&[]), 0);
    }

    #[test]
    fn digest_of_bytes() {
        let raw = br#"{"schemaVersion":2}"#;
        let digest = manifest_digest(raw);
        assert!(matches_digest(raw, &digest));
        assert!(!matches_digest(b"{}", &digest));
    }

    #[test]
    fn signed_schema1_digest() {
        let payload = "{\n  \"schemaVersion\": 1,\n  \"name\": \"library/app\"\n}";
        let signed = jws::testing::sign(payload);
        let raw = signed.as_bytes();
        assert!(matches_digest(raw, &manifest_digest(payload.as_bytes())));
        assert!(matches_digest(raw, &manifest_digest(raw)));
        assert!(!matches_digest(raw, &manifest_digest(b"{}")));
        // Unsigned bytes only match their own digest
        assert!(!matches_digest(payload.as_bytes(), &manifest_digest(raw)));
    }

    #[test]
    fn platform_matching() {
        let wanted = Platform::new("linux", "arm", Some("v7"));
        assert!(wanted.matches(&Platform::new("linux", "arm", Some("v7"))));
        assert!(!wanted.matches(&Platform::new("linux", "arm", Some("v6"))));
        assert!(!wanted.matches(&Platform::new("linux", "arm", None)));
        let any_variant = Platform::new("linux", "arm", None);
        assert!(any_variant.matches(&Platform::new("linux", "arm", Some("v6"))));
        assert!(!any_variant.matches(&Platform::new("windows", "arm", None)));
    }
}
