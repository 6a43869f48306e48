use crate::error::*;
use serde::Deserialize;
use std::ops::BitOr;

/// Set of top-level manifest fields a format is allowed to carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedFields(u8);

impl AllowedFields {
    pub const NONE: Self = Self(0);
    pub const CONFIG: Self = Self(1);
    pub const FS_LAYERS: Self = Self(1 << 1);
    pub const HISTORY: Self = Self(1 << 2);
    pub const LAYERS: Self = Self(1 << 3);
    pub const MANIFESTS: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AllowedFields {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Fields which tell manifest formats apart. Matching is case-sensitive.
#[derive(Deserialize)]
struct DetectedFields {
    config: Option<serde_json::Value>,
    #[serde(rename = "fsLayers")]
    fs_layers: Option<serde_json::Value>,
    history: Option<serde_json::Value>,
    layers: Option<serde_json::Value>,
    manifests: Option<serde_json::Value>,
}

/// Reject a manifest carrying non-null fields which belong to another format
///
/// Many manifests do not state their media type, so this is the only guard against
/// reading e.g. an index as an image manifest.
pub fn validate_unambiguous_manifest_format(
    raw: &[u8],
    expected_media_type: &str,
    allowed: AllowedFields,
) -> Result<()> {
    let detected: DetectedFields = serde_json::from_slice(raw)?;
    let fields = [
        (detected.config.is_some(), AllowedFields::CONFIG, "config"),
        (detected.fs_layers.is_some(), AllowedFields::FS_LAYERS, "fsLayers"),
        (detected.history.is_some(), AllowedFields::HISTORY, "history"),
        (detected.layers.is_some(), AllowedFields::LAYERS, "layers"),
        (detected.manifests.is_some(), AllowedFields::MANIFESTS, "manifests"),
    ];
    for (present, flag, name) in fields {
        if present && !allowed.contains(flag) {
            return Err(Error::AmbiguousManifest {
                media_type: expected_media_type.to_string(),
                field: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::media_type;

    const IMAGE: AllowedFields = AllowedFields(1 | 1 << 3);

    #[test]
    fn allowed_fields() {
        assert_eq!(AllowedFields::CONFIG | AllowedFields::LAYERS, IMAGE);
        assert!(IMAGE.contains(AllowedFields::LAYERS));
        assert!(!IMAGE.contains(AllowedFields::MANIFESTS));
        assert!(IMAGE.contains(AllowedFields::NONE));
    }

    #[test]
    fn image_manifest_rejects_manifests() {
        let raw = br#"{"schemaVersion":2,"config":{},"layers":[],"manifests":[]}"#;
        let err = validate_unambiguous_manifest_format(raw, media_type::OCI_MANIFEST, IMAGE)
            .unwrap_err();
        assert!(
            matches!(err, Error::AmbiguousManifest { ref field, .. } if field == "manifests")
        );
    }

    #[test]
    fn index_rejects_layers() {
        let raw = br#"{"schemaVersion":2,"manifests":[],"layers":[]}"#;
        assert!(validate_unambiguous_manifest_format(
            raw,
            media_type::OCI_INDEX,
            AllowedFields::MANIFESTS
        )
        .is_err());
        let raw = br#"{"schemaVersion":2,"manifests":[]}"#;
        assert!(validate_unambiguous_manifest_format(
            raw,
            media_type::OCI_INDEX,
            AllowedFields::MANIFESTS
        )
        .is_ok());
    }

    #[test]
    fn null_and_other_case_are_ignored() {
        let raw = br#"{"schemaVersion":2,"config":{},"layers":[],"manifests":null,"Manifests":[]}"#;
        assert!(validate_unambiguous_manifest_format(raw, media_type::OCI_MANIFEST, IMAGE).is_ok());
    }

    #[test]
    fn schema1_rejects_config() {
        let raw = br#"{"schemaVersion":1,"fsLayers":[],"history":[],"config":{}}"#;
        assert!(validate_unambiguous_manifest_format(
            raw,
            media_type::DOCKER_V2_SCHEMA1_SIGNED,
            AllowedFields::FS_LAYERS | AllowedFields::HISTORY
        )
        .is_err());
    }
}
