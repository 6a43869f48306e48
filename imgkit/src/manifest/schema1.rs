use super::{
    jws, media_type, validate_unambiguous_manifest_format, AllowedFields, Descriptor,
    ImageManifest, LayerDescriptor, Manifest,
};
use crate::{error::*, Digest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

lazy_static::lazy_static! {
    static ref V1_ID_RE: Regex = Regex::new(r"^[a-f0-9]{64}$").unwrap();
}

/// Deprecated [Docker image manifest v2, schema 1](https://docs.docker.com/registry/spec/manifest-v2-1/)
///
/// `fs_layers` and `history` are ordered from the top layer to the base layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub architecture: String,
    pub fs_layers: Vec<FsLayer>,
    pub history: Vec<History>,
    /// Parsed `history[].v1Compatibility`, same order and length as `fs_layers`
    #[serde(skip)]
    pub extracted: Vec<V1Compatibility>,
    #[serde(skip)]
    media_type: String,
    #[serde(skip)]
    canonical: Vec<u8>,
    #[serde(skip)]
    pub(super) payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// Legacy v1 image JSON embedded in each history entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V1Compatibility {
    pub id: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub throwaway: bool,
}

impl Schema1Manifest {
    /// Decode a signed or unsigned schema 1 manifest
    ///
    /// Signatures are verified before anything else is trusted.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let (canonical, media_type) = match jws::parse_pretty_signature(raw)? {
            Some(signed) => {
                signed.verify()?;
                (signed.payload, media_type::DOCKER_V2_SCHEMA1_SIGNED)
            }
            None => (raw.to_vec(), media_type::DOCKER_V2_SCHEMA1),
        };
        validate_unambiguous_manifest_format(
            &canonical,
            media_type,
            AllowedFields::FS_LAYERS | AllowedFields::HISTORY,
        )?;
        let mut manifest: Schema1Manifest = serde_json::from_slice(&canonical)?;
        if manifest.schema_version != 1 {
            return Err(Error::invalid_field(
                "schemaVersion",
                format!("expected 1, got {}", manifest.schema_version),
            ));
        }
        manifest.fix_layers()?;
        manifest.media_type = media_type.to_string();
        manifest.canonical = canonical;
        manifest.payload = raw.to_vec();
        Ok(manifest)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The signed payload, i.e. the manifest without its `signatures`
    pub fn canonical(&self) -> &[u8] {
        &self.canonical
    }

    /// Parse the v1 compatibility entries and collapse repeated layers
    ///
    /// IDs must form a single parent chain ending at a layer without parent.
    /// Adjacent entries with the same ID are merged, any other repetition is an error.
    fn fix_layers(&mut self) -> Result<()> {
        if self.fs_layers.len() != self.history.len() {
            return Err(Error::invalid_field(
                "history",
                format!(
                    "length of history {} does not match the number of layers {}",
                    self.history.len(),
                    self.fs_layers.len()
                ),
            ));
        }
        if self.fs_layers.is_empty() {
            return Err(Error::invalid_field("fsLayers", "no layers in manifest"));
        }

        self.extracted = self
            .history
            .iter()
            .map(|h| serde_json::from_str(&h.v1_compatibility))
            .collect::<std::result::Result<_, _>>()?;
        for compat in &self.extracted {
            if !V1_ID_RE.is_match(&compat.id) {
                return Err(Error::invalid_field(
                    "v1Compatibility",
                    format!("invalid layer ID `{}`", compat.id),
                ));
            }
        }
        let base = &self.extracted[self.extracted.len() - 1];
        if !base.parent.is_empty() {
            return Err(Error::invalid_field(
                "v1Compatibility",
                format!("base layer {} has parent {}", base.id, base.parent),
            ));
        }

        let mut seen = HashSet::new();
        let mut last: Option<&str> = None;
        for compat in &self.extracted {
            if last != Some(compat.id.as_str()) && seen.contains(compat.id.as_str()) {
                return Err(Error::invalid_field(
                    "v1Compatibility",
                    format!("ID {} appears multiple times", compat.id),
                ));
            }
            seen.insert(compat.id.as_str());
            last = Some(&compat.id);
        }

        // Walk backwards so that removing entry i keeps i+1 pointing at its child
        for i in (0..self.extracted.len() - 1).rev() {
            if self.extracted[i].id == self.extracted[i + 1].id {
                self.fs_layers.remove(i);
                self.history.remove(i);
                self.extracted.remove(i);
            } else if self.extracted[i].parent != self.extracted[i + 1].id {
                return Err(Error::invalid_field(
                    "v1Compatibility",
                    format!(
                        "invalid parent ID, expected {}, got {}",
                        self.extracted[i + 1].id,
                        self.extracted[i].parent
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl ImageManifest for Schema1Manifest {
    fn config(&self) -> Option<&Descriptor> {
        None
    }

    fn layers(&self) -> Vec<LayerDescriptor> {
        self.fs_layers
            .iter()
            .zip(&self.extracted)
            .rev()
            .map(|(layer, compat)| LayerDescriptor {
                descriptor: Descriptor::new("", layer.blob_sum.clone(), -1),
                empty: compat.throwaway,
            })
            .collect()
    }
}

pub(super) fn decode(raw: &[u8]) -> Result<Manifest> {
    Ok(Manifest::Schema1(Schema1Manifest::from_slice(raw)?))
}
