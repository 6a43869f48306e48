//! Media types of manifests and the blobs they refer to

/// OCI image manifest
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI image configuration
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
/// OCI gzip-compressed layer
pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// OCI uncompressed layer
pub const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";

/// Docker image manifest v2, schema 2
pub const DOCKER_V2_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list (fat manifest)
pub const DOCKER_V2_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker container configuration referred from schema 2 manifests
pub const DOCKER_V2_SCHEMA2_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// Docker gzip-compressed layer
pub const DOCKER_V2_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
/// Docker foreign layer, e.g. Windows base layers
pub const DOCKER_V2_FOREIGN_LAYER_GZIP: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

/// Deprecated Docker image manifest v2, schema 1
pub const DOCKER_V2_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
/// Deprecated Docker image manifest v2, schema 1 with JWS signatures
pub const DOCKER_V2_SCHEMA1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// Untyped JSON, served by old registries for schema 1 manifests
pub const JSON: &str = "application/json";

/// Media types which may be re-bound in a schema registry; both route to the legacy decoder
pub const DEFAULT_MEDIA_TYPES: [&str; 2] = ["", JSON];

/// `true` for the untyped fallback media types
pub fn is_default(media_type: &str) -> bool {
    DEFAULT_MEDIA_TYPES.contains(&media_type)
}

/// `true` for layer media types which are gzip compressed
pub fn is_gzip_layer(media_type: &str) -> bool {
    matches!(
        media_type,
        OCI_LAYER_GZIP | DOCKER_V2_LAYER_GZIP | DOCKER_V2_FOREIGN_LAYER_GZIP
    )
}
