use imgkit::{
    manifest::{media_type, Manifest, Platform, SchemaRegistry},
    Digest, Error, Result,
};

/// OCI image manifest without `mediaType`, as older tools wrote them
const OCI_MANIFEST: &str = r#"{
  "schemaVersion": 2,
  "config": {
    "mediaType": "application/vnd.oci.image.config.v1+json",
    "digest": "sha256:b5b2b2c507a0944348e0303114d8d93aaaa081732b86451d9bce1f432a537bc7",
    "size": 7023
  },
  "layers": [
    {
      "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
      "digest": "sha256:9834876dcfb05cb167a5c24953eba58c4ac89b1adf57f28f2f9d09af107ee8f0",
      "size": 32654
    },
    {
      "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
      "digest": "sha256:3c3a4604a545cdc127456d94e421cd355bca5b528f4a9c1905b15da2eb4a4c6b",
      "size": 16724
    }
  ]
}"#;

const DOCKER_LIST: &str = r#"{
  "schemaVersion": 2,
  "manifests": [
    {
      "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
      "digest": "sha256:e692418e4cbaf90ca69d05a66403747baa33ee08806650b51fab815ad7fc331f",
      "size": 7143,
      "platform": { "architecture": "ppc64le", "os": "linux" }
    },
    {
      "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
      "digest": "sha256:5b0bcabd1ed22e9fb1310cf6c2dec7cdef19f0ad69efa1f392e94a4333501270",
      "size": 7682,
      "platform": { "architecture": "arm", "os": "linux", "variant": "v7" }
    }
  ]
}"#;

#[test]
fn oci_manifest_without_media_type() -> Result<()> {
    let registry = SchemaRegistry::with_builtin();
    let (manifest, descriptor) = registry.parse_bytes(OCI_MANIFEST.as_bytes())?;
    assert!(matches!(manifest, Manifest::OciManifest(_)));
    assert_eq!(manifest.media_type(), media_type::OCI_MANIFEST);
    assert_eq!(manifest.payload(), OCI_MANIFEST.as_bytes());

    // Digest is over the bytes as given, whitespace included
    assert_eq!(descriptor.digest, Digest::from_buf_sha256(OCI_MANIFEST.as_bytes()));
    assert_eq!(descriptor.size, OCI_MANIFEST.len() as i64);

    let image = manifest.as_image_manifest().expect("image manifest");
    assert_eq!(image.layers().len(), 2);
    let references = manifest.references();
    assert_eq!(references.len(), 3);
    assert_eq!(references[0].media_type, media_type::OCI_CONFIG);
    Ok(())
}

#[test]
fn select_from_list() -> Result<()> {
    let registry = SchemaRegistry::with_builtin();
    let (manifest, _) = registry.parse_bytes(DOCKER_LIST.as_bytes())?;
    assert_eq!(manifest.media_type(), media_type::DOCKER_V2_LIST);
    assert!(manifest.as_image_manifest().is_none());

    let arm = manifest.select_platform(&Platform::new("linux", "arm", None))?;
    assert_eq!(arm.size, 7682);
    let armv7 = manifest.select_platform(&Platform::new("linux", "arm", Some("v7")))?;
    assert_eq!(armv7.digest, arm.digest);

    let err = manifest
        .select_platform(&Platform::new("linux", "arm", Some("v6")))
        .unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[test]
fn declared_media_type_is_enforced() {
    let registry = SchemaRegistry::with_builtin();
    assert!(matches!(
        registry.parse(media_type::OCI_MANIFEST, DOCKER_LIST.as_bytes()),
        Err(Error::AmbiguousManifest { .. })
    ));
    assert!(matches!(
        registry.parse("application/x-unknown", OCI_MANIFEST.as_bytes()),
        Err(Error::SchemaNotFound(_))
    ));
}

#[test]
fn accept_header() {
    let registry = SchemaRegistry::with_builtin();
    let media_types = registry.media_types();
    assert!(media_types.contains(&media_type::OCI_INDEX));
    assert!(media_types.contains(&media_type::DOCKER_V2_SCHEMA1_SIGNED));
    assert!(!media_types.contains(&""));
    assert!(!media_types.contains(&media_type::JSON));
}
