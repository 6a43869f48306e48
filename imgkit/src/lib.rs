//! imgkit
//! =======
//!
//! Read container images without a container runtime.
//!
//! - [manifest] decodes OCI, Docker schema 2 and schema 1 manifests
//! - [driver] and [fs] expose layers stored by Docker graph drivers as filesystems
//! - [storage] resolves a reference to an image in a local graph root or a registry
//!
//! ```no_run
//! use imgkit::{config::Config, storage::{ImageOptions, StorageRegistry}, Context};
//!
//! # fn main() -> imgkit::Result<()> {
//! let ctx = Context::new();
//! let registry = StorageRegistry::with_builtin(&Config::load()?);
//! let storage = registry.open(&ctx, "rootfs:///var/lib/docker")?;
//! let image = storage.get_image(&ctx, "ubuntu:22.04", &ImageOptions::default())?;
//! for layer in image.layers(&ctx)? {
//!     println!("{:?}", layer.metadata().diff_id);
//! }
//! image.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod reference;
pub mod storage;

mod digest;

pub use context::Context;
pub use digest::{Digest, SUPPORTED_ALGORITHMS};
pub use error::{Error, Result};
