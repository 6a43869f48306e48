//! Storage drivers of the Docker graph root
//!
//! A driver knows where the content of a layer lives on disk, identified by the
//! layer's cache ID. Only the overlay family can expose the diff of a layer.

mod dir;
mod overlay2;
mod registry;

pub use dir::{DirDriver, BTRFS, VFS};
pub use overlay2::{Overlay2Driver, Overlay2Entity, FUSE_OVERLAYFS, OVERLAY2};
pub use registry::{CreateFn, DriverRegistry, DEPRECATED_DRIVERS, DRIVER_ENV, DRIVER_PRIORITY};

use crate::{error::*, fs::FileSystem};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Component, Path, PathBuf},
};

pub trait Driver: fmt::Debug + Send + Sync {
    /// Name of the driver, also the name of its directory under the graph root
    fn driver_type(&self) -> &str;

    /// Directory holding the content of every layer
    fn home(&self) -> &Path;

    /// `true` when the content of the layer exists on disk
    fn accessible(&self, cache_id: &str) -> bool;

    /// Driver specific paths of the layer, e.g. `UpperDir` for overlay2
    fn get_metadata(&self, cache_id: &str) -> Result<BTreeMap<String, String>>;

    /// Access to layer diffs, when the driver supports it
    fn as_differ(&self) -> Option<&dyn Differ> {
        None
    }
}

/// Drivers which store the changes of each layer separately
pub trait Differ {
    /// Changes of the layer with whiteouts in the layer tarball convention
    fn diff(&self, cache_id: &str) -> Result<Box<dyn FileSystem>>;
}

/// Cache IDs are single path components
pub(crate) fn check_cache_id(cache_id: &str) -> Result<()> {
    let mut components = Path::new(cache_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::invalid_field(
            "cache-id",
            format!("`{}` is not a directory name", cache_id),
        )),
    }
}

/// Resolve `.` and `..` without touching the filesystem
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized
}
