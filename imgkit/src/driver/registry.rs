use super::{DirDriver, Driver, Overlay2Driver, BTRFS, FUSE_OVERLAYFS, OVERLAY2, VFS};
use crate::{error::*, Context};
use parking_lot::RwLock;
use std::{collections::HashMap, fs, path::Path};

/// Create a driver for the graph root
pub type CreateFn = fn(&Path) -> Result<Box<dyn Driver>>;

/// Environment variable selecting the driver, as the Docker daemon reads it
pub const DRIVER_ENV: &str = "DOCKER_DRIVER";

/// Preferred driver first when several are found in the graph root
pub const DRIVER_PRIORITY: [&str; 8] = [
    "overlay2",
    "fuse-overlayfs",
    "btrfs",
    "zfs",
    "aufs",
    "overlay",
    "devicemapper",
    "vfs",
];

pub const DEPRECATED_DRIVERS: [&str; 3] = ["aufs", "overlay", "devicemapper"];

/// Driver type to constructor mapping
#[derive(Debug, Default)]
pub struct DriverRegistry {
    creators: RwLock<HashMap<String, CreateFn>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with overlay2, fuse-overlayfs, btrfs and vfs
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.must_register_creator(OVERLAY2, Overlay2Driver::create_overlay2);
        registry.must_register_creator(FUSE_OVERLAYFS, Overlay2Driver::create_fuse_overlayfs);
        registry.must_register_creator(BTRFS, DirDriver::create_btrfs);
        registry.must_register_creator(VFS, DirDriver::create_vfs);
        registry
    }

    pub fn register_creator(&self, driver_type: &str, create: CreateFn) -> Result<()> {
        let mut creators = self.creators.write();
        if creators.contains_key(driver_type) {
            return Err(Error::AlreadyRegistered(driver_type.to_string()));
        }
        creators.insert(driver_type.to_string(), create);
        Ok(())
    }

    /// Same as [DriverRegistry::register_creator], but panics on duplicate
    pub fn must_register_creator(&self, driver_type: &str, create: CreateFn) {
        if let Err(e) = self.register_creator(driver_type, create) {
            panic!("{}", e);
        }
    }

    pub fn is_registered(&self, driver_type: &str) -> bool {
        self.creators.read().contains_key(driver_type)
    }

    pub fn create(&self, driver_type: &str, root: &Path) -> Result<Box<dyn Driver>> {
        let create = self
            .creators
            .read()
            .get(driver_type)
            .copied()
            .ok_or_else(|| Error::DriverNotFound(driver_type.to_string()))?;
        create(root)
    }

    /// Find out which driver the graph root at `root` is using
    ///
    /// `preferred` is honored when it names a registered driver. Otherwise the root is
    /// scanned for non-empty directories named after registered drivers, and the one
    /// earliest in [DRIVER_PRIORITY] wins. `vfs` is only used when asked for.
    pub fn detect_type(
        &self,
        ctx: &Context,
        root: &Path,
        preferred: Option<&str>,
    ) -> Result<String> {
        if let Some(preferred) = preferred.filter(|p| !p.is_empty()) {
            if self.is_registered(preferred) {
                return Ok(preferred.to_string());
            }
            log::warn!(
                "Storage driver `{}` is not supported, detecting from {}",
                preferred,
                root.display()
            );
        }

        let mut candidates = Vec::new();
        for entry in fs::read_dir(root).map_err(|e| Error::path(root, e))? {
            ctx.check()?;
            let entry = entry.map_err(|e| Error::path(root, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name == VFS || !self.is_registered(&name) {
                continue;
            }
            if is_non_empty_dir(&entry.path()) {
                candidates.push(name);
            }
        }
        candidates.sort_by_key(|name| {
            let rank = DRIVER_PRIORITY
                .iter()
                .position(|p| *p == name.as_str())
                .unwrap_or(DRIVER_PRIORITY.len());
            (rank, name.clone())
        });

        let chosen = match candidates.first() {
            Some(chosen) => chosen.clone(),
            None => {
                return Err(Error::DriverNotFound(format!(
                    "no storage driver found in {}",
                    root.display()
                )))
            }
        };
        if candidates.len() > 1 {
            log::warn!(
                "Multiple storage drivers found in {}: {}. Using `{}`",
                root.display(),
                candidates.join(", "),
                chosen
            );
        }
        if DEPRECATED_DRIVERS.contains(&chosen.as_str()) {
            log::warn!("Storage driver `{}` is deprecated", chosen);
        }
        Ok(chosen)
    }

    /// Detect the driver type of `root` and create it
    pub fn new_driver(
        &self,
        ctx: &Context,
        root: &Path,
        preferred: Option<&str>,
    ) -> Result<Box<dyn Driver>> {
        let driver_type = self.detect_type(ctx, root, preferred)?;
        log::debug!("Using storage driver `{}` for {}", driver_type, root.display());
        self.create(&driver_type, root)
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}
