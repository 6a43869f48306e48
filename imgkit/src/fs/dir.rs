use super::{clean, FileInfo, FileKind, FileSystem};
use crate::error::*;
use std::{
    fs,
    io::{self, Read},
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
};

/// View of a directory on the host
///
/// Paths are resolved lexically under the root, and the final component is never
/// followed when it is a symbolic link.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirFs { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        self.root.join(clean(path))
    }
}

fn file_info(name: String, metadata: &fs::Metadata) -> FileInfo {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        FileKind::Dir
    } else if file_type.is_file() {
        FileKind::File
    } else if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_char_device() {
        FileKind::CharDevice {
            rdev: metadata.rdev(),
        }
    } else {
        FileKind::Other
    };
    FileInfo {
        name,
        kind,
        size: metadata.len(),
        mode: metadata.mode() & 0o7777,
    }
}

impl FileSystem for DirFs {
    fn stat(&self, path: &Path) -> Result<FileInfo> {
        let host = self.host_path(path);
        let metadata = fs::symlink_metadata(&host).map_err(|e| Error::path(&host, e))?;
        let name = clean(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(file_info(name, &metadata))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let host = self.host_path(path);
        let metadata = fs::symlink_metadata(&host).map_err(|e| Error::path(&host, e))?;
        if !metadata.is_file() {
            return Err(Error::Unsupported(format!(
                "{} is not a regular file",
                host.display()
            )));
        }
        let file = fs::File::open(&host).map_err(|e| Error::path(&host, e))?;
        Ok(Box::new(file))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        let host = self.host_path(path);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&host).map_err(|e| Error::path(&host, e))? {
            let entry = entry.map_err(|e| Error::path(&host, e))?;
            let metadata = fs::symlink_metadata(entry.path())
                .map_err(|e| Error::path(entry.path(), e))?;
            entries.push(file_info(
                entry.file_name().to_string_lossy().to_string(),
                &metadata,
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let host = self.host_path(path);
        fs::read_link(&host).map_err(|e| Error::path(&host, e))
    }

    fn xattr(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        lgetxattr(&self.host_path(path), name)
    }
}

/// Read an extended attribute without following symbolic links
#[cfg(target_os = "linux")]
pub(crate) fn lgetxattr(path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    use std::{ffi::CString, os::unix::ffi::OsStrExt};

    let invalid =
        |e: std::ffi::NulError| Error::path(path, io::Error::new(io::ErrorKind::InvalidInput, e));
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(invalid)?;
    let c_name = CString::new(name).map_err(invalid)?;

    let absent = |err: &io::Error| {
        matches!(
            err.raw_os_error(),
            Some(libc::ENODATA) | Some(libc::ENOTSUP) | Some(libc::EPERM)
        )
    };

    // SAFETY: both strings are NUL-terminated, a null buffer of size 0 only queries the length
    let size =
        unsafe { libc::lgetxattr(c_path.as_ptr(), c_name.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        let err = io::Error::last_os_error();
        return if absent(&err) {
            Ok(None)
        } else {
            Err(Error::path(path, err))
        };
    }

    let mut buf = vec![0u8; size as usize];
    // SAFETY: `buf` is valid for `buf.len()` bytes
    let read = unsafe {
        libc::lgetxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if read < 0 {
        let err = io::Error::last_os_error();
        return if absent(&err) {
            Ok(None)
        } else {
            Err(Error::path(path, err))
        };
    }
    buf.truncate(read as usize);
    Ok(Some(buf))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn lgetxattr(_path: &Path, _name: &str) -> Result<Option<Vec<u8>>> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_fs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("etc"))?;
        fs::write(dir.path().join("etc/hostname"), b"box\n")?;
        std::os::unix::fs::symlink("/etc/hostname", dir.path().join("link"))?;

        let fs = DirFs::new(dir.path());
        assert_eq!(fs.read(Path::new("/etc/hostname"))?, b"box\n");
        assert_eq!(fs.stat(Path::new("etc"))?.kind, FileKind::Dir);
        assert_eq!(fs.stat(Path::new("link"))?.kind, FileKind::Symlink);
        assert_eq!(fs.read_link(Path::new("link"))?, PathBuf::from("/etc/hostname"));
        assert!(fs.open(Path::new("link")).is_err());
        // `..` stays inside the root
        assert_eq!(fs.read(Path::new("../../etc/hostname"))?, b"box\n");

        let names: Vec<_> = fs
            .read_dir(Path::new(""))?
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["etc", "link"]);
        assert!(fs.stat(Path::new("missing")).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn missing_xattr() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fs = DirFs::new(dir.path());
        assert_eq!(fs.xattr(Path::new(""), "user.overlay.opaque")?, None);
        Ok(())
    }
}
