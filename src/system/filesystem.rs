//! Filesystem operations used by step bodies.
//!
//! The trait is split into mutating operations, which the dry-run layer
//! intercepts, and read-only queries, which always hit the real filesystem.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use nix::unistd::{chown, Gid, Uid};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SetupError};

/// Numeric file owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// Free/total space of the filesystem holding a path, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total: u64,
    pub available: u64,
}

pub trait FileSystem: Send + Sync {
    // Mutating operations

    /// Create `path` and its parents if missing, then apply `mode` and `owner`.
    fn ensure_directory(&self, path: &Path, owner: Option<Owner>, mode: u32) -> Result<()>;

    /// Replace `path` with `contents` and set `mode`.
    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()>;

    fn chown(&self, path: &Path, owner: Owner) -> Result<()>;

    fn chown_recursive(&self, path: &Path, owner: Owner) -> Result<()>;

    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    /// Remove a directory tree. A missing directory is not an error.
    fn remove_directory(&self, path: &Path) -> Result<()>;

    /// Remove a file. A missing file is not an error.
    fn remove_file(&self, path: &Path) -> Result<()>;

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Point `link` at `target`, replacing an existing symlink.
    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Copy `path` to a timestamped `.backup` sibling and return its path.
    fn backup_file(&self, path: &Path) -> Result<PathBuf>;

    // Read-only queries

    fn file_exists(&self, path: &Path) -> Result<bool>;

    fn directory_exists(&self, path: &Path) -> Result<bool>;

    fn read_to_string(&self, path: &Path) -> Result<String>;

    fn owner(&self, path: &Path) -> Result<Owner>;

    /// Permission bits (`0o7777` mask)
    fn permissions(&self, path: &Path) -> Result<u32>;

    fn disk_usage(&self, path: &Path) -> Result<DiskUsage>;

    /// Sorted entry names
    fn list_directory(&self, path: &Path) -> Result<Vec<String>>;

    /// Whether `path` is the root of a mounted filesystem
    fn is_mount_point(&self, path: &Path) -> Result<bool>;
}

impl<T: FileSystem + ?Sized> FileSystem for Box<T> {
    fn ensure_directory(&self, path: &Path, owner: Option<Owner>, mode: u32) -> Result<()> {
        (**self).ensure_directory(path, owner, mode)
    }
    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        (**self).write_file(path, contents, mode)
    }
    fn chown(&self, path: &Path, owner: Owner) -> Result<()> {
        (**self).chown(path, owner)
    }
    fn chown_recursive(&self, path: &Path, owner: Owner) -> Result<()> {
        (**self).chown_recursive(path, owner)
    }
    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        (**self).chmod(path, mode)
    }
    fn remove_directory(&self, path: &Path) -> Result<()> {
        (**self).remove_directory(path)
    }
    fn remove_file(&self, path: &Path) -> Result<()> {
        (**self).remove_file(path)
    }
    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        (**self).copy_file(from, to)
    }
    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        (**self).create_symlink(target, link)
    }
    fn backup_file(&self, path: &Path) -> Result<PathBuf> {
        (**self).backup_file(path)
    }
    fn file_exists(&self, path: &Path) -> Result<bool> {
        (**self).file_exists(path)
    }
    fn directory_exists(&self, path: &Path) -> Result<bool> {
        (**self).directory_exists(path)
    }
    fn read_to_string(&self, path: &Path) -> Result<String> {
        (**self).read_to_string(path)
    }
    fn owner(&self, path: &Path) -> Result<Owner> {
        (**self).owner(path)
    }
    fn permissions(&self, path: &Path) -> Result<u32> {
        (**self).permissions(path)
    }
    fn disk_usage(&self, path: &Path) -> Result<DiskUsage> {
        (**self).disk_usage(path)
    }
    fn list_directory(&self, path: &Path) -> Result<Vec<String>> {
        (**self).list_directory(path)
    }
    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        (**self).is_mount_point(path)
    }
}

/// Direct syscalls against the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SetupError + '_ {
    move |e| SetupError::io(path, e)
}

impl FileSystem for LocalFileSystem {
    fn ensure_directory(&self, path: &Path, owner: Option<Owner>, mode: u32) -> Result<()> {
        fs::create_dir_all(path).map_err(io_err(path))?;
        self.chmod(path, mode)?;
        if let Some(owner) = owner {
            self.chown(path, owner)?;
        }
        debug!(path = %path.display(), mode = %format_args!("{:o}", mode), "Directory ensured");
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(mode)
            .open(path)
            .map_err(io_err(path))?;
        // mode() only applies on creation; tighten an existing file before
        // the old contents are replaced
        file.set_permissions(fs::Permissions::from_mode(mode)).map_err(io_err(path))?;
        file.set_len(0).map_err(io_err(path))?;
        file.write_all(contents).map_err(io_err(path))?;
        debug!(path = %path.display(), bytes = contents.len(), "File written");
        Ok(())
    }

    fn chown(&self, path: &Path, owner: Owner) -> Result<()> {
        chown(
            path,
            Some(Uid::from_raw(owner.uid)),
            Some(Gid::from_raw(owner.gid)),
        )
        .map_err(|e| SetupError::io(path, e.into()))
    }

    fn chown_recursive(&self, path: &Path, owner: Owner) -> Result<()> {
        self.chown(path, owner)?;
        let meta = fs::symlink_metadata(path).map_err(io_err(path))?;
        if meta.is_dir() {
            for entry in fs::read_dir(path).map_err(io_err(path))? {
                let entry = entry.map_err(io_err(path))?;
                self.chown_recursive(&entry.path(), owner)?;
            }
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err(path))
    }

    fn remove_directory(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(SetupError::io(path, e)),
            _ => Ok(()),
        }
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(SetupError::io(path, e)),
            _ => Ok(()),
        }
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        fs::copy(from, to).map_err(io_err(from))?;
        Ok(())
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        if let Ok(meta) = fs::symlink_metadata(link) {
            if meta.file_type().is_symlink() {
                fs::remove_file(link).map_err(io_err(link))?;
            } else {
                return Err(SetupError::validation(format!(
                    "refusing to replace non-symlink {}",
                    link.display()
                )));
            }
        }
        std::os::unix::fs::symlink(target, link).map_err(io_err(link))
    }

    fn backup_file(&self, path: &Path) -> Result<PathBuf> {
        let backup = backup_path(path, unix_timestamp());
        self.copy_file(path, &backup)?;
        debug!(from = %path.display(), to = %backup.display(), "Backup created");
        Ok(backup)
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SetupError::io(path, e)),
        }
    }

    fn directory_exists(&self, path: &Path) -> Result<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SetupError::io(path, e)),
        }
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(io_err(path))
    }

    fn owner(&self, path: &Path) -> Result<Owner> {
        let meta = fs::metadata(path).map_err(io_err(path))?;
        Ok(Owner::new(meta.uid(), meta.gid()))
    }

    fn permissions(&self, path: &Path) -> Result<u32> {
        let meta = fs::metadata(path).map_err(io_err(path))?;
        Ok(meta.permissions().mode() & 0o7777)
    }

    fn disk_usage(&self, path: &Path) -> Result<DiskUsage> {
        let stats = statvfs(path).map_err(|e| SetupError::io(path, e.into()))?;
        let fragment = stats.fragment_size() as u64;
        Ok(DiskUsage {
            total: stats.blocks() as u64 * fragment,
            available: stats.blocks_available() as u64 * fragment,
        })
    }

    fn list_directory(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).map_err(io_err(path))? {
            let entry = entry.map_err(io_err(path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        let meta = fs::metadata(path).map_err(io_err(path))?;
        let parent = match path.parent() {
            Some(p) if p.as_os_str().is_empty() => Path::new("."),
            Some(p) => p,
            None => Path::new("/"),
        };
        let parent_meta = fs::metadata(parent).map_err(io_err(parent))?;
        // Root, or a different device than the parent
        Ok(meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino())
    }
}

/// `<path>.backup.<timestamp>`
pub fn backup_path(path: &Path, timestamp: u64) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".backup.{}", timestamp));
    PathBuf::from(name)
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
