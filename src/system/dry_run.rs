//! Dry-run decorator.
//!
//! `DryRun` wraps a [`FileSystem`] or [`CommandExecutor`]. When enabled, every
//! mutating call is logged with its parameters and reported as successful
//! without touching the system. Queries always go to the wrapped
//! implementation, so step bodies still branch on the real state of the host.

use std::path::{Path, PathBuf};

use tracing::info;

use super::command::{CommandExecutor, CommandOutput, Invocation};
use super::filesystem::{DiskUsage, FileSystem, Owner};
use crate::error::Result;

/// Suffix of the placeholder path returned by a simulated backup
pub const DRY_RUN_BACKUP_SUFFIX: &str = ".backup.DRYRUN";

/// Pass-through when disabled, log-only for mutations when enabled.
#[derive(Debug, Clone)]
pub struct DryRun<T> {
    inner: T,
    enabled: bool,
}

impl<T> DryRun<T> {
    pub fn new(inner: T, enabled: bool) -> Self {
        Self { inner, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: FileSystem> FileSystem for DryRun<T> {
    fn ensure_directory(&self, path: &Path, owner: Option<Owner>, mode: u32) -> Result<()> {
        if self.enabled {
            info!(
                path = %path.display(),
                owner = ?owner,
                mode = %format_args!("{:o}", mode),
                "[DRY-RUN] would create directory"
            );
            return Ok(());
        }
        self.inner.ensure_directory(path, owner, mode)
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        if self.enabled {
            info!(
                path = %path.display(),
                bytes = contents.len(),
                mode = %format_args!("{:o}", mode),
                "[DRY-RUN] would write file"
            );
            return Ok(());
        }
        self.inner.write_file(path, contents, mode)
    }

    fn chown(&self, path: &Path, owner: Owner) -> Result<()> {
        if self.enabled {
            info!(path = %path.display(), uid = owner.uid, gid = owner.gid, "[DRY-RUN] would chown");
            return Ok(());
        }
        self.inner.chown(path, owner)
    }

    fn chown_recursive(&self, path: &Path, owner: Owner) -> Result<()> {
        if self.enabled {
            info!(
                path = %path.display(),
                uid = owner.uid,
                gid = owner.gid,
                "[DRY-RUN] would chown recursively"
            );
            return Ok(());
        }
        self.inner.chown_recursive(path, owner)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        if self.enabled {
            info!(path = %path.display(), mode = %format_args!("{:o}", mode), "[DRY-RUN] would chmod");
            return Ok(());
        }
        self.inner.chmod(path, mode)
    }

    fn remove_directory(&self, path: &Path) -> Result<()> {
        if self.enabled {
            info!(path = %path.display(), "[DRY-RUN] would remove directory");
            return Ok(());
        }
        self.inner.remove_directory(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        if self.enabled {
            info!(path = %path.display(), "[DRY-RUN] would remove file");
            return Ok(());
        }
        self.inner.remove_file(path)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if self.enabled {
            info!(from = %from.display(), to = %to.display(), "[DRY-RUN] would copy file");
            return Ok(());
        }
        self.inner.copy_file(from, to)
    }

    fn create_symlink(&self, target: &Path, link: &Path) -> Result<()> {
        if self.enabled {
            info!(target = %target.display(), link = %link.display(), "[DRY-RUN] would create symlink");
            return Ok(());
        }
        self.inner.create_symlink(target, link)
    }

    fn backup_file(&self, path: &Path) -> Result<PathBuf> {
        if self.enabled {
            let mut name = path.as_os_str().to_owned();
            name.push(DRY_RUN_BACKUP_SUFFIX);
            info!(path = %path.display(), "[DRY-RUN] would back up file");
            return Ok(PathBuf::from(name));
        }
        self.inner.backup_file(path)
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        self.inner.file_exists(path)
    }

    fn directory_exists(&self, path: &Path) -> Result<bool> {
        self.inner.directory_exists(path)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.inner.read_to_string(path)
    }

    fn owner(&self, path: &Path) -> Result<Owner> {
        self.inner.owner(path)
    }

    fn permissions(&self, path: &Path) -> Result<u32> {
        self.inner.permissions(path)
    }

    fn disk_usage(&self, path: &Path) -> Result<DiskUsage> {
        self.inner.disk_usage(path)
    }

    fn list_directory(&self, path: &Path) -> Result<Vec<String>> {
        self.inner.list_directory(path)
    }

    fn is_mount_point(&self, path: &Path) -> Result<bool> {
        self.inner.is_mount_point(path)
    }
}

impl<T: CommandExecutor> CommandExecutor for DryRun<T> {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        if self.enabled && invocation.mutates {
            info!(
                program = %invocation.program,
                args = ?invocation.args,
                "[DRY-RUN] would run command"
            );
            return Ok(CommandOutput::simulated());
        }
        self.inner.run(invocation)
    }

    fn binary_exists(&self, program: &str) -> bool {
        self.inner.binary_exists(program)
    }
}
