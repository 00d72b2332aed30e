//! Container and appdata directory tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{selected_services, StepBody, StepContext};
use crate::config::keys;
use crate::system::FileSystem;

/// Stacks laid out when no selection has been made yet
pub const DEFAULT_STACKS: &[&str] = &["media", "web", "cloud"];

const DIR_MODE: u32 = 0o755;

/// Warn below this much free space on the base directory's filesystem
const LOW_SPACE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

pub struct DirectorySetup;

/// Closest existing ancestor, for statvfs on a path that may not exist yet
fn existing_ancestor(fs: &dyn FileSystem, path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| fs.directory_exists(p).unwrap_or(false))
        .map(Path::to_path_buf)
}

/// Directories for `stacks` under the base and appdata roots, roots first.
pub fn planned_directories(base: &Path, appdata: &Path, stacks: &[String]) -> Vec<PathBuf> {
    let mut dirs = vec![base.to_path_buf(), appdata.to_path_buf()];
    for stack in stacks {
        dirs.push(base.join(stack));
        dirs.push(appdata.join(stack));
    }
    dirs
}

impl StepBody for DirectorySetup {
    fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let owner = ctx.homelab_owner()?;
        let base = PathBuf::from(ctx.value(keys::HOMELAB_BASE_DIR, "/srv/containers"));
        let appdata = PathBuf::from(ctx.value(keys::APPDATA_PATH, "/var/lib/containers/appdata"));

        let mut stacks = selected_services(ctx.config);
        if stacks.is_empty() {
            stacks = DEFAULT_STACKS.iter().map(|s| s.to_string()).collect();
        }

        if let Some(probe) = existing_ancestor(ctx.fs, &base) {
            match ctx.fs.disk_usage(&probe) {
                Ok(usage) if usage.available < LOW_SPACE_BYTES => warn!(
                    path = %probe.display(),
                    available_mib = usage.available / (1024 * 1024),
                    "Low free space for container data"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Could not determine free space"),
            }
        }

        for dir in planned_directories(&base, &appdata, &stacks) {
            ctx.fs
                .ensure_directory(&dir, Some(owner), DIR_MODE)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        info!(base = %base.display(), stacks = stacks.len(), "Directory structure ready");
        Ok(())
    }
}
