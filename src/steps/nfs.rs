//! NFS mount as a systemd `.mount` unit.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::{StepBody, StepContext};
use crate::config::keys;
use crate::system::Invocation;

pub struct NfsSetup;

/// Escape a mount point the way `systemd-escape --path` does and append
/// `.mount`: `/mnt/nas-media` becomes `mnt-nas\x2dmedia.mount`.
pub fn mount_unit_name(mount_point: &str) -> String {
    format!("{}.mount", escape_path(mount_point))
}

fn escape_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "-".to_string();
    }

    let mut out = String::with_capacity(trimmed.len());
    for (i, component) in trimmed.split('/').filter(|c| !c.is_empty()).enumerate() {
        if i > 0 {
            out.push('-');
        }
        for (j, byte) in component.bytes().enumerate() {
            let plain = byte.is_ascii_alphanumeric()
                || byte == b':'
                || byte == b'_'
                || (byte == b'.' && !(i == 0 && j == 0));
            if plain {
                out.push(byte as char);
            } else {
                out.push_str(&format!("\\x{:02x}", byte));
            }
        }
    }
    out
}

pub fn render_mount_unit(server: &str, export: &str, mount_point: &str) -> String {
    format!(
        "[Unit]\n\
         Description=NFS mount {server}:{export}\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         \n\
         [Mount]\n\
         What={server}:{export}\n\
         Where={mount_point}\n\
         Type=nfs\n\
         Options=defaults,_netdev,nfsvers=4\n\
         TimeoutSec=60\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}

/// Whether an fstab already mounts something at `mount_point`.
pub fn fstab_has_mount(fstab: &str, mount_point: &str) -> bool {
    fstab
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split_whitespace().nth(1) == Some(mount_point))
}

impl StepBody for NfsSetup {
    fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let server = ctx.require(keys::NFS_SERVER)?;
        let export = ctx.require(keys::NFS_EXPORT)?;
        let mount_point = ctx.value(keys::NFS_MOUNT_POINT, "/mnt/nas");

        if !export.starts_with('/') {
            bail!("NFS export must be an absolute path, got '{}'", export);
        }
        if !Path::new(&mount_point).is_absolute() {
            bail!("NFS mount point must be an absolute path, got '{}'", mount_point);
        }

        ctx.fs
            .ensure_directory(Path::new(&mount_point), None, 0o755)
            .with_context(|| format!("failed to create mount point {}", mount_point))?;

        let fstab = PathBuf::from(ctx.value(keys::NFS_FSTAB_PATH, "/etc/fstab"));
        if ctx.fs.file_exists(&fstab)? && fstab_has_mount(&ctx.fs.read_to_string(&fstab)?, &mount_point) {
            warn!(
                fstab = %fstab.display(),
                mount_point = %mount_point,
                "Mount point already managed by fstab, not creating a mount unit"
            );
            return Ok(());
        }

        let unit = mount_unit_name(&mount_point);
        let unit_dir = PathBuf::from(ctx.value(keys::SYSTEMD_UNIT_DIR, "/etc/systemd/system"));
        ctx.fs.ensure_directory(&unit_dir, None, 0o755)?;
        let unit_path = unit_dir.join(&unit);
        ctx.fs
            .write_file(
                &unit_path,
                render_mount_unit(&server, &export, &mount_point).as_bytes(),
                0o644,
            )
            .with_context(|| format!("failed to write {}", unit_path.display()))?;

        ctx.run(Invocation::new("systemctl").arg("daemon-reload"))?;
        ctx.run(Invocation::new("systemctl").args(["enable", "--now"]).arg(&unit))
            .with_context(|| format!("failed to mount {}:{} at {}", server, export, mount_point))?;

        info!(unit = %unit, what = %format!("{}:{}", server, export), "NFS mount enabled");
        Ok(())
    }
}
