//! Systemd units that run each compose stack, then start them.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use super::nfs::mount_unit_name;
use super::{capitalize, missing_config_error, selected_services, StepBody, StepContext};
use crate::config::keys;
use crate::progress::Spinner;
use crate::system::Invocation;

pub struct Deployment;

/// Where and how one stack is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceUnit {
    pub stack: String,
    pub unit_name: String,
    pub directory: PathBuf,
    /// NFS mount the stack's data lives behind, if any
    pub mount_point: Option<String>,
}

impl ServiceUnit {
    pub fn new(stack: &str, base_dir: &Path, mount_point: Option<String>) -> Self {
        ServiceUnit {
            stack: stack.to_string(),
            unit_name: format!("podman-compose-{}.service", stack),
            directory: base_dir.join(stack),
            mount_point: mount_point.filter(|m| !m.is_empty()),
        }
    }

    pub fn render(&self, compose: &str) -> String {
        let mut wants = vec!["network-online.target".to_string()];
        let mut after = wants.clone();
        let mut mounts = vec![self.directory.display().to_string()];
        if let Some(mount_point) = &self.mount_point {
            let unit = mount_unit_name(mount_point);
            wants.push(unit.clone());
            after.push(unit);
            mounts.push(mount_point.clone());
        }

        format!(
            "[Unit]\n\
             Description=Homelab {} Stack\n\
             Wants={}\n\
             After={}\n\
             RequiresMountsFor={}\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             RemainAfterExit=true\n\
             WorkingDirectory={}\n\
             ExecStartPre={compose} pull\n\
             ExecStart={compose} up -d\n\
             ExecStop={compose} down\n\
             TimeoutStartSec=600\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            capitalize(&self.stack),
            wants.join(" "),
            after.join(" "),
            mounts.join(" "),
            self.directory.display(),
        )
    }
}

/// Compose front-end for a container runtime.
pub fn compose_command(runtime: &str) -> Result<Vec<String>> {
    match runtime {
        "podman" => Ok(vec!["podman".into(), "compose".into()]),
        "docker" => Ok(vec!["docker".into(), "compose".into()]),
        other => bail!("unsupported container runtime '{}' (expected podman or docker)", other),
    }
}

/// Where packaged or pre-configured units live besides the admin unit dir
const VENDOR_UNIT_DIRS: &[&str] = &["/usr/lib/systemd/system", "/lib/systemd/system"];

/// Web front-ends of the known stacks, for the access summary
const SERVICE_PORTS: &[(&str, &[(&str, u16)])] = &[
    ("media", &[("Plex", 32400), ("Jellyfin", 8096), ("Tautulli", 8181)]),
    ("web", &[("Overseerr", 5055), ("Wizarr", 5690), ("Organizr", 9983), ("Homepage", 3000)]),
    ("cloud", &[("Nextcloud", 8080), ("Collabora", 9980), ("Immich", 2283)]),
];

/// Path of an already installed unit named `unit_name`, admin dir first.
fn existing_unit(ctx: &StepContext<'_>, unit_dir: &Path, unit_name: &str) -> Result<Option<PathBuf>> {
    let dirs = std::iter::once(unit_dir).chain(VENDOR_UNIT_DIRS.iter().map(Path::new));
    for dir in dirs {
        let path = dir.join(unit_name);
        if ctx.fs.file_exists(&path)? {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Names from `ps --format {{.Names}}` output that belong to `stack`.
pub fn stack_containers(ps_output: &str, stack: &str) -> Vec<String> {
    let stack = stack.to_lowercase();
    ps_output
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && name.to_lowercase().contains(&stack))
        .map(str::to_string)
        .collect()
}

/// List the stack's running containers. Only ever warns.
fn verify_containers(ctx: &StepContext<'_>, runtime: &str, unit: &ServiceUnit) -> Vec<String> {
    if ctx.dry_run {
        info!(stack = %unit.stack, "[DRY-RUN] skipping container verification");
        return Vec::new();
    }
    let list = Invocation::new(runtime)
        .args(["ps", "--format", "{{.Names}}"])
        .read_only();
    let output = match ctx.commands.run(&list) {
        Ok(out) if out.success => out.stdout,
        Ok(out) => {
            warn!(stack = %unit.stack, stderr = %out.stderr.trim(), "Could not list containers");
            return Vec::new();
        }
        Err(e) => {
            warn!(stack = %unit.stack, error = %e, "Could not list containers");
            return Vec::new();
        }
    };

    let containers = stack_containers(&output, &unit.stack);
    if containers.is_empty() {
        warn!(
            stack = %unit.stack,
            "No running containers found yet; check with: systemctl status {}",
            unit.unit_name
        );
    } else {
        info!(stack = %unit.stack, containers = %containers.join(", "), "Containers running");
    }
    containers
}

/// Where to reach the web front-ends of `stacks`.
pub fn access_summary(stacks: &[String], runtime: &str) -> String {
    let mut out = String::from("Service access:\n");
    for stack in stacks {
        let Some((_, ports)) = SERVICE_PORTS.iter().find(|(name, _)| *name == stack.as_str()) else {
            continue;
        };
        out.push_str(&format!("  {} stack:\n", capitalize(stack)));
        for (service, port) in ports.iter() {
            out.push_str(&format!("    - {}: http://localhost:{}\n", service, port));
        }
    }
    out.push_str("  Services may take a few minutes to fully start.\n");
    out.push_str(&format!("  Running containers: {} ps\n", runtime));
    out.push_str(&format!("  Container logs: {} logs <container-name>\n", runtime));
    out
}

/// systemctl/journalctl commands for managing the deployed units.
pub fn management_summary(units: &[ServiceUnit]) -> String {
    let mut out = String::from("Service management:\n");
    for (label, command) in [
        ("Start", "systemctl start"),
        ("Stop", "systemctl stop"),
        ("Status", "systemctl status"),
        ("Logs", "journalctl -f -u"),
    ] {
        out.push_str(&format!("  {}:\n", label));
        for unit in units {
            out.push_str(&format!("    sudo {} {}\n", command, unit.unit_name));
        }
    }
    out
}

fn deploy(ctx: &StepContext<'_>, unit: &ServiceUnit, compose: &[String], unit_dir: &Path) -> Result<()> {
    let compose_file = unit.directory.join("compose.yml");
    if !ctx.dry_run && !ctx.fs.file_exists(&compose_file)? {
        bail!("no compose file found in {}", unit.directory.display());
    }

    match existing_unit(ctx, unit_dir, &unit.unit_name) {
        Ok(Some(path)) => info!(unit = %unit.unit_name, path = %path.display(), "Using existing service unit"),
        found => {
            if let Err(e) = found {
                warn!(unit = %unit.unit_name, error = %e, "Could not check for an existing unit");
            }
            let unit_path = unit_dir.join(&unit.unit_name);
            ctx.fs
                .write_file(&unit_path, unit.render(&compose.join(" ")).as_bytes(), 0o644)
                .with_context(|| format!("failed to write {}", unit_path.display()))?;
            ctx.run(Invocation::new("systemctl").arg("daemon-reload"))?;
        }
    }

    // Pull ahead of start so a slow registry doesn't hit the start timeout
    let pull = Invocation::new(&compose[0])
        .args(compose[1..].iter().cloned())
        .args(["--project-directory".to_string(), unit.directory.display().to_string()])
        .arg("pull");
    let spinner = Spinner::start(format!("Pulling images for {}", unit.stack));
    let pulled = ctx.run(pull);
    spinner.stop();
    if let Err(e) = pulled {
        warn!(stack = %unit.stack, error = %e, "Image pull failed, images will be pulled on start");
    }

    let spinner = Spinner::start(format!("Starting {}", unit.unit_name));
    let started = ctx.run(Invocation::new("systemctl").args(["enable", "--now"]).arg(&unit.unit_name));
    spinner.stop();
    started.with_context(|| format!("failed to start {}", unit.unit_name))?;

    verify_containers(ctx, &compose[0], unit);
    Ok(())
}

impl StepBody for Deployment {
    fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let stacks = selected_services(ctx.config);
        if stacks.is_empty() {
            return Err(missing_config_error(keys::SELECTED_SERVICES).into());
        }

        let compose = compose_command(&ctx.value(keys::CONTAINER_RUNTIME, "podman"))?;
        let base = PathBuf::from(ctx.value(keys::HOMELAB_BASE_DIR, "/srv/containers"));
        let unit_dir = PathBuf::from(ctx.value(keys::SYSTEMD_UNIT_DIR, "/etc/systemd/system"));
        let mount_point = ctx
            .config
            .get(keys::NFS_SERVER)
            .map(|_| ctx.value(keys::NFS_MOUNT_POINT, "/mnt/nas"));

        ctx.fs.ensure_directory(&unit_dir, None, 0o755)?;

        let mut deployed = Vec::new();
        for stack in &stacks {
            let unit = ServiceUnit::new(stack, &base, mount_point.clone());
            match deploy(ctx, &unit, &compose, &unit_dir) {
                Ok(()) => {
                    info!(stack = %stack, unit = %unit.unit_name, "Stack deployed");
                    deployed.push(unit);
                }
                Err(e) => error!(stack = %stack, error = %format!("{:#}", e), "Stack deployment failed, continuing"),
            }
        }

        if deployed.is_empty() {
            bail!("no stacks could be deployed ({})", stacks.join(", "));
        }

        let names: Vec<String> = deployed.iter().map(|u| u.stack.clone()).collect();
        for line in access_summary(&names, &compose[0]).lines() {
            info!("{}", line);
        }
        for line in management_summary(&deployed).lines() {
            info!("{}", line);
        }
        info!(deployed = %names.join(", "), total = stacks.len(), "Service deployment finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_without_nfs() {
        let unit = ServiceUnit::new("media", Path::new("/srv/containers"), None);
        assert_eq!(unit.unit_name, "podman-compose-media.service");

        let text = unit.render("podman compose");
        assert!(text.contains("Description=Homelab Media Stack\n"));
        assert!(text.contains("Wants=network-online.target\n"));
        assert!(text.contains("RequiresMountsFor=/srv/containers/media\n"));
        assert!(text.contains("ExecStart=podman compose up -d\n"));
        assert!(text.contains("WorkingDirectory=/srv/containers/media\n"));
    }

    #[test]
    fn test_unit_orders_after_nfs_mount() {
        let unit = ServiceUnit::new("cloud", Path::new("/srv/containers"), Some("/mnt/nas".to_string()));
        let text = unit.render("docker compose");
        assert!(text.contains("Wants=network-online.target mnt-nas.mount\n"));
        assert!(text.contains("After=network-online.target mnt-nas.mount\n"));
        assert!(text.contains("RequiresMountsFor=/srv/containers/cloud /mnt/nas\n"));
        assert!(text.contains("ExecStop=docker compose down\n"));
    }

    #[test]
    fn test_empty_mount_point_is_ignored() {
        let unit = ServiceUnit::new("web", Path::new("/srv"), Some(String::new()));
        assert_eq!(unit.mount_point, None);
    }

    #[test]
    fn test_stack_containers_match_case_insensitively() {
        let ps = "media_jellyfin_1\nMedia-Plex\nweb_overseerr_1\n\n  media_tautulli_1  \n";
        assert_eq!(
            stack_containers(ps, "media"),
            vec!["media_jellyfin_1", "Media-Plex", "media_tautulli_1"]
        );
        assert!(stack_containers(ps, "cloud").is_empty());
    }

    #[test]
    fn test_access_summary_lists_known_stacks() {
        let text = access_summary(&["media".to_string(), "custom".to_string()], "podman");
        assert!(text.contains("  Media stack:\n"));
        assert!(text.contains("    - Jellyfin: http://localhost:8096\n"));
        assert!(!text.contains("Custom"));
        assert!(text.contains("podman ps"));
    }

    #[test]
    fn test_management_summary_covers_every_unit() {
        let units = vec![
            ServiceUnit::new("media", Path::new("/srv"), None),
            ServiceUnit::new("web", Path::new("/srv"), None),
        ];
        let text = management_summary(&units);
        assert!(text.contains("sudo systemctl start podman-compose-media.service\n"));
        assert!(text.contains("sudo systemctl stop podman-compose-web.service\n"));
        assert!(text.contains("sudo journalctl -f -u podman-compose-web.service\n"));
    }

    #[test]
    fn test_compose_command() {
        assert_eq!(compose_command("podman").expect("podman"), vec!["podman", "compose"]);
        assert_eq!(compose_command("docker").expect("docker"), vec!["docker", "compose"]);
        assert!(compose_command("lxc").is_err());
    }
}
