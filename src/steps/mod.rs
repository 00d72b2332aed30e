//! The provisioning pipeline: step registry and step bodies.
//!
//! The registry is a static, ordered table of [`StepDescriptor`]s. Bodies are
//! thin wrappers around OS tools; they read parameters from the config store and
//! perform every mutation through [`StepContext::fs`] and
//! [`StepContext::commands`] so the dry-run layer can intercept them.

use std::collections::HashMap;

use nix::unistd::{getgid, getuid};
use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::info;

use crate::config::{keys, ConfigStore};
use crate::error::{Result, SetupError};
use crate::prompt::Prompter;
use crate::system::{CommandExecutor, CommandOutput, FileSystem, Invocation, Owner};

pub mod container;
pub mod deployment;
pub mod directory;
pub mod nfs;
pub mod preflight;
pub mod user;
pub mod wireguard;

/// Pipeline steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Preflight,
    User,
    Directory,
    Wireguard,
    Nfs,
    Container,
    Deployment,
}

impl StepId {
    pub fn descriptor(self) -> &'static StepDescriptor {
        // STEPS is indexed by declaration order
        &STEPS[self as usize]
    }
}

/// Immutable step metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDescriptor {
    pub id: StepId,
    pub name: &'static str,
    pub description: &'static str,
    /// Canonical completion marker
    pub marker: &'static str,
    /// Older names for the completion marker
    pub legacy_markers: &'static [&'static str],
    /// May be skipped by `run all --skip-wireguard` / `run quick`
    pub optional: bool,
    /// Config keys that must be set before the body runs
    pub required_config: &'static [&'static str],
}

pub const STEPS: &[StepDescriptor] = &[
    StepDescriptor {
        id: StepId::Preflight,
        name: "Pre-flight Check",
        description: "Verify system requirements",
        marker: "preflight-complete",
        legacy_markers: &[],
        optional: false,
        required_config: &[],
    },
    StepDescriptor {
        id: StepId::User,
        name: "User Setup",
        description: "Configure user account and permissions",
        marker: "user-setup-complete",
        legacy_markers: &[],
        optional: false,
        required_config: &[],
    },
    StepDescriptor {
        id: StepId::Directory,
        name: "Directory Setup",
        description: "Create directory structure",
        marker: "directory-setup-complete",
        legacy_markers: &[],
        optional: false,
        required_config: &[keys::HOMELAB_USER],
    },
    StepDescriptor {
        id: StepId::Wireguard,
        name: "WireGuard Setup",
        description: "Configure VPN (optional)",
        marker: "wireguard-setup-complete",
        legacy_markers: &[],
        optional: true,
        required_config: &[keys::WG_INTERFACE_IP],
    },
    StepDescriptor {
        id: StepId::Nfs,
        name: "NFS Setup",
        description: "Configure network storage",
        marker: "nfs-setup-complete",
        legacy_markers: &[],
        optional: false,
        required_config: &[keys::NFS_SERVER, keys::NFS_EXPORT],
    },
    StepDescriptor {
        id: StepId::Container,
        name: "Container Setup",
        description: "Configure container services",
        marker: "container-setup-complete",
        legacy_markers: &[],
        optional: false,
        required_config: &[keys::HOMELAB_USER],
    },
    StepDescriptor {
        id: StepId::Deployment,
        name: "Service Deployment",
        description: "Deploy and start services",
        marker: "service-deployment-complete",
        legacy_markers: &["deployment-complete"],
        optional: false,
        required_config: &[keys::SELECTED_SERVICES],
    },
];

impl StepDescriptor {
    /// Identifier used on the command line
    pub fn short_name(&self) -> String {
        self.id.to_string()
    }
}

/// Resolve a step by its short name.
pub fn find_step(short_name: &str) -> Result<&'static StepDescriptor> {
    short_name
        .trim()
        .to_ascii_lowercase()
        .parse::<StepId>()
        .map(StepId::descriptor)
        .map_err(|_| SetupError::UnknownStep(short_name.to_string()))
}

/// Everything a step body may touch.
pub struct StepContext<'a> {
    pub config: &'a ConfigStore,
    pub fs: &'a dyn FileSystem,
    pub commands: &'a dyn CommandExecutor,
    pub prompter: &'a dyn Prompter,
    pub dry_run: bool,
}

impl StepContext<'_> {
    /// Config value or built-in default, falling back to `fallback`.
    pub fn value(&self, key: &str, fallback: &str) -> String {
        self.config.get_or_default(key, fallback)
    }

    /// Non-empty config value, asking for it interactively if missing.
    pub fn require(&self, key: &str) -> Result<String> {
        require_value(self.config, self.prompter, key)
    }

    /// Run a command and require success.
    pub fn run(&self, invocation: Invocation) -> Result<CommandOutput> {
        self.commands.run_checked(&invocation)
    }

    /// Owner recorded by the user step. A dry run previewing a user that
    /// does not exist yet gets the invoking process's ids instead.
    pub fn homelab_owner(&self) -> Result<Owner> {
        let uid = self.config.get(keys::HOMELAB_UID);
        let gid = self.config.get(keys::HOMELAB_GID);
        match (
            uid.as_deref().map(str::parse::<u32>),
            gid.as_deref().map(str::parse::<u32>),
        ) {
            (Some(Ok(uid)), Some(Ok(gid))) => Ok(Owner::new(uid, gid)),
            _ if self.dry_run => {
                let owner = Owner::new(getuid().as_raw(), getgid().as_raw());
                info!(
                    uid = owner.uid,
                    gid = owner.gid,
                    "[DRY-RUN] homelab user ids not recorded yet, previewing with placeholder owner"
                );
                Ok(owner)
            }
            _ => Err(SetupError::MissingConfig {
                key: keys::HOMELAB_UID.to_string(),
                description: "homelab user id".to_string(),
                hint: "run the user step first".to_string(),
            }),
        }
    }
}

/// Hint naming the flag and config key that supply `key`.
pub fn missing_config_error(key: &str) -> SetupError {
    let info = keys::info(key);
    let description = info.map_or(key, |i| i.description).to_string();
    let hint = match info.and_then(|i| i.flag) {
        Some(flag) => format!("set via {} or config key {}", flag, key),
        None => format!("config key {}", key),
    };
    SetupError::MissingConfig {
        key: key.to_string(),
        description,
        hint,
    }
}

/// Return the stored value of `key` if non-empty. Otherwise prompt when
/// interactive and persist the answer, or fail with `MissingConfig`.
pub fn require_value(config: &ConfigStore, prompter: &dyn Prompter, key: &str) -> Result<String> {
    let current = config.get_or_default(key, "");
    if !current.trim().is_empty() {
        return Ok(current);
    }
    if !prompter.is_interactive() {
        return Err(missing_config_error(key));
    }

    let description = keys::info(key).map_or(key, |i| i.description);
    let answer = prompter.input(&capitalize(description), None)?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(missing_config_error(key));
    }
    config.set(key, answer)?;
    Ok(answer.to_string())
}

/// Unit of work behind a step.
pub trait StepBody: Send + Sync {
    fn run(&self, ctx: &StepContext<'_>) -> anyhow::Result<()>;
}

/// Bodies for every registered step.
pub fn default_bodies() -> HashMap<StepId, Box<dyn StepBody>> {
    StepId::iter()
        .map(|id| {
            let body: Box<dyn StepBody> = match id {
                StepId::Preflight => Box::new(preflight::Preflight),
                StepId::User => Box::new(user::UserSetup),
                StepId::Directory => Box::new(directory::DirectorySetup),
                StepId::Wireguard => Box::new(wireguard::WireGuardSetup),
                StepId::Nfs => Box::new(nfs::NfsSetup),
                StepId::Container => Box::new(container::ContainerSetup),
                StepId::Deployment => Box::new(deployment::Deployment),
            };
            (id, body)
        })
        .collect()
}

/// Stack names from `SELECTED_SERVICES` (space or comma separated).
pub fn selected_services(config: &ConfigStore) -> Vec<String> {
    config
        .get_or_default(keys::SELECTED_SERVICES, "")
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// "media" -> "Media"
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::NonInteractive;

    #[test]
    fn test_table_matches_enum_order() {
        let ids: Vec<StepId> = StepId::iter().collect();
        let table: Vec<StepId> = STEPS.iter().map(|s| s.id).collect();
        assert_eq!(ids, table);
        for id in StepId::iter() {
            assert_eq!(id.descriptor().id, id);
        }
    }

    #[test]
    fn test_only_wireguard_is_optional() {
        let optional: Vec<_> = STEPS.iter().filter(|s| s.optional).map(|s| s.id).collect();
        assert_eq!(optional, vec![StepId::Wireguard]);
    }

    #[test]
    fn test_marker_names_are_unique_and_valid() {
        for (i, step) in STEPS.iter().enumerate() {
            crate::markers::validate_marker_name(step.marker).expect("valid marker");
            assert!(STEPS[i + 1..].iter().all(|other| other.marker != step.marker));
        }
    }

    #[test]
    fn test_find_step() {
        assert_eq!(find_step("nfs").expect("nfs").marker, "nfs-setup-complete");
        assert_eq!(find_step(" NFS ").expect("nfs").id, StepId::Nfs);
        assert_eq!(find_step("deployment").expect("dep").short_name(), "deployment");
        assert!(matches!(find_step("bogus"), Err(SetupError::UnknownStep(_))));
    }

    #[test]
    fn test_missing_config_error_names_flag() {
        let err = missing_config_error(keys::NFS_SERVER);
        assert_eq!(
            err.to_string(),
            "missing NFS server address (set via --nfs-server or config key NFS_SERVER)"
        );
        let err = missing_config_error("SOMETHING_ELSE");
        assert!(err.to_string().contains("config key SOMETHING_ELSE"));
    }

    #[test]
    fn test_require_value_non_interactive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigStore::open(dir.path().join("c.conf")).expect("open");

        assert!(matches!(
            require_value(&config, &NonInteractive, keys::NFS_EXPORT),
            Err(SetupError::MissingConfig { .. })
        ));
        // Built-in defaults count as present
        assert_eq!(
            require_value(&config, &NonInteractive, keys::NFS_MOUNT_POINT).expect("default"),
            "/mnt/nas"
        );
    }

    #[test]
    fn test_selected_services_parsing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigStore::open(dir.path().join("c.conf")).expect("open");
        assert!(selected_services(&config).is_empty());

        config.set(keys::SELECTED_SERVICES, "media, web  cloud").expect("set");
        assert_eq!(selected_services(&config), vec!["media", "web", "cloud"]);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("media"), "Media");
        assert_eq!(capitalize(""), "");
    }
}
