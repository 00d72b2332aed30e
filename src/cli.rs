use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::keys;

/// homelab-setup - resumable provisioning for a single homelab host
#[derive(Parser, Debug)]
#[command(name = "homelab-setup")]
#[command(about = "Idempotent, resumable setup of a single-machine homelab")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: log every change that would be made without making it.
    ///
    /// Read-only queries (existence checks, disk usage, user lookups) still
    /// run so the preview reflects the real machine. No markers are written.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Never prompt; fail when a required value is missing
    #[arg(long, global = true)]
    pub non_interactive: bool,

    /// Configuration file (default: ~/.homelab-setup.conf)
    #[arg(long, global = true, env = "HOMELAB_SETUP_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Marker directory (default: ~/.local/homelab-setup)
    #[arg(long, global = true, env = "HOMELAB_SETUP_MARKER_DIR")]
    pub marker_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one step, the whole pipeline (`all`), or all but WireGuard (`quick`)
    Run {
        /// all, quick, or a step: preflight, user, directory, wireguard, nfs, container, deployment
        target: String,

        /// Leave out the optional WireGuard step
        #[arg(long)]
        skip_wireguard: bool,

        /// Re-run steps that are already complete without asking
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        seed: SeedArgs,
    },
    /// Show the state of every step
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove step markers so steps run again
    Reset {
        /// Step whose markers to remove
        #[arg(long, conflicts_with = "all")]
        step: Option<String>,
        /// Remove every marker
        #[arg(long)]
        all: bool,
    },
    /// Inspect or edit the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// List marker files
    Markers,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print one value
    Get { key: String },
    /// Store a value
    Set { key: String, value: String },
    /// Remove a key
    Delete { key: String },
    /// Print every entry (secrets masked)
    List {
        /// Show secret values
        #[arg(long)]
        show_secrets: bool,
    },
}

/// Flags that pre-seed configuration before a run
#[derive(Args, Debug, Default, Clone)]
pub struct SeedArgs {
    /// Homelab user name
    #[arg(long)]
    pub setup_user: Option<String>,
    /// NFS server address
    #[arg(long)]
    pub nfs_server: Option<String>,
    /// NFS export path on the server
    #[arg(long)]
    pub nfs_export: Option<String>,
    /// Base directory for compose stacks
    #[arg(long)]
    pub homelab_base_dir: Option<String>,
    /// Plex claim token
    #[arg(long)]
    pub plex_token: Option<String>,
    /// Jellyfin public URL
    #[arg(long)]
    pub jellyfin_url: Option<String>,
    /// Overseerr API key
    #[arg(long)]
    pub overseerr_api_key: Option<String>,
    /// Nextcloud admin username
    #[arg(long)]
    pub nextcloud_admin_user: Option<String>,
    /// Nextcloud admin password
    #[arg(long)]
    pub nextcloud_admin_password: Option<String>,
    /// Nextcloud database password
    #[arg(long)]
    pub nextcloud_db_password: Option<String>,
    /// Nextcloud trusted domain
    #[arg(long)]
    pub nextcloud_domain: Option<String>,
    /// Collabora admin password
    #[arg(long)]
    pub collabora_password: Option<String>,
    /// Immich database password
    #[arg(long)]
    pub immich_db_password: Option<String>,
    /// PostgreSQL username for Immich
    #[arg(long)]
    pub postgres_user: Option<String>,
    /// Redis password
    #[arg(long)]
    pub redis_password: Option<String>,
    /// Stacks to deploy, space or comma separated (e.g. "media web")
    #[arg(long)]
    pub selected_services: Option<String>,
    /// WireGuard interface address in CIDR notation
    #[arg(long)]
    pub wg_interface_ip: Option<String>,
}

impl SeedArgs {
    /// Config entries for every flag that was given.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            (keys::HOMELAB_USER, &self.setup_user),
            (keys::NFS_SERVER, &self.nfs_server),
            (keys::NFS_EXPORT, &self.nfs_export),
            (keys::HOMELAB_BASE_DIR, &self.homelab_base_dir),
            (keys::PLEX_CLAIM_TOKEN, &self.plex_token),
            (keys::JELLYFIN_PUBLIC_URL, &self.jellyfin_url),
            (keys::OVERSEERR_API_KEY, &self.overseerr_api_key),
            (keys::NEXTCLOUD_ADMIN_USER, &self.nextcloud_admin_user),
            (keys::NEXTCLOUD_ADMIN_PASSWORD, &self.nextcloud_admin_password),
            (keys::NEXTCLOUD_DB_PASSWORD, &self.nextcloud_db_password),
            (keys::NEXTCLOUD_TRUSTED_DOMAINS, &self.nextcloud_domain),
            (keys::COLLABORA_PASSWORD, &self.collabora_password),
            (keys::IMMICH_DB_PASSWORD, &self.immich_db_password),
            (keys::POSTGRES_USER, &self.postgres_user),
            (keys::REDIS_PASSWORD, &self.redis_password),
            (keys::SELECTED_SERVICES, &self.selected_services),
            (keys::WG_INTERFACE_IP, &self.wg_interface_ip),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

/// Value shown by `config list`.
pub fn display_value(key: &str, value: &str, show_secrets: bool) -> String {
    if show_secrets || value.is_empty() || !keys::is_secret(key) {
        value.to_string()
    } else {
        "********".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["homelab-setup"]).is_err());
    }

    #[test]
    fn test_cli_run_with_seed_flags() {
        let cli = Cli::try_parse_from([
            "homelab-setup",
            "--non-interactive",
            "run",
            "all",
            "--skip-wireguard",
            "--nfs-server",
            "192.168.1.10",
            "--selected-services",
            "media web",
        ])
        .expect("parse");

        assert!(cli.non_interactive);
        match cli.command {
            Commands::Run {
                target,
                skip_wireguard,
                force,
                seed,
            } => {
                assert_eq!(target, "all");
                assert!(skip_wireguard);
                assert!(!force);
                assert_eq!(
                    seed.entries(),
                    vec![
                        (keys::NFS_SERVER, "192.168.1.10"),
                        (keys::SELECTED_SERVICES, "media web"),
                    ]
                );
            }
            other => panic!("Expected Run command, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["homelab-setup", "status", "--json", "--dry-run", "-vv"]).expect("parse");
        assert!(cli.dry_run);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Status { json: true }));
    }

    #[test]
    fn test_cli_reset_conflicts() {
        assert!(Cli::try_parse_from(["homelab-setup", "reset", "--step", "nfs", "--all"]).is_err());
        assert!(Cli::try_parse_from(["homelab-setup", "reset", "--step", "nfs"]).is_ok());
    }

    #[test]
    fn test_cli_config_subcommands() {
        let cli = Cli::try_parse_from(["homelab-setup", "config", "set", "NFS_SERVER", "nas.lan"]).expect("parse");
        match cli.command {
            Commands::Config {
                action: ConfigCommands::Set { key, value },
            } => {
                assert_eq!(key, "NFS_SERVER");
                assert_eq!(value, "nas.lan");
            }
            other => panic!("Expected config set, got {other:?}"),
        }
    }

    #[test]
    fn test_display_value_masks_secrets() {
        assert_eq!(display_value(keys::REDIS_PASSWORD, "hunter2", false), "********");
        assert_eq!(display_value(keys::REDIS_PASSWORD, "hunter2", true), "hunter2");
        assert_eq!(display_value(keys::NFS_SERVER, "nas.lan", false), "nas.lan");
    }
}
