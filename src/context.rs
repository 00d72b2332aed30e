//! Setup context
//!
//! Bundles the config store, marker store, gateways and prompter for one
//! invocation. Step bodies see a borrowed [`StepContext`] view of it.

use std::path::PathBuf;

use nix::unistd::{getuid, User};
use tracing::debug;

use crate::config::ConfigStore;
use crate::error::Result;
use crate::markers::MarkerStore;
use crate::prompt::{NonInteractive, Prompter, TerminalPrompter};
use crate::steps::StepContext;
use crate::system::{CommandExecutor, DryRun, FileSystem, LocalFileSystem, SystemCommandExecutor};

/// Environment override for the config file location
pub const CONFIG_PATH_ENV: &str = "HOMELAB_SETUP_CONFIG";
/// Environment override for the marker directory
pub const MARKER_DIR_ENV: &str = "HOMELAB_SETUP_MARKER_DIR";

const CONFIG_FILE_NAME: &str = ".homelab-setup.conf";
const FALLBACK_HOME: &str = "/var/home/core";

/// Home directory of the current user: `$HOME`, then the passwd entry.
pub fn home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        return PathBuf::from(home);
    }
    match User::from_uid(getuid()) {
        Ok(Some(user)) => user.dir,
        _ => PathBuf::from(FALLBACK_HOME),
    }
}

pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(CONFIG_FILE_NAME))
}

pub fn default_marker_dir() -> PathBuf {
    std::env::var_os(MARKER_DIR_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".local").join("homelab-setup"))
}

/// How to build a [`SetupContext`].
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub config_path: Option<PathBuf>,
    pub marker_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub non_interactive: bool,
}

pub struct SetupContext {
    pub config: ConfigStore,
    pub markers: MarkerStore,
    pub fs: Box<dyn FileSystem>,
    pub commands: Box<dyn CommandExecutor>,
    pub prompter: Box<dyn Prompter>,
    pub dry_run: bool,
}

impl SetupContext {
    /// Load the config (running migrations) and wire the real gateways,
    /// wrapped for dry-run when requested.
    pub fn open(options: ContextOptions) -> Result<Self> {
        let config_path = options.config_path.unwrap_or_else(default_config_path);
        let marker_dir = options.marker_dir.unwrap_or_else(default_marker_dir);
        debug!(config = %config_path.display(), markers = %marker_dir.display(), "Opening setup context");

        let prompter: Box<dyn Prompter> = if options.non_interactive || !TerminalPrompter::available() {
            Box::new(NonInteractive)
        } else {
            Box::new(TerminalPrompter::new())
        };

        Ok(SetupContext {
            config: ConfigStore::open(config_path)?,
            markers: MarkerStore::new(marker_dir),
            fs: Box::new(DryRun::new(LocalFileSystem::new(), options.dry_run)),
            commands: Box::new(DryRun::new(SystemCommandExecutor::new(), options.dry_run)),
            prompter,
            dry_run: options.dry_run,
        })
    }

    /// Assemble a context from parts, e.g. with fake gateways.
    pub fn from_parts(
        config: ConfigStore,
        markers: MarkerStore,
        fs: Box<dyn FileSystem>,
        commands: Box<dyn CommandExecutor>,
        prompter: Box<dyn Prompter>,
        dry_run: bool,
    ) -> Self {
        SetupContext {
            config,
            markers,
            fs,
            commands,
            prompter,
            dry_run,
        }
    }

    pub fn step_context(&self) -> StepContext<'_> {
        StepContext {
            config: &self.config,
            fs: self.fs.as_ref(),
            commands: self.commands.as_ref(),
            prompter: self.prompter.as_ref(),
            dry_run: self.dry_run,
        }
    }
}
