//! Homelab user account.

use anyhow::{Context, Result};
use nix::unistd::{getuid, User};
use tracing::info;

use super::{missing_config_error, StepBody, StepContext};
use crate::config::keys;
use crate::system::Invocation;

pub struct UserSetup;

/// Login name of whoever invoked us, looking through sudo.
pub fn invoking_user() -> Option<String> {
    if let Ok(name) = std::env::var("SUDO_USER") {
        if !name.is_empty() && name != "root" {
            return Some(name);
        }
    }
    User::from_uid(getuid()).ok().flatten().map(|u| u.name)
}

fn lookup(name: &str) -> Result<Option<User>> {
    User::from_name(name).with_context(|| format!("failed to look up user {}", name))
}

fn detect_timezone(ctx: &StepContext<'_>) -> String {
    let query = Invocation::new("timedatectl")
        .args(["show", "-p", "Timezone", "--value"])
        .read_only();
    match ctx.commands.run(&query) {
        Ok(out) if out.success && !out.stdout.trim().is_empty() => out.stdout.trim().to_string(),
        _ => "UTC".to_string(),
    }
}

/// Configured user name, or the invoking user offered as the default.
/// Root is never picked without being asked for.
fn resolve_name(ctx: &StepContext<'_>, invoking: Option<String>) -> Result<String> {
    if let Some(name) = ctx.config.get(keys::HOMELAB_USER).filter(|s| !s.is_empty()) {
        return Ok(name);
    }

    let default = invoking.filter(|name| name != "root");
    if default.is_none() && !ctx.prompter.is_interactive() {
        return Err(missing_config_error(keys::HOMELAB_USER).into());
    }
    let name = ctx.prompter.input("Homelab user name", default.as_deref())?;
    let name = name.trim();
    if name.is_empty() {
        return Err(missing_config_error(keys::HOMELAB_USER).into());
    }
    ctx.config.set(keys::HOMELAB_USER, name)?;
    Ok(name.to_string())
}

impl StepBody for UserSetup {
    fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let name = resolve_name(ctx, invoking_user())?;

        let user = match lookup(&name)? {
            Some(user) => user,
            None => {
                info!(user = %name, "Creating user");
                ctx.run(Invocation::new("useradd").args(["--create-home", "--user-group"]).arg(&name))?;
                match lookup(&name)? {
                    Some(user) => user,
                    // A dry run never creates the account
                    None if ctx.dry_run => return Ok(()),
                    None => anyhow::bail!("user {} still missing after useradd", name),
                }
            }
        };

        let timezone = match ctx.config.get(keys::HOMELAB_TIMEZONE) {
            Some(tz) if !tz.is_empty() => tz,
            _ => detect_timezone(ctx),
        };

        let uid = user.uid.as_raw().to_string();
        let gid = user.gid.as_raw().to_string();
        ctx.config.set_many(&[
            (keys::HOMELAB_UID, uid.as_str()),
            (keys::HOMELAB_GID, gid.as_str()),
            (keys::HOMELAB_TIMEZONE, timezone.as_str()),
        ])?;

        // Rootless containers keep running after logout
        if user.uid.as_raw() != 0 {
            ctx.run(Invocation::new("loginctl").arg("enable-linger").arg(&name))?;
        }

        info!(user = %name, uid = user.uid.as_raw(), gid = user.gid.as_raw(), "User configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::error::SetupError;
    use crate::prompt::NonInteractive;
    use crate::system::{LocalFileSystem, SystemCommandExecutor};

    fn resolve(config: &ConfigStore, invoking: Option<&str>) -> Result<String> {
        let ctx = StepContext {
            config,
            fs: &LocalFileSystem,
            commands: &SystemCommandExecutor,
            prompter: &NonInteractive,
            dry_run: true,
        };
        resolve_name(&ctx, invoking.map(str::to_string))
    }

    fn assert_missing_user(result: Result<String>) {
        let err = SetupError::from(result.expect_err("no user"));
        match &err {
            SetupError::MissingConfig { key, .. } => assert_eq!(key, keys::HOMELAB_USER),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("--setup-user"));
    }

    #[test]
    fn test_non_interactive_without_invoking_user_names_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigStore::new(dir.path().join("c.conf"));
        assert_missing_user(resolve(&config, None));
        assert!(!config.exists(keys::HOMELAB_USER));
    }

    #[test]
    fn test_non_interactive_never_adopts_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigStore::new(dir.path().join("c.conf"));
        assert_missing_user(resolve(&config, Some("root")));
    }

    #[test]
    fn test_invoking_user_becomes_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigStore::new(dir.path().join("c.conf"));
        assert_eq!(resolve(&config, Some("core")).expect("resolved"), "core");
        assert_eq!(config.get(keys::HOMELAB_USER).as_deref(), Some("core"));
    }

    #[test]
    fn test_configured_user_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigStore::new(dir.path().join("c.conf"));
        config.set(keys::HOMELAB_USER, "alice").expect("set");
        assert_eq!(resolve(&config, Some("root")).expect("resolved"), "alice");
    }
}
