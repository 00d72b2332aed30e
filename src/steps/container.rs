//! Compose stacks: template discovery, selection, and `.env` generation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use super::{capitalize, missing_config_error, selected_services, StepBody, StepContext};
use crate::config::{keys, ConfigStore};
use crate::context::home_dir;
use crate::system::{FileSystem, Owner};

/// System-wide template location, searched after the user's
pub const SHARED_TEMPLATE_DIR: &str = "/usr/share/compose-setup";

/// Secrets the cloud stack cannot start without
const CLOUD_REQUIRED_KEYS: &[&str] = &[
    keys::NEXTCLOUD_ADMIN_PASSWORD,
    keys::NEXTCLOUD_DB_PASSWORD,
    keys::COLLABORA_PASSWORD,
    keys::IMMICH_DB_PASSWORD,
    keys::REDIS_PASSWORD,
];

pub struct ContainerSetup;

/// Template directories in search order.
pub fn template_candidates(config: &ConfigStore) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = config.get(keys::COMPOSE_TEMPLATE_DIR).filter(|d| !d.is_empty()) {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(home_dir().join("setup").join("compose-setup"));
    dirs.push(PathBuf::from(SHARED_TEMPLATE_DIR));
    dirs
}

fn is_yaml(name: &str) -> bool {
    name.ends_with(".yml") || name.ends_with(".yaml")
}

/// Map stack name to template file name for every compose file in `dir`.
/// Hidden files and README-like files are skipped.
pub fn discover_stacks(fs: &dyn FileSystem, dir: &Path) -> crate::error::Result<BTreeMap<String, String>> {
    let mut stacks = BTreeMap::new();
    for name in fs.list_directory(dir)? {
        if !is_yaml(&name) || name.starts_with('.') || name.to_ascii_lowercase().starts_with("readme") {
            continue;
        }
        if !fs.file_exists(&dir.join(&name))? {
            continue;
        }
        let stack = name
            .trim_end_matches(".yaml")
            .trim_end_matches(".yml")
            .to_string();
        debug!(stack = %stack, file = %name, "Found stack");
        stacks.insert(stack, name);
    }
    Ok(stacks)
}

fn find_templates(ctx: &StepContext<'_>) -> Result<(PathBuf, BTreeMap<String, String>)> {
    let candidates = template_candidates(ctx.config);
    for dir in &candidates {
        if !ctx.fs.directory_exists(dir)? {
            continue;
        }
        let stacks = discover_stacks(ctx.fs, dir)?;
        if stacks.is_empty() {
            warn!(dir = %dir.display(), "Template directory has no compose files");
            continue;
        }
        info!(dir = %dir.display(), count = stacks.len(), "Using compose templates");
        return Ok((dir.clone(), stacks));
    }
    let searched: Vec<String> = candidates.iter().map(|d| d.display().to_string()).collect();
    bail!("no compose templates found (searched: {})", searched.join(", "))
}

fn select_stacks(ctx: &StepContext<'_>, stacks: &BTreeMap<String, String>) -> Result<Vec<String>> {
    let mut selected = selected_services(ctx.config);

    if selected.is_empty() {
        if !ctx.prompter.is_interactive() {
            return Err(missing_config_error(keys::SELECTED_SERVICES).into());
        }
        let all: Vec<&str> = stacks.keys().map(String::as_str).collect();
        let answer = ctx
            .prompter
            .input("Stacks to set up (space separated)", Some(&all.join(" ")))?;
        selected = answer.split_whitespace().map(str::to_string).collect();
        if selected.is_empty() {
            bail!("no stacks selected");
        }
    }

    for stack in &selected {
        if !stacks.contains_key(stack) {
            let known: Vec<&str> = stacks.keys().map(String::as_str).collect();
            bail!("unknown stack '{}' (available: {})", stack, known.join(", "));
        }
    }

    ctx.config.set(keys::SELECTED_SERVICES, &selected.join(" "))?;
    Ok(selected)
}

/// Fail fast in non-interactive mode before anything is copied.
fn ensure_non_interactive_requirements(ctx: &StepContext<'_>, selected: &[String]) -> Result<()> {
    if ctx.prompter.is_interactive() || !selected.iter().any(|s| s == "cloud") {
        return Ok(());
    }
    for key in CLOUD_REQUIRED_KEYS {
        if ctx.value(key, "").is_empty() {
            return Err(missing_config_error(key).into());
        }
    }
    Ok(())
}

/// Stored value, else ask (interactive) with `default`, else `default`.
fn optional_value(ctx: &StepContext<'_>, key: &str, question: &str, default: &str) -> Result<String> {
    if let Some(value) = ctx.config.get(key) {
        return Ok(value);
    }
    let value = if ctx.prompter.is_interactive() {
        ctx.prompter.input(question, Some(default))?
    } else {
        default.to_string()
    };
    if !value.is_empty() {
        ctx.config.set(key, &value)?;
    }
    Ok(value)
}

fn configure_stack(ctx: &StepContext<'_>, stack: &str) -> Result<()> {
    match stack {
        "media" => {
            optional_value(ctx, keys::PLEX_CLAIM_TOKEN, "Plex claim token (optional, https://plex.tv/claim)", "")?;
            optional_value(ctx, keys::JELLYFIN_PUBLIC_URL, "Jellyfin public URL (optional)", "")?;
        }
        "web" => {
            optional_value(ctx, keys::OVERSEERR_API_KEY, "Overseerr API key (optional)", "")?;
        }
        "cloud" => {
            optional_value(ctx, keys::NEXTCLOUD_ADMIN_USER, "Nextcloud admin username", "admin")?;
            for key in CLOUD_REQUIRED_KEYS {
                ctx.require(key)?;
            }
            let domain = optional_value(ctx, keys::NEXTCLOUD_TRUSTED_DOMAINS, "Nextcloud trusted domain", "localhost")?;
            ctx.config.set(keys::COLLABORA_DOMAIN, &domain.replace('.', "\\."))?;
            optional_value(ctx, keys::POSTGRES_USER, "PostgreSQL username", "homelab")?;
        }
        other => debug!(stack = other, "No stack-specific settings"),
    }
    Ok(())
}

/// `.env` content for `stack`.
pub fn render_env(config: &ConfigStore, stack: &str) -> String {
    let get = |key: &str, fallback: &str| config.get_or_default(key, fallback);

    let mut env = format!(
        "# Homelab {} stack environment\n\
         # Generated by homelab-setup\n\
         \n\
         PUID={}\n\
         PGID={}\n\
         TZ={}\n\
         APPDATA_PATH={}\n\
         \n",
        capitalize(stack),
        get(keys::HOMELAB_UID, "1000"),
        get(keys::HOMELAB_GID, "1000"),
        get(keys::HOMELAB_TIMEZONE, "UTC"),
        Path::new(&get(keys::APPDATA_PATH, "/var/lib/containers/appdata")).join(stack).display(),
    );

    let specific: &[(&str, &str)] = match stack {
        "media" => &[(keys::PLEX_CLAIM_TOKEN, ""), (keys::JELLYFIN_PUBLIC_URL, "")],
        "web" => &[(keys::OVERSEERR_API_KEY, "")],
        "cloud" => &[
            (keys::NEXTCLOUD_ADMIN_USER, "admin"),
            (keys::NEXTCLOUD_ADMIN_PASSWORD, ""),
            (keys::NEXTCLOUD_DB_PASSWORD, ""),
            (keys::NEXTCLOUD_TRUSTED_DOMAINS, "localhost"),
            (keys::COLLABORA_PASSWORD, ""),
            (keys::COLLABORA_DOMAIN, "localhost"),
            (keys::IMMICH_DB_PASSWORD, ""),
            (keys::POSTGRES_USER, "homelab"),
            (keys::REDIS_PASSWORD, ""),
        ],
        _ => &[],
    };
    for &(key, fallback) in specific {
        env.push_str(&format!("{}={}\n", key, get(key, fallback)));
    }
    env
}

fn install_stack(ctx: &StepContext<'_>, owner: Owner, template_dir: &Path, stack: &str, file: &str) -> Result<()> {
    let base = PathBuf::from(ctx.value(keys::HOMELAB_BASE_DIR, "/srv/containers"));
    let stack_dir = base.join(stack);
    let compose = stack_dir.join("compose.yml");

    ctx.fs.ensure_directory(&stack_dir, Some(owner), 0o755)?;
    ctx.fs
        .copy_file(&template_dir.join(file), &compose)
        .with_context(|| format!("failed to copy template {}", file))?;
    ctx.fs.chown(&compose, owner)?;
    ctx.fs.chmod(&compose, 0o644)?;

    let legacy_name = stack_dir.join("docker-compose.yml");
    if !ctx.fs.file_exists(&legacy_name)? {
        if let Err(e) = ctx.fs.create_symlink(Path::new("compose.yml"), &legacy_name) {
            warn!(path = %legacy_name.display(), error = %e, "Could not create docker-compose.yml symlink");
        }
    }

    let env_path = stack_dir.join(".env");
    ctx.fs
        .write_file(&env_path, render_env(ctx.config, stack).as_bytes(), 0o600)
        .with_context(|| format!("failed to write {}", env_path.display()))?;
    ctx.fs.chown(&env_path, owner)?;

    info!(stack, dir = %stack_dir.display(), "Stack installed");
    Ok(())
}

impl StepBody for ContainerSetup {
    fn run(&self, ctx: &StepContext<'_>) -> Result<()> {
        let owner = ctx.homelab_owner()?;
        let (template_dir, stacks) = find_templates(ctx)?;
        let selected = select_stacks(ctx, &stacks)?;
        ensure_non_interactive_requirements(ctx, &selected)?;

        for stack in &selected {
            configure_stack(ctx, stack).with_context(|| format!("failed to configure {} stack", stack))?;
        }
        for stack in &selected {
            install_stack(ctx, owner, &template_dir, stack, &stacks[stack])?;
        }

        info!(stacks = %selected.join(", "), "Container stacks configured");
        Ok(())
    }
}
