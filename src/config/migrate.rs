//! Version-indexed configuration migrations.
//!
//! Each migration upgrades the entry map from `to - 1` to `to`. Migrations run
//! in order on load, before any caller can observe the store, and the store
//! then persists `CONFIG_VERSION = CURRENT_VERSION`.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::keys;

/// Schema version written by this build.
pub const CURRENT_VERSION: u32 = 2;

/// Version assumed for files written before `CONFIG_VERSION` existed.
pub const UNVERSIONED: u32 = 1;

/// A single schema upgrade step.
pub struct Migration {
    /// Version this migration produces
    pub to: u32,
    pub description: &'static str,
    pub apply: fn(&mut BTreeMap<String, String>),
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    to: 2,
    description: "rename CONTAINERS_BASE and SETUP_USER to their HOMELAB_* names",
    apply: migrate_legacy_names,
}];

/// Outcome of running migrations over an entry map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Stored version already current, nothing changed
    UpToDate,
    /// Entries were upgraded from `from` to `CURRENT_VERSION`
    Migrated { from: u32 },
    /// Stored version is newer than this build understands; left untouched
    NewerThanSupported { found: u32 },
}

/// Parse the stored `CONFIG_VERSION`. Absent or unparseable values count as
/// the pre-versioning schema.
pub fn stored_version(entries: &BTreeMap<String, String>) -> u32 {
    match entries.get(keys::CONFIG_VERSION) {
        None => UNVERSIONED,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, "Unparseable CONFIG_VERSION, treating as version {}", UNVERSIONED);
            UNVERSIONED
        }),
    }
}

/// Bring `entries` up to `CURRENT_VERSION`.
pub fn run(entries: &mut BTreeMap<String, String>) -> MigrationOutcome {
    let from = stored_version(entries);

    if from > CURRENT_VERSION {
        warn!(
            found = from,
            supported = CURRENT_VERSION,
            "Config was written by a newer homelab-setup; skipping migrations"
        );
        return MigrationOutcome::NewerThanSupported { found: from };
    }

    let versioned = entries.contains_key(keys::CONFIG_VERSION);
    if from == CURRENT_VERSION && versioned {
        return MigrationOutcome::UpToDate;
    }

    for migration in MIGRATIONS.iter().filter(|m| m.to > from) {
        info!(to = migration.to, "Migrating config: {}", migration.description);
        (migration.apply)(entries);
    }

    entries.insert(keys::CONFIG_VERSION.to_string(), CURRENT_VERSION.to_string());
    MigrationOutcome::Migrated { from }
}

fn migrate_legacy_names(entries: &mut BTreeMap<String, String>) {
    rename_key(entries, keys::LEGACY_CONTAINERS_BASE, keys::HOMELAB_BASE_DIR);
    rename_key(entries, keys::LEGACY_SETUP_USER, keys::HOMELAB_USER);
}

/// Move `old` to `new`. An existing value under `new` wins and the legacy
/// value is dropped.
fn rename_key(entries: &mut BTreeMap<String, String>, old: &str, new: &str) {
    let Some(value) = entries.remove(old) else {
        return;
    };
    if entries.contains_key(new) {
        debug!(old, new, "Dropping legacy key, new key already set");
    } else {
        debug!(old, new, "Renaming legacy key");
        entries.insert(new.to_string(), value);
    }
}
