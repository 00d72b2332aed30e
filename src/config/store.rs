//! Persistent key/value configuration store.
//!
//! Backed by a flat `KEY=VALUE` file (mode 0600). Every mutation rewrites the
//! whole file atomically: the new content goes to a temporary file in the same
//! directory, is flushed to disk, then renamed over the original. Readers in
//! other processes therefore see either the old or the new file, never a
//! partial one.
//!
//! Within a process the in-memory map sits behind a reader/writer lock. A
//! writer holds the lock across both the map mutation and the file rewrite, so
//! the map never runs ahead of what is durable.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::keys;
use super::migrate::{self, MigrationOutcome};
use crate::error::{Result, SetupError};

/// File mode for the config file and its temporary siblings
const CONFIG_FILE_MODE: u32 = 0o600;

const FILE_HEADER: &str = "\
# homelab-setup configuration
# KEY=VALUE, one entry per line. Lines starting with '#' are ignored.
# This file is rewritten on every change; unknown keys are preserved.
";

/// Key/value configuration with defaults, migrations and atomic persistence.
pub struct ConfigStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may hold passwords; only show the shape
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("entries", &self.read_entries().len())
            .finish()
    }
}

impl ConfigStore {
    /// Create an empty store bound to `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a store bound to `path` and load it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// (Re)read the backing file, replacing the in-memory entries.
    ///
    /// A missing file yields an empty store. Malformed lines are logged and
    /// skipped. If the stored `CONFIG_VERSION` is older than the current schema,
    /// migrations run and the upgraded file is persisted before this returns.
    ///
    /// # Errors
    ///
    /// - `Io` if the file exists but cannot be read (permissions, invalid UTF-8)
    /// - `Io` if a migrated file cannot be written back
    pub fn load(&self) -> Result<()> {
        let mut entries = self.write_entries();

        let (mut loaded, existed) = match fs::read_to_string(&self.path) {
            Ok(contents) => (parse(&contents), true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Config file not found, starting empty");
                (BTreeMap::new(), false)
            }
            Err(e) => return Err(SetupError::io(&self.path, e)),
        };

        let outcome = migrate::run(&mut loaded);
        if existed {
            if let MigrationOutcome::Migrated { from } = outcome {
                write_atomic(&self.path, &render(&loaded))?;
                info!(
                    path = %self.path.display(),
                    from,
                    to = migrate::CURRENT_VERSION,
                    "Config migrated"
                );
            }
        }

        debug!(path = %self.path.display(), entries = loaded.len(), "Config loaded");
        *entries = loaded;
        Ok(())
    }

    /// Stored value for `key`. Does not consult defaults.
    pub fn get(&self, key: &str) -> Option<String> {
        self.read_entries().get(key).cloned()
    }

    /// Resolve `key`: stored value, then the built-in default, then `fallback`.
    pub fn get_or_default(&self, key: &str, fallback: &str) -> String {
        if let Some(value) = self.get(key) {
            return value;
        }
        keys::default_for(key).unwrap_or(fallback).to_string()
    }

    /// Resolve `key` as an integer, falling back when absent or unparseable.
    pub fn get_int(&self, key: &str, fallback: i64) -> i64 {
        self.get_or_default(key, "")
            .trim()
            .parse()
            .unwrap_or(fallback)
    }

    /// Resolve `key` as a boolean (`true/yes/1/on`, `false/no/0/off`).
    pub fn get_bool(&self, key: &str, fallback: bool) -> bool {
        match self.get_or_default(key, "").trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => true,
            "false" | "no" | "0" | "off" => false,
            _ => fallback,
        }
    }

    /// Whether `key` has a stored value
    pub fn exists(&self, key: &str) -> bool {
        self.read_entries().contains_key(key)
    }

    /// Snapshot of every stored entry
    pub fn all(&self) -> BTreeMap<String, String> {
        self.read_entries().clone()
    }

    /// Store `value` under `key` and persist atomically.
    ///
    /// On a write failure the in-memory map is restored, so it keeps matching
    /// the file on disk.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(key, value)?;

        let mut entries = self.write_entries();
        let previous = entries.insert(key.to_string(), value.to_string());

        if let Err(err) = write_atomic(&self.path, &render(&entries)) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(err);
        }

        debug!(key, "Config value set");
        Ok(())
    }

    /// Store several entries with a single atomic rewrite.
    pub fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        for (key, value) in pairs {
            validate_key(key)?;
            validate_value(key, value)?;
        }
        if pairs.is_empty() {
            return Ok(());
        }

        let mut entries = self.write_entries();
        let snapshot = entries.clone();
        for (key, value) in pairs {
            entries.insert((*key).to_string(), (*value).to_string());
        }

        if let Err(err) = write_atomic(&self.path, &render(&entries)) {
            *entries = snapshot;
            return Err(err);
        }

        debug!(count = pairs.len(), "Config values set");
        Ok(())
    }

    /// Remove `key` and persist atomically. Removing an absent key is a no-op.
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let mut entries = self.write_entries();
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };

        if let Err(err) = write_atomic(&self.path, &render(&entries)) {
            entries.insert(key.to_string(), previous);
            return Err(err);
        }

        debug!(key, "Config value deleted");
        Ok(())
    }

    /// Drop every entry and delete the backing file.
    pub fn reset(&self) -> Result<()> {
        let mut entries = self.write_entries();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SetupError::io(&self.path, e)),
        }
        entries.clear();
        entries.insert(
            keys::CONFIG_VERSION.to_string(),
            migrate::CURRENT_VERSION.to_string(),
        );
        info!(path = %self.path.display(), "Config reset");
        Ok(())
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        // A writer that panics mid-update leaves at most an entry that was
        // never persisted; the map itself is still usable
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reject keys that could not be stored or read back unambiguously.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SetupError::validation("config key cannot be empty"));
    }
    if key.starts_with('#') {
        return Err(SetupError::validation(format!(
            "config key cannot start with '#': {}",
            key
        )));
    }
    if key.contains('=') || key.chars().any(char::is_whitespace) {
        return Err(SetupError::validation(format!(
            "config key cannot contain '=' or whitespace: {:?}",
            key
        )));
    }
    Ok(())
}

/// Values are stored verbatim on a single line.
pub fn validate_value(key: &str, value: &str) -> Result<()> {
    if value.contains('\n') || value.contains('\r') {
        return Err(SetupError::validation(format!(
            "value for {} cannot contain line breaks",
            key
        )));
    }
    Ok(())
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are ignored; lines
/// without `=` or with an empty key are logged and skipped. Values are taken
/// verbatim after the first `=`. A later duplicate key wins.
pub fn parse(contents: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            warn!(line = index + 1, "Skipping malformed config line (no '=')");
            continue;
        };
        let key = key.trim();
        if validate_key(key).is_err() {
            warn!(line = index + 1, "Skipping malformed config line (bad key)");
            continue;
        }

        entries.insert(key.to_string(), value.to_string());
    }

    entries
}

/// Render entries in the on-disk format.
pub fn render(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::from(FILE_HEADER);
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Replace `path` with `contents` via temp file + rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let staged = stage(path, contents)?;
    commit(&staged, path)
}

/// First half of an atomic write: durable temp file next to `path`.
pub(crate) fn stage(path: &Path, contents: &str) -> Result<PathBuf> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent).map_err(|e| SetupError::io(parent, e))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| SetupError::validation(format!("config path has no file name: {}", path.display())))?;
    let tmp_path = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    let result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(CONFIG_FILE_MODE)
            .open(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(SetupError::io(&tmp_path, e));
    }
    Ok(tmp_path)
}

/// Second half of an atomic write: rename the staged file over `path`.
pub(crate) fn commit(staged: &Path, path: &Path) -> Result<()> {
    if let Err(e) = fs::rename(staged, path) {
        let _ = fs::remove_file(staged);
        return Err(SetupError::io(path, e));
    }

    // Persist the rename itself; failure here does not undo the new content
    if let Err(e) = File::open(parent_dir(path)).and_then(|dir| dir.sync_all()) {
        debug!(error = %e, "Could not fsync config directory");
    }
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
