//! Completion and failure markers.
//!
//! A marker is a zero-byte file in the marker directory. Its presence is the
//! only record that a step finished (`<name>`) or failed (`<name>-failed`).
//! Creation uses `O_CREAT | O_EXCL`, so when several invocations race on the
//! same marker exactly one of them observes `created == true`.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

use crate::error::{Result, SetupError};

/// Suffix appended to a step marker to record a failed run
pub const FAILED_SUFFIX: &str = "-failed";

/// Derived run state of a step, computed from its markers.
///
/// When both the completion and failure markers exist, `Failed` wins: the most
/// recent attempt is the one that failed, and a stale completion marker must not
/// hide that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    NotStarted,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "·",
            StepStatus::Completed => "✓",
            StepStatus::Failed => "✗",
        }
    }
}

/// Name of the failure marker paired with `name`
pub fn failure_marker_name(name: &str) -> String {
    format!("{}{}", name, FAILED_SUFFIX)
}

/// Reject names that could escape the marker directory.
pub fn validate_marker_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SetupError::validation("marker name cannot be empty"));
    }
    if name == "." || name == ".." {
        return Err(SetupError::validation(format!(
            "marker name cannot be '{}'",
            name
        )));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(SetupError::validation(format!(
            "marker name cannot contain path separators: {:?}",
            name
        )));
    }
    Ok(())
}

/// Filesystem-backed marker directory.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    /// Bind to `dir`. The directory is created on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of marker `name`, after validation.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_marker_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Create marker `name`. Succeeds whether or not it already existed.
    pub fn create(&self, name: &str) -> Result<()> {
        self.create_if_not_exists(name).map(|_| ())
    }

    /// Atomically create marker `name`.
    ///
    /// Returns `Ok(true)` if this call created it and `Ok(false)` if it was
    /// already present (including when another process won a race).
    pub fn create_if_not_exists(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        self.ensure_dir()?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!(marker = name, "Marker created");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(marker = name, "Marker already present");
                Ok(false)
            }
            Err(e) => Err(SetupError::io(&path, e)),
        }
    }

    /// Whether marker `name` exists.
    ///
    /// An error means the answer could not be determined (for example a
    /// permission problem on the directory) and must not be read as `false`.
    pub fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        path.try_exists().map_err(|e| SetupError::io(&path, e))
    }

    /// Remove marker `name`. Removing an absent marker is not an error.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(marker = name, "Marker removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SetupError::io(&path, e)),
        }
    }

    /// Sorted names of every marker in the directory.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SetupError::io(&self.dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SetupError::io(&self.dir, e))?;
            let file_type = entry.file_type().map_err(|e| SetupError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove every marker, returning how many were deleted.
    pub fn remove_all(&self) -> Result<usize> {
        let names = self.list()?;
        for name in &names {
            self.remove(name)?;
        }
        info!(count = names.len(), dir = %self.dir.display(), "Removed all markers");
        Ok(names.len())
    }

    /// Record that the step owning marker `name` failed.
    pub fn mark_failed(&self, name: &str) -> Result<()> {
        validate_marker_name(name)?;
        self.create(&failure_marker_name(name))
    }

    pub fn clear_failure(&self, name: &str) -> Result<()> {
        validate_marker_name(name)?;
        self.remove(&failure_marker_name(name))
    }

    pub fn is_failed(&self, name: &str) -> Result<bool> {
        validate_marker_name(name)?;
        self.exists(&failure_marker_name(name))
    }

    /// Derived status of marker `name`; a failure marker takes precedence.
    pub fn status(&self, name: &str) -> Result<StepStatus> {
        if self.is_failed(name)? {
            return Ok(StepStatus::Failed);
        }
        if self.exists(name)? {
            return Ok(StepStatus::Completed);
        }
        Ok(StepStatus::NotStarted)
    }

    /// Whether `canonical` should count as complete, migrating a legacy alias
    /// into the canonical name on first observation.
    ///
    /// Only the call that wins the exclusive create of the canonical marker
    /// removes the legacy alias. A failed removal is logged and ignored since
    /// the canonical marker is already durable.
    pub fn ensure_canonical(&self, canonical: &str, legacy: &[&str]) -> Result<bool> {
        if self.exists(canonical)? {
            return Ok(true);
        }

        for alias in legacy {
            if alias.is_empty() || *alias == canonical {
                continue;
            }
            if !self.exists(alias)? {
                continue;
            }

            if self.create_if_not_exists(canonical)? {
                info!(legacy = *alias, canonical, "Migrated legacy marker");
                if let Err(e) = self.remove(alias) {
                    warn!(legacy = *alias, error = %e, "Could not remove legacy marker");
                }
            }
            return Ok(true);
        }

        Ok(false)
    }

    fn ensure_dir(&self) -> Result<()> {
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&self.dir)
            .map_err(|e| SetupError::io(&self.dir, e))
    }
}
