//! Error handling for homelab-setup
//!
//! Provides the typed error taxonomy shared by the stores, the system gateway
//! and the orchestrator. Step bodies are thin wrappers around OS tools and
//! return `anyhow::Result`; their errors are folded into [`SetupError::Step`].

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for homelab-setup
#[derive(Error, Debug)]
pub enum SetupError {
    /// Bad marker or key names, path traversal attempts, malformed values.
    /// Always raised before any I/O happens.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Disk, permission or path errors, with the path that was being accessed
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A wrapped system command exited unsuccessfully
    #[error("Command `{command}` failed ({status}): {stderr}")]
    ExternalCommand {
        command: String,
        status: String,
        stderr: String,
    },

    /// A required configuration value is missing and was not supplied
    #[error("missing {description} ({hint})")]
    MissingConfig {
        key: String,
        description: String,
        hint: String,
    },

    /// The requested step short name is not in the registry
    #[error("Unknown step: {0} (expected one of: preflight, user, directory, wireguard, nfs, container, deployment)")]
    UnknownStep(String),

    /// A step body failed; the failure marker was recorded at `marker_path`.
    /// `None` when nothing was written (dry-run).
    #[error("Step '{step}' failed: {source}{}", rerun_hint(marker_path.as_deref()))]
    StepFailed {
        step: String,
        marker_path: Option<PathBuf>,
        #[source]
        source: Box<SetupError>,
    },

    /// Error raised inside a step body
    #[error("{0:#}")]
    Step(anyhow::Error),

    /// Reading an answer from the terminal failed
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// A signal asked the orchestrator to stop between steps
    #[error("Cancelled by signal; the pipeline stopped after the last finished step")]
    Cancelled,

    /// JSON serialization errors (status reports)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn rerun_hint(marker_path: Option<&Path>) -> String {
    match marker_path {
        Some(path) => format!("\n  To force a clean re-run later, remove: {}", path.display()),
        None => String::new(),
    }
}

/// Result type alias for homelab-setup operations
pub type Result<T> = std::result::Result<T, SetupError>;

impl SetupError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a prompt error
    pub fn prompt(msg: impl Into<String>) -> Self {
        Self::Prompt(msg.into())
    }

    /// Process exit code for this error (130 mirrors the shell convention for SIGINT)
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Cancelled => 130,
            Self::StepFailed { source, .. } if matches!(**source, Self::Cancelled) => 130,
            _ => 1,
        }
    }
}

impl From<anyhow::Error> for SetupError {
    fn from(err: anyhow::Error) -> Self {
        // Unwrap typed errors that were only boxed into anyhow without extra context
        if err.chain().count() == 1 && err.is::<SetupError>() {
            match err.downcast::<SetupError>() {
                Ok(inner) => inner,
                Err(err) => Self::Step(err),
            }
        } else {
            Self::Step(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SetupError::validation("marker name cannot be empty");
        assert_eq!(err.to_string(), "Validation error: marker name cannot be empty");

        let err = SetupError::MissingConfig {
            key: "NFS_SERVER".to_string(),
            description: "NFS server address".to_string(),
            hint: "set via --nfs-server or config key NFS_SERVER".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing NFS server address (set via --nfs-server or config key NFS_SERVER)"
        );
    }

    #[test]
    fn test_io_error_keeps_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SetupError::io("/srv/containers", io_err);
        assert!(matches!(err, SetupError::Io { .. }));
        assert!(err.to_string().contains("/srv/containers"));
    }

    #[test]
    fn test_step_failed_mentions_marker_path() {
        let err = SetupError::StepFailed {
            step: "nfs".to_string(),
            marker_path: Some(PathBuf::from("/home/core/.local/homelab-setup/nfs-setup-complete-failed")),
            source: Box::new(SetupError::validation("boom")),
        };
        let msg = err.to_string();
        assert!(msg.contains("Step 'nfs' failed"));
        assert!(msg.contains("nfs-setup-complete-failed"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_step_failed_without_marker_has_no_removal_hint() {
        let err = SetupError::StepFailed {
            step: "nfs".to_string(),
            marker_path: None,
            source: Box::new(SetupError::validation("boom")),
        };
        assert_eq!(err.to_string(), "Step 'nfs' failed: Validation error: boom");
    }

    #[test]
    fn test_anyhow_round_trip_unwraps_plain_setup_errors() {
        let wrapped = anyhow::Error::new(SetupError::Cancelled);
        let err: SetupError = wrapped.into();
        assert!(matches!(err, SetupError::Cancelled));
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_anyhow_with_context_stays_step_error() {
        let wrapped = anyhow::Error::new(SetupError::Cancelled).context("while deploying");
        let err: SetupError = wrapped.into();
        assert!(matches!(err, SetupError::Step(_)));
        assert!(err.to_string().starts_with("while deploying"));
    }
}
