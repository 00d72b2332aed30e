//! homelab-setup library
//!
//! State persistence and step orchestration for provisioning a single homelab
//! host: the key/value [`config::ConfigStore`], the completion
//! [`markers::MarkerStore`], the dry-run aware [`system`] gateways and the
//! [`orchestrator::Orchestrator`] that runs the fixed step pipeline.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod markers;
pub mod orchestrator;
pub mod process_guard;
pub mod progress;
pub mod prompt;
pub mod steps;
pub mod system;

pub use config::ConfigStore;
pub use context::{ContextOptions, SetupContext};
pub use error::{Result, SetupError};
pub use markers::{MarkerStore, StepStatus};
pub use orchestrator::{Orchestrator, RunAllOptions, RunSummary, RunTarget, StepOutcome};
pub use steps::{StepBody, StepContext, StepDescriptor, StepId, STEPS};
