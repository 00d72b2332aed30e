//! Step orchestration
//!
//! Drives the fixed pipeline against the marker store. Each step moves through
//!
//! ```text
//! NotStarted --ok--> Completed       NotStarted --err--> Failed
//! Failed     --ok--> Completed       Failed     --err--> Failed
//! Completed  --forced re-run ok--> Completed
//! Completed  --forced re-run err--> Failed
//! ```
//!
//! On success the failure marker is cleared before the completion marker is
//! written; on error the failure marker is (re)asserted and the error is
//! returned with the path of that marker.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::SetupContext;
use crate::error::{Result, SetupError};
use crate::markers::{failure_marker_name, StepStatus};
use crate::process_guard::CancellationToken;
use crate::steps::{self, find_step, require_value, StepBody, StepDescriptor, StepId, STEPS};

/// What `run` was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTarget {
    All,
    /// Every step except the optional ones
    Quick,
    Step(StepId),
}

impl FromStr for RunTarget {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(RunTarget::All),
            "quick" => Ok(RunTarget::Quick),
            other => find_step(other).map(|d| RunTarget::Step(d.id)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepOutcome {
    Completed,
    /// Already complete and not re-run
    Skipped,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunAllOptions {
    pub skip_wireguard: bool,
}

/// Result of a pipeline run that did not fail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: Vec<StepId>,
    pub skipped: Vec<StepId>,
    /// Optional steps left out by the run options
    pub omitted: Vec<StepId>,
}

/// One row of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub name: &'static str,
    pub description: &'static str,
    pub marker: &'static str,
    pub optional: bool,
    pub status: StepStatus,
}

pub struct Orchestrator {
    ctx: SetupContext,
    bodies: HashMap<StepId, Box<dyn StepBody>>,
    cancel: CancellationToken,
    force: bool,
}

impl Orchestrator {
    /// An orchestrator with no step bodies registered.
    pub fn new(ctx: SetupContext) -> Self {
        Orchestrator {
            ctx,
            bodies: HashMap::new(),
            cancel: CancellationToken::new(),
            force: false,
        }
    }

    pub fn with_default_bodies(ctx: SetupContext) -> Self {
        let mut orchestrator = Self::new(ctx);
        orchestrator.bodies = steps::default_bodies();
        orchestrator
    }

    /// Replace the body behind `id`.
    pub fn register(mut self, id: StepId, body: Box<dyn StepBody>) -> Self {
        self.bodies.insert(id, body);
        self
    }

    /// Stop before the next step once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Re-run completed steps without asking.
    pub fn force_rerun(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn context(&self) -> &SetupContext {
        &self.ctx
    }

    /// Current state of `step`. Outside dry-run a legacy completion marker is
    /// migrated to the canonical name here.
    pub fn step_status(&self, step: &StepDescriptor) -> Result<StepStatus> {
        let markers = &self.ctx.markers;
        if markers.is_failed(step.marker)? {
            return Ok(StepStatus::Failed);
        }

        let completed = if self.ctx.dry_run {
            let mut found = markers.exists(step.marker)?;
            for alias in step.legacy_markers {
                found = found || markers.exists(alias)?;
            }
            found
        } else {
            markers.ensure_canonical(step.marker, step.legacy_markers)?
        };

        Ok(if completed {
            StepStatus::Completed
        } else {
            StepStatus::NotStarted
        })
    }

    pub fn status(&self) -> Result<Vec<StepReport>> {
        STEPS
            .iter()
            .map(|step| {
                Ok(StepReport {
                    step: step.short_name(),
                    name: step.name,
                    description: step.description,
                    marker: step.marker,
                    optional: step.optional,
                    status: self.step_status(step)?,
                })
            })
            .collect()
    }

    pub fn run_named(&self, short_name: &str) -> Result<StepOutcome> {
        self.run_step(find_step(short_name)?)
    }

    pub fn run_target(&self, target: RunTarget, options: RunAllOptions) -> Result<RunSummary> {
        match target {
            RunTarget::All => self.run_all(options),
            RunTarget::Quick => self.run_all(RunAllOptions {
                skip_wireguard: true,
                ..options
            }),
            RunTarget::Step(id) => {
                let mut summary = RunSummary::default();
                match self.run_step(id.descriptor())? {
                    StepOutcome::Completed => summary.completed.push(id),
                    StepOutcome::Skipped => summary.skipped.push(id),
                }
                Ok(summary)
            }
        }
    }

    /// Run every step in order, stopping at the first failure.
    pub fn run_all(&self, options: RunAllOptions) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for step in STEPS {
            if step.id == StepId::Wireguard && options.skip_wireguard {
                info!(step = step.name, "Skipping optional step");
                summary.omitted.push(step.id);
                continue;
            }
            match self.run_step(step)? {
                StepOutcome::Completed => summary.completed.push(step.id),
                StepOutcome::Skipped => summary.skipped.push(step.id),
            }
        }
        info!(
            completed = summary.completed.len(),
            skipped = summary.skipped.len(),
            "Setup pipeline finished"
        );
        Ok(summary)
    }

    pub fn run_step(&self, step: &StepDescriptor) -> Result<StepOutcome> {
        if self.cancel.is_cancelled() {
            return Err(SetupError::Cancelled);
        }

        if self.step_status(step)? == StepStatus::Completed {
            if !self.should_rerun(step)? {
                info!(step = step.name, marker = step.marker, "Already completed, skipping");
                return Ok(StepOutcome::Skipped);
            }
            if self.ctx.dry_run {
                info!(marker = step.marker, "[DRY-RUN] would remove completion marker");
            } else {
                self.ctx.markers.remove(step.marker)?;
            }
        }

        info!(step = step.name, "{}", step.description);
        match self.execute(step) {
            Ok(()) => {
                self.record_success(step)?;
                info!(step = step.name, "Step completed");
                Ok(StepOutcome::Completed)
            }
            Err(err) => {
                self.record_failure(step);
                error!(step = step.name, error = %err, "Step failed");
                let marker_path = if self.ctx.dry_run {
                    None
                } else {
                    Some(self.ctx.markers.path_for(&failure_marker_name(step.marker))?)
                };
                Err(SetupError::StepFailed {
                    step: step.short_name(),
                    marker_path,
                    source: Box::new(err),
                })
            }
        }
    }

    /// Remove every marker belonging to `step`.
    pub fn reset_step(&self, step: &StepDescriptor) -> Result<()> {
        let markers = &self.ctx.markers;
        markers.remove(step.marker)?;
        markers.clear_failure(step.marker)?;
        for alias in step.legacy_markers {
            markers.remove(alias)?;
        }
        info!(step = step.name, "Markers reset");
        Ok(())
    }

    fn should_rerun(&self, step: &StepDescriptor) -> Result<bool> {
        if self.force {
            return Ok(true);
        }
        let prompter = self.ctx.prompter.as_ref();
        if !prompter.is_interactive() {
            return Ok(false);
        }
        prompter.confirm(&format!("{} is already complete. Run it again?", step.name), false)
    }

    fn execute(&self, step: &StepDescriptor) -> Result<()> {
        for key in step.required_config {
            require_value(&self.ctx.config, self.ctx.prompter.as_ref(), key)?;
        }
        let body = self
            .bodies
            .get(&step.id)
            .ok_or_else(|| SetupError::validation(format!("no body registered for step '{}'", step.id)))?;
        body.run(&self.ctx.step_context()).map_err(SetupError::from)
    }

    fn record_success(&self, step: &StepDescriptor) -> Result<()> {
        if self.ctx.dry_run {
            info!(marker = step.marker, "[DRY-RUN] would create marker");
            return Ok(());
        }
        self.ctx.markers.clear_failure(step.marker)?;
        self.ctx.markers.create(step.marker)
    }

    /// The step's own error is what the caller needs to see, so a failure to
    /// write the failure marker is only logged.
    fn record_failure(&self, step: &StepDescriptor) {
        if self.ctx.dry_run {
            info!(marker = %failure_marker_name(step.marker), "[DRY-RUN] would create marker");
            return;
        }
        if let Err(e) = self.ctx.markers.mark_failed(step.marker) {
            warn!(step = step.name, error = %e, "Could not record failure marker");
        }
    }
}
