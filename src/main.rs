//! homelab-setup - main entry point
//!
//! Wires the command line to the setup context and the step orchestrator.

use std::process::ExitCode;

use tracing::{debug, error, info, warn};

use homelab_setup::cli::{display_value, Cli, Commands, ConfigCommands};
use homelab_setup::context::{ContextOptions, SetupContext};
use homelab_setup::error::{Result, SetupError};
use homelab_setup::logging;
use homelab_setup::markers::StepStatus;
use homelab_setup::orchestrator::{Orchestrator, RunAllOptions, RunTarget, RunSummary};
use homelab_setup::process_guard::{self, CancellationToken};
use homelab_setup::steps::find_step;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init(cli.verbose);
    debug!("CLI arguments parsed");

    let token = CancellationToken::new();
    if let Err(e) = process_guard::install_signal_handlers(token.clone()) {
        warn!("Failed to install signal handlers: {}", e);
    }

    match dispatch(cli, token) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("✗ {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn dispatch(cli: Cli, token: CancellationToken) -> Result<()> {
    let ctx = SetupContext::open(ContextOptions {
        config_path: cli.config_file,
        marker_dir: cli.marker_dir,
        dry_run: cli.dry_run,
        non_interactive: cli.non_interactive,
    })?;
    if ctx.dry_run {
        info!("[DRY-RUN] No changes will be made to the system");
    }

    match cli.command {
        Commands::Run {
            target,
            skip_wireguard,
            force,
            seed,
        } => {
            let target: RunTarget = target.parse()?;
            let entries = seed.entries();
            if !entries.is_empty() {
                ctx.config.set_many(&entries)?;
                debug!(count = entries.len(), "Seeded configuration from flags");
            }

            let orchestrator = Orchestrator::with_default_bodies(ctx)
                .with_cancellation(token)
                .force_rerun(force);
            let summary = orchestrator.run_target(target, RunAllOptions { skip_wireguard })?;
            print_summary(&summary);
        }
        Commands::Status { json } => {
            let orchestrator = Orchestrator::new(ctx);
            let report = orchestrator.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for row in &report {
                    let optional = if row.optional { " (optional)" } else { "" };
                    println!("{} {:<20} {:<12}{}", row.status.symbol(), row.name, row.status.to_string(), optional);
                }
                if report.iter().all(|r| r.status == StepStatus::Completed) {
                    println!("\nAll steps complete.");
                }
            }
        }
        Commands::Reset { step, all } => reset(Orchestrator::new(ctx), step.as_deref(), all)?,
        Commands::Config { action } => config_command(&ctx, action)?,
        Commands::Markers => {
            println!("Marker directory: {}", ctx.markers.dir().display());
            let names = ctx.markers.list()?;
            if names.is_empty() {
                println!("  (none)");
            }
            for name in names {
                println!("  {}", name);
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for id in &summary.completed {
        println!("✓ {}", id.descriptor().name);
    }
    for id in &summary.skipped {
        println!("· {} (already complete)", id.descriptor().name);
    }
    for id in &summary.omitted {
        println!("· {} (skipped)", id.descriptor().name);
    }
}

fn reset(orchestrator: Orchestrator, step: Option<&str>, all: bool) -> Result<()> {
    let ctx = orchestrator.context();
    match (step, all) {
        (_, true) => {
            if ctx.dry_run {
                info!(dir = %ctx.markers.dir().display(), "[DRY-RUN] would remove all markers");
                return Ok(());
            }
            let removed = ctx.markers.remove_all()?;
            println!("✓ Removed {} marker(s)", removed);
        }
        (Some(name), false) => {
            let step = find_step(name)?;
            if ctx.dry_run {
                info!(marker = step.marker, "[DRY-RUN] would remove step markers");
                return Ok(());
            }
            orchestrator.reset_step(step)?;
            println!("✓ {} will run again", step.name);
        }
        (None, false) => return Err(SetupError::validation("reset needs --step <name> or --all")),
    }
    Ok(())
}

fn config_command(ctx: &SetupContext, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Get { key } => match ctx.config.get(&key) {
            Some(value) => println!("{}", value),
            None => return Err(SetupError::validation(format!("{} is not set", key))),
        },
        ConfigCommands::Set { key, value } => {
            ctx.config.set(&key, &value)?;
            println!("✓ {} saved", key);
        }
        ConfigCommands::Delete { key } => {
            ctx.config.delete(&key)?;
            println!("✓ {} removed", key);
        }
        ConfigCommands::List { show_secrets } => {
            println!("# {}", ctx.config.path().display());
            for (key, value) in ctx.config.all() {
                println!("{}={}", key, display_value(&key, &value, show_secrets));
            }
        }
    }
    Ok(())
}
