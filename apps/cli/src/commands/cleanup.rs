//! Bulk cleanup commands.

use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use colored::Colorize;
use rewind_core::CleanupReport;

use crate::context::AppContext;

/// Cleanup subcommands
#[derive(Subcommand, Debug)]
pub enum CleanupCommand {
    /// Delete every snapshot of a project
    Snapshots {
        /// Project reference (defaults to the owner's active project)
        #[arg(long)]
        project: Option<String>,
    },
    /// Delete every branch except one
    Branches {
        /// Project reference (defaults to the owner's active project)
        #[arg(long)]
        project: Option<String>,

        /// Branch name to keep
        #[arg(long, default_value = "production")]
        keep: String,
    },
    /// Delete every stored project, remotely and locally
    All,
}

/// Execute cleanup command
pub async fn execute(ctx: &AppContext, owner: &str, cmd: CleanupCommand) -> Result<()> {
    let report = match cmd {
        CleanupCommand::Snapshots { project } => {
            let project_ref = resolve_project(ctx, owner, project).await?;
            ctx.maintenance.purge_snapshots(&project_ref).await?
        }
        CleanupCommand::Branches { project, keep } => {
            let project_ref = resolve_project(ctx, owner, project).await?;
            ctx.maintenance.prune_branches(&project_ref, &keep).await?
        }
        CleanupCommand::All => ctx.maintenance.cleanup_all().await?,
    };

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn resolve_project(ctx: &AppContext, owner: &str, explicit: Option<String>) -> Result<String> {
    if let Some(project_ref) = explicit {
        return Ok(project_ref);
    }
    let project = ctx
        .controller
        .store()
        .get_latest_project_for_owner(owner)
        .await
        .context("Failed to read stored projects")?
        .ok_or_else(|| anyhow!("No project for {owner}; run 'rewind start' or pass --project"))?;
    Ok(project.external_ref)
}

fn print_report(report: &CleanupReport) {
    println!(
        "{} Deleted {} of {}",
        if report.is_clean() { "✓".green() } else { "!".yellow() },
        report.deleted.len(),
        report.attempted
    );
    for failure in &report.failures {
        println!("  {} {}: {}", "✗".red(), failure.id, failure.error);
    }
}
