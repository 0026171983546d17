//! Checkpoint history commands: start, goto, next, refresh and timeline.

use anyhow::{Context, Result};
use colored::Colorize;
use rewind_core::{Checkpoint, Timeline};

use crate::context::AppContext;

fn prompt_label(checkpoint: &Checkpoint) -> &str {
    if checkpoint.prompt.is_empty() { "(bootstrap)" } else { &checkpoint.prompt }
}

fn print_checkpoint(ctx: &AppContext, heading: &str, checkpoint: &Checkpoint) -> Result<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(checkpoint)?);
        return Ok(());
    }
    println!("{} {}", "✓".green(), heading.bold());
    println!("  Checkpoint: {}", checkpoint.id.cyan());
    println!("  Prompt:     {}", prompt_label(checkpoint));
    println!("  Snapshot:   {}", checkpoint.snapshot_id);
    Ok(())
}

pub async fn start(ctx: &AppContext, owner: &str) -> Result<()> {
    let checkpoint = ctx
        .controller
        .start_or_reset_project(owner)
        .await
        .with_context(|| format!("Failed to start project for {owner}"))?;
    print_checkpoint(ctx, "Project started", &checkpoint)
}

pub async fn goto(ctx: &AppContext, owner: &str, checkpoint_id: &str) -> Result<()> {
    let checkpoint = ctx
        .controller
        .advance_to(owner, checkpoint_id)
        .await
        .with_context(|| format!("Failed to restore checkpoint {checkpoint_id}"))?;
    print_checkpoint(ctx, "Restored checkpoint", &checkpoint)
}

pub async fn next(ctx: &AppContext, owner: &str, current_id: &str, step: Option<&str>) -> Result<()> {
    let result = match step {
        Some(step_id) => ctx.controller.advance_along(owner, current_id, step_id).await,
        None => ctx.controller.advance_to_next(owner, current_id).await,
    };
    let checkpoint = result.with_context(|| format!("Failed to advance from {current_id}"))?;
    print_checkpoint(ctx, "Advanced", &checkpoint)
}

pub async fn refresh(ctx: &AppContext, owner: &str, checkpoint_id: &str) -> Result<()> {
    let checkpoint = ctx
        .controller
        .refresh_snapshot(owner, checkpoint_id)
        .await
        .with_context(|| format!("Failed to refresh checkpoint {checkpoint_id}"))?;
    print_checkpoint(ctx, "Snapshot refreshed", &checkpoint)
}

pub async fn timeline(ctx: &AppContext, owner: &str, current_id: Option<&str>) -> Result<()> {
    let timeline = ctx
        .controller
        .timeline(owner, current_id)
        .await
        .with_context(|| format!("Failed to load timeline for {owner}"))?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&timeline)?);
    } else {
        print_timeline(&timeline);
    }
    Ok(())
}

fn print_timeline(timeline: &Timeline) {
    println!("{} {}", "Project".bold(), timeline.project.external_ref.cyan());
    println!();
    for (index, checkpoint) in timeline.checkpoints.iter().enumerate() {
        let marker = if index == timeline.current_index { "▶".green() } else { " ".normal() };
        println!(
            "{} {:>2}  {:<40} {}",
            marker,
            index,
            prompt_label(checkpoint),
            checkpoint.id.dimmed()
        );
    }
    println!();
    match (&timeline.next_step, timeline.has_next_checkpoint) {
        (_, true) => println!("Next: restores the existing checkpoint"),
        (Some(step), false) => println!("Next: runs step {} ({})", step.id.bold(), step.prompt_text()),
        (None, false) => println!("Next: {}", "end of script".dimmed()),
    }
}
