//! Wiring from configuration to a ready controller.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use rewind_abstraction::ControlPlane;
use rewind_control_plane::NeonControlPlane;
use rewind_core::{
    CheckpointController, Config, Database, Maintenance, OperationUpdate, PostgresLiveDatabase,
    UpdateObserver,
};

/// Everything a command needs.
pub struct AppContext {
    pub controller: CheckpointController,
    pub maintenance: Maintenance,
    pub json: bool,
}

impl AppContext {
    /// Loads configuration and connects to the control plane and metadata
    /// database.
    pub fn load(config_path: Option<&Path>, json: bool) -> Result<Self> {
        let config =
            Config::discover_and_load(config_path).context("Failed to load configuration")?;
        let control_plane = build_control_plane(&config)?;

        let db = Database::open(&config.storage.path).with_context(|| {
            format!("Failed to open metadata database at {}", config.storage.path)
        })?;

        // Progress lines would corrupt JSON output.
        let observer = if json { None } else { Some(progress_observer()) };
        let controller = CheckpointController::from_config(
            &config,
            Arc::clone(&control_plane),
            Arc::new(PostgresLiveDatabase::new()),
            db,
            observer,
        );
        let maintenance = Maintenance::new(control_plane, controller.store().clone());

        Ok(Self { controller, maintenance, json })
    }
}

fn build_control_plane(config: &Config) -> Result<Arc<dyn ControlPlane>> {
    let Some(api_key) = config.control_plane.api_key.as_deref() else {
        bail!("Control plane API key not set (control_plane.api_key or NEON_API_KEY)");
    };
    let mut client = NeonControlPlane::with_api_key(api_key)?;
    if let Some(base_url) = &config.control_plane.base_url {
        client = client.with_base_url(base_url.as_str());
    }
    Ok(Arc::new(client))
}

fn progress_observer() -> UpdateObserver {
    Arc::new(|update: &OperationUpdate| {
        eprintln!("  {} {} {}", "…".dimmed(), update.operation_id.dimmed(), update.status);
    })
}
