//! Storage layer for Rewind Core.
//!
//! This module provides persistence for projects and checkpoints using SQLite
//! with the Repository pattern.

// SQL strings don't need hash-less raw strings
#![allow(clippy::needless_raw_string_hashes)]

pub mod database;
pub mod error;
pub mod repositories;

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use repositories::{
    CheckpointRepository, ProjectRepository, SqliteCheckpointRepository, SqliteProjectRepository,
};
