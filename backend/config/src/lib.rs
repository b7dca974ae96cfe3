//! `talentforge-config` — TalentForge runtime configuration management.
//!
//! Provides:
//! - Typed config schema (database, scheduler, pipeline, logging)
//! - YAML read/write with atomic backup rotation
//! - Default value application

pub mod defaults;
pub mod io;
pub mod schema;

pub use defaults::apply_all_defaults;
pub use io::{config_dir, config_file_path, database_path, load_config, write_config};
pub use schema::TalentForgeConfig;

use anyhow::Result;
use std::path::Path;

/// Load a config file and apply defaults.
///
/// This is the main entry point for loading a config at runtime.
pub async fn load_and_prepare(path: &Path) -> Result<TalentForgeConfig> {
    let config = load_config(path).await?;
    Ok(apply_all_defaults(config))
}
