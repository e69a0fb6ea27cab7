//! CLI command implementations
//!
//! This module contains the implementation of all CLI subcommands.

pub mod check_config;
pub mod command;
pub mod stream;

use gerrit_events_core::config::toml_config::{get_config_path, TomlConfig};
use gerrit_events_core::error::GerritError;
use std::path::Path;

/// Load the configuration from `path`, or from the default location
fn load(path: Option<&Path>) -> Result<TomlConfig, GerritError> {
    match path {
        Some(path) => TomlConfig::from_file(path),
        None => TomlConfig::from_file(&get_config_path()?),
    }
}
