//! CLI module for the Landform provisioner.
//!
//! This module provides the command-line interface for planning, applying
//! and inspecting resource graphs.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;
