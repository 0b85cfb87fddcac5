//! Configuration module for Landform.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `landform.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    ExecutorConfig, LandformConfig, ProjectConfig, ProviderConfig, ProviderKind, ResourceDecl,
    RetryConfig, StateBackend, StateConfig,
};
pub use validator::{ConfigIssue, ConfigValidator, ValidationResult};
