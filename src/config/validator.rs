//! Configuration validation.
//!
//! Checks names, state backend settings and executor bounds before any
//! resource is modeled. Graph-level problems (dangling references, cycles,
//! unknown types) are left to the graph builder.

use crate::error::{ConfigError, Result};
use crate::model::ResourceId;
use crate::registry::Registry;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    ExecutorConfig, LandformConfig, ProjectConfig, ProviderConfig, ProviderKind, ResourceDecl,
    StateBackend, StateConfig,
};

/// Upper bound of `executor.concurrency`.
const MAX_CONCURRENCY: usize = 64;

/// Validator for configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all issues found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ConfigIssue>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ConfigIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found, if any.
    pub fn validate(&self, config: &LandformConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(ConfigError::invalid(first_error.message.clone(), first_error.field.clone()).into());
        }

        debug!(
            "Configuration validation passed with {} warning(s)",
            result.warning_count()
        );
        Ok(result)
    }

    /// Collects every issue without failing.
    #[must_use]
    pub fn check(&self, config: &LandformConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_provider(&config.provider, &mut result);
        Self::validate_executor(&config.executor, &mut result);
        Self::validate_types(config, &mut result);
        Self::validate_resources(&config.resources, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        } else if !is_valid_name(&project.environment) {
            result.error(
                "project.environment",
                format!("Environment '{}' is invalid", project.environment),
            );
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error("state.bucket", "S3 bucket name is required when using S3 backend");
                }
                if state.path.is_some() {
                    result.warn("state.path is ignored by the S3 backend");
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result.warn("state.bucket is ignored by the local backend");
                }
            }
        }
    }

    fn validate_provider(provider: &ProviderConfig, result: &mut ValidationResult) {
        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Provider timeout must be at least 1 second");
        }

        match provider.kind {
            ProviderKind::Http => {
                match provider.endpoint.as_deref() {
                    None | Some("") => {
                        result.error("provider.endpoint", "An endpoint is required for the http provider");
                    }
                    Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
                        result.error(
                            "provider.endpoint",
                            format!("Endpoint '{endpoint}' must be an http(s) URL"),
                        );
                    }
                    Some(_) => {}
                }
                if provider.token_env.is_none() {
                    result.warn("provider.token_env is not set; requests will be unauthenticated");
                }
            }
            ProviderKind::Sandbox => {
                if provider.endpoint.is_some() {
                    result.warn("provider.endpoint is ignored by the sandbox provider");
                }
            }
        }
    }

    fn validate_executor(executor: &ExecutorConfig, result: &mut ValidationResult) {
        if executor.concurrency == 0 {
            result.error("executor.concurrency", "Concurrency must be at least 1");
        } else if executor.concurrency > MAX_CONCURRENCY {
            result.error(
                "executor.concurrency",
                format!("Concurrency {} exceeds the maximum of {MAX_CONCURRENCY}", executor.concurrency),
            );
        }

        let retry = &executor.retry;
        if retry.max_attempts == 0 {
            result.error("executor.retry.max_attempts", "At least one attempt is required");
        }
        if retry.multiplier < 1.0 {
            result.error("executor.retry.multiplier", "Backoff multiplier must be at least 1.0");
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            result.error(
                "executor.retry.initial_delay_ms",
                "Initial delay cannot exceed max_delay_ms",
            );
        }
    }

    fn validate_types(config: &LandformConfig, result: &mut ValidationResult) {
        let builtin = Registry::builtin();
        let mut seen = HashSet::new();

        for (i, descriptor) in config.types.iter().enumerate() {
            if ResourceId::try_new(&descriptor.name, "x").is_err() {
                result.error(
                    format!("types[{i}].name"),
                    format!("Type name '{}' is invalid", descriptor.name),
                );
            }
            if !seen.insert(&descriptor.name) {
                result.error(
                    format!("types[{i}].name"),
                    format!("Duplicate type descriptor: {}", descriptor.name),
                );
            }
            if builtin.contains(&descriptor.name) {
                result.warn(format!("types[{i}]: overrides built-in type {}", descriptor.name));
            }
        }
    }

    fn validate_resources(resources: &[ResourceDecl], result: &mut ValidationResult) {
        if resources.is_empty() {
            result.warn("No resources defined in configuration");
            return;
        }

        for (i, decl) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if let Err(message) = decl.id() {
                result.error(format!("{prefix}.name"), message);
                continue;
            }

            for (j, dep) in decl.depends_on.iter().enumerate() {
                if dep.parse::<ResourceId>().is_err() {
                    result.error(
                        format!("{prefix}.depends_on[{j}]"),
                        format!("'{dep}' is not a resource id (expected type.name)"),
                    );
                }
            }

            for (name, value) in &decl.attributes {
                if value.has_embedded_template() {
                    result.warn(format!(
                        "{prefix}.attributes.{name}: '${{...}}' inside a longer string is kept literally; \
                         only a whole-string reference is resolved"
                    ));
                }
            }

            if decl.lifecycle.create_before_destroy && decl.lifecycle.prevent_destroy {
                result.warn(format!(
                    "{prefix}: prevent_destroy forbids the replacement create_before_destroy would perform"
                ));
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
