//! Error types for the Landform provisioner.
//!
//! The hierarchy mirrors the phases of a run: configuration loading,
//! validation of the declared graph, provider calls, per-action failures and
//! state persistence. Validation errors abort a run before any mutation;
//! action failures are contained to their dependency subtree by the executor.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit code for a fully applied run or a clean plan.
pub const EXIT_OK: u8 = 0;

/// Exit code for a partial failure (some resources blocked, failed or cancelled).
pub const EXIT_PARTIAL: u8 = 1;

/// Exit code for a validation error (cycle, bad reference, `prevent_destroy`).
pub const EXIT_VALIDATION: u8 = 2;

/// The main error type for Landform.
#[derive(Debug, Error)]
pub enum LandformError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The declared resources do not form a valid plan input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors surfaced outside of action execution.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// An action failed after exhausting its retries.
    #[error("{0}")]
    Action(#[from] ActionFailed),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}")]
    InvalidValue {
        /// Description of the problem.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors in the declared resource graph, detected before any provider call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The dependency graph contains a cycle.
    #[error("Cyclic dependency: {}", chain.join(" -> "))]
    CyclicDependency {
        /// Resources forming the cycle, first element repeated at the end.
        chain: Vec<String>,
    },

    /// A reference or `depends_on` entry names an undeclared resource.
    #[error("Resource {from} references undeclared resource {to}")]
    DanglingReference {
        /// Referencing resource.
        from: String,
        /// Missing target.
        to: String,
    },

    /// A reference names an attribute the target neither declares nor exports.
    #[error("Resource {from} references unknown attribute '{attribute}' of {to}")]
    UnresolvableReference {
        /// Referencing resource.
        from: String,
        /// Referenced resource.
        to: String,
        /// Missing attribute.
        attribute: String,
    },

    /// No descriptor is registered for a resource type.
    #[error("Unknown resource type '{resource_type}' (declared by {resource})")]
    UnknownResourceType {
        /// The unknown type.
        resource_type: String,
        /// Resource declaring it.
        resource: String,
    },

    /// Two declarations share the same identity.
    #[error("Duplicate resource declaration: {resource}")]
    DuplicateResource {
        /// The duplicated identity.
        resource: String,
    },

    /// The plan would destroy a resource protected by `prevent_destroy`.
    #[error("Resource {resource} has prevent_destroy set but the plan would {action} it")]
    PreventDestroy {
        /// Protected resource.
        resource: String,
        /// Action that would destroy it (destroy or replace).
        action: String,
    },

    /// Steps remained after ordering; indicates a lifecycle-expansion bug.
    #[error("Unable to order actions, unresolved steps: {}", remaining.join(", "))]
    UnresolvableOrder {
        /// Steps that could not be ordered.
        remaining: Vec<String>,
    },
}

/// Category of a transient provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// The provider asked us to slow down.
    Throttled {
        /// Provider-suggested delay, if any.
        retry_after: Option<Duration>,
    },
    /// Connection reset, timeout or gateway failure.
    Network,
}

/// Category of a fatal provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The request carried an invalid parameter.
    InvalidParameter,
    /// The caller is not allowed to perform the operation.
    PermissionDenied,
    /// An account quota would be exceeded.
    QuotaExceeded,
    /// The operation conflicts with the object's current state.
    Conflict,
    /// Any other non-retryable failure.
    Other,
}

/// Errors returned across the provider boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Retryable failure (throttling, transient network failure).
    #[error("Transient provider error ({kind:?}): {message}")]
    Transient {
        /// Failure category.
        kind: TransientKind,
        /// Provider message.
        message: String,
    },

    /// Non-retryable failure.
    #[error("Provider rejected the request ({kind:?}): {message}")]
    Fatal {
        /// Failure category.
        kind: FatalKind,
        /// Provider message.
        message: String,
    },

    /// The object does not exist at the provider.
    #[error("Object not found: {provider_id}")]
    NotFound {
        /// Provider-assigned identifier.
        provider_id: String,
    },
}

/// An action that failed permanently, blocking its dependents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Action {operation} on {resource} failed after {attempts} attempt(s): {cause}")]
pub struct ActionFailed {
    /// Resource the action applied to.
    pub resource: String,
    /// Operation that failed.
    pub operation: String,
    /// Number of provider calls made.
    pub attempts: u32,
    /// The final provider error.
    pub cause: ProviderError,
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Filesystem error on the local backend.
    #[error("State storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// The stored state belongs to a different lineage.
    #[error("Refusing to overwrite state with lineage {stored} using lineage {incoming}")]
    LineageMismatch {
        /// Lineage of the stored state.
        stored: String,
        /// Lineage of the state being written.
        incoming: String,
    },

    /// The stored state is at the same or a newer serial than the write.
    #[error("Stored state is at serial {stored}; refusing to write serial {incoming}")]
    StaleSerial {
        /// Serial of the stored state.
        stored: u64,
        /// Serial of the state being written.
        incoming: u64,
    },
}

/// Result type alias for Landform operations.
pub type Result<T> = std::result::Result<T, LandformError>;

impl LandformError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is a validation failure of the input.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }

    /// Maps the error to the process exit code of the command surface.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.is_validation() {
            EXIT_VALIDATION
        } else {
            EXIT_PARTIAL
        }
    }
}

impl ConfigError {
    /// Creates an invalid-value error for a specific field.
    #[must_use]
    pub fn invalid(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a throttling error.
    #[must_use]
    pub fn throttled(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Transient {
            kind: TransientKind::Throttled { retry_after },
            message: message.into(),
        }
    }

    /// Creates a transient network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Transient {
            kind: TransientKind::Network,
            message: message.into(),
        }
    }

    /// Creates a fatal error of the given kind.
    #[must_use]
    pub fn fatal(kind: FatalKind, message: impl Into<String>) -> Self {
        Self::Fatal {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if the executor may retry the call.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the provider-suggested retry delay, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient {
                kind: TransientKind::Throttled { retry_after },
                ..
            } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_names_chain() {
        let err = ValidationError::CyclicDependency {
            chain: vec!["a.x".into(), "b.y".into(), "a.x".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: a.x -> b.y -> a.x");
    }

    #[test]
    fn test_exit_codes() {
        let validation = LandformError::from(ValidationError::DuplicateResource {
            resource: "aws_vpc.main".into(),
        });
        assert_eq!(validation.exit_code(), EXIT_VALIDATION);

        let state = LandformError::from(StateError::storage("disk full"));
        assert_eq!(state.exit_code(), EXIT_PARTIAL);
    }

    #[test]
    fn test_retry_classification() {
        let throttled = ProviderError::throttled("slow down", Some(Duration::from_secs(3)));
        assert!(throttled.is_retryable());
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(3)));

        assert!(ProviderError::network("reset").is_retryable());
        assert!(!ProviderError::fatal(FatalKind::QuotaExceeded, "no").is_retryable());
        assert!(
            !ProviderError::NotFound {
                provider_id: "vpc-1".into()
            }
            .is_retryable()
        );
    }
}
