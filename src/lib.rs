// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Landform
//!
//! A declarative resource-graph provisioner.
//!
//! ## Overview
//!
//! Landform reads resource declarations (networks, subnets, gateways, route
//! tables, security groups, roles, instances, databases) and converges real
//! infrastructure to them:
//!
//! - References between resources become dependency edges
//! - Declarations are diffed against the last persisted state
//! - Actions are ordered so dependencies are always satisfied
//! - Independent actions run concurrently; a failure only blocks its dependents
//!
//! ## Architecture
//!
//! 1. **Model**: [`config`] parses `landform.yaml` into a [`model::ResourceSet`]
//! 2. **Graph**: [`graph`] derives and validates the dependency graph
//! 3. **Plan**: [`planner`] diffs the declarations against a [`state`] snapshot
//! 4. **Order**: [`resolver`] expands lifecycles into ordered steps
//! 5. **Execute**: [`executor`] runs the steps against a [`provider`]
//!
//! [`engine`] ties the stages together for one run; [`cli`] exposes them.
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: network
//!
//! resources:
//!   - type: aws_vpc
//!     name: main
//!     attributes:
//!       cidr_block: 10.0.0.0/16
//!   - type: aws_subnet
//!     name: public
//!     attributes:
//!       vpc_id: "${aws_vpc.main.id}"
//!       cidr_block: 10.0.1.0/24
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod model;
pub mod planner;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, LandformConfig};
pub use engine::{DriftReport, Engine, PreparedRun, RunOutcome};
pub use error::{LandformError, Result};
pub use executor::{CancelHandle, CancelToken, Executor, RunReport};
pub use graph::{DependencyGraph, GraphBuilder};
pub use model::{Resource, ResourceId, ResourceSet, Value};
pub use planner::{Plan, PlanGenerator, PlanMode};
pub use provider::{HttpProvider, Provider, SandboxProvider};
pub use registry::{Registry, TypeDescriptor};
pub use resolver::{DependencyResolver, ExecutionSequence};
pub use state::{LocalStateStore, S3StateStore, StateFile, StateSession, StateStore};
