//! Resource model.
//!
//! In-memory representation of declared resources, their attribute trees and
//! the cross-resource references embedded in them.

mod resource;
mod value;

pub use resource::{LifecyclePolicy, Resource, ResourceId, ResourceSet};
pub use value::{Reference, Value};
