//! Resource type registry.
//!
//! Type-specific behavior is a capability table keyed by type string: which
//! attributes can change in place, which attributes the provider exports, and
//! the prefix the sandbox provider uses for object ids. Descriptors are plain
//! data, so user-declared types from the config sit alongside the built-ins.

mod builtin;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use builtin::BUILTIN_TYPES;

/// The identifier attribute every type exports.
pub const ID_ATTRIBUTE: &str = "id";

/// How a changed attribute can be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    /// The provider can update the attribute on the existing object.
    UpdateInPlace,
    /// The object must be destroyed and recreated.
    RequiresReplace,
}

/// Capability descriptor for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Resource type name.
    pub name: String,
    /// Prefix of sandbox-assigned object ids.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    /// Attributes that can be updated in place.
    #[serde(default)]
    pub updatable: BTreeSet<String>,
    /// Computed attributes returned by the provider.
    #[serde(default)]
    pub exports: BTreeSet<String>,
}

fn default_id_prefix() -> String {
    String::from("res")
}

impl TypeDescriptor {
    /// Creates a descriptor exporting only `id`.
    #[must_use]
    pub fn new(name: impl Into<String>, id_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_prefix: id_prefix.into(),
            updatable: BTreeSet::new(),
            exports: BTreeSet::from([ID_ATTRIBUTE.to_string()]),
        }
    }

    /// Marks attributes as updatable in place.
    #[must_use]
    pub fn with_updatable<'a>(mut self, attributes: impl IntoIterator<Item = &'a str>) -> Self {
        self.updatable.extend(attributes.into_iter().map(String::from));
        self
    }

    /// Adds exported attributes.
    #[must_use]
    pub fn with_exports<'a>(mut self, attributes: impl IntoIterator<Item = &'a str>) -> Self {
        self.exports.extend(attributes.into_iter().map(String::from));
        self
    }

    /// Classifies a change to `attribute`.
    ///
    /// Anything not known to be updatable requires a replacement.
    #[must_use]
    pub fn classify(&self, attribute: &str) -> ChangeClass {
        if self.updatable.contains(attribute) {
            ChangeClass::UpdateInPlace
        } else {
            ChangeClass::RequiresReplace
        }
    }

    /// Returns true if the provider exports `attribute` for this type.
    #[must_use]
    pub fn exports(&self, attribute: &str) -> bool {
        attribute == ID_ATTRIBUTE || self.exports.contains(attribute)
    }
}

/// Registry of type descriptors.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: HashMap<String, TypeDescriptor>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in descriptors.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, prefix, updatable, exports) in BUILTIN_TYPES {
            registry.register(
                TypeDescriptor::new(*name, *prefix)
                    .with_updatable(updatable.iter().copied())
                    .with_exports(exports.iter().copied()),
            );
        }
        registry
    }

    /// Registers a descriptor, replacing any existing one for the same type.
    pub fn register(&mut self, mut descriptor: TypeDescriptor) {
        descriptor.exports.insert(ID_ATTRIBUTE.to_string());
        if self.descriptors.contains_key(&descriptor.name) {
            debug!("Overriding descriptor for type {}", descriptor.name);
        }
        self.descriptors.insert(descriptor.name.clone(), descriptor);
    }

    /// Gets the descriptor for a type.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<&TypeDescriptor> {
        self.descriptors.get(resource_type)
    }

    /// Returns true if the type is registered.
    #[must_use]
    pub fn contains(&self, resource_type: &str) -> bool {
        self.descriptors.contains_key(resource_type)
    }

    /// Classifies a change to an attribute of a type.
    ///
    /// Unknown types classify every change as requiring replacement.
    #[must_use]
    pub fn classify(&self, resource_type: &str, attribute: &str) -> ChangeClass {
        self.get(resource_type)
            .map_or(ChangeClass::RequiresReplace, |d| d.classify(attribute))
    }

    /// Returns the registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_classification() {
        let registry = Registry::builtin();
        assert_eq!(registry.classify("aws_vpc", "cidr_block"), ChangeClass::RequiresReplace);
        assert_eq!(registry.classify("aws_vpc", "tags"), ChangeClass::UpdateInPlace);
        assert_eq!(
            registry.classify("aws_security_group", "ingress"),
            ChangeClass::UpdateInPlace
        );
    }

    #[test]
    fn test_unclassified_attribute_requires_replace() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.classify("aws_instance", "some_new_field"),
            ChangeClass::RequiresReplace
        );
        assert_eq!(registry.classify("not_a_type", "tags"), ChangeClass::RequiresReplace);
    }

    #[test]
    fn test_every_builtin_exports_id() {
        let registry = Registry::builtin();
        for name in registry.type_names() {
            let descriptor = registry.get(name).unwrap();
            assert!(descriptor.exports(ID_ATTRIBUTE), "{name} must export id");
        }
        assert!(registry.get("aws_eip").unwrap().exports("allocation_id"));
    }

    #[test]
    fn test_register_custom_type() {
        let mut registry = Registry::builtin();
        registry.register(
            TypeDescriptor::new("dns_record", "rec")
                .with_updatable(["ttl"])
                .with_exports(["fqdn"]),
        );

        let descriptor = registry.get("dns_record").unwrap();
        assert!(descriptor.exports("fqdn"));
        assert_eq!(descriptor.classify("ttl"), ChangeClass::UpdateInPlace);
        assert_eq!(descriptor.classify("zone"), ChangeClass::RequiresReplace);
    }
}
