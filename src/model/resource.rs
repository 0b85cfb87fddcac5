//! Resource identities, lifecycle policies and declared resource sets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

use super::value::{Reference, Value, is_ident_char};

/// Identity of a resource: its type and a name unique within that type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Resource type (e.g. `aws_vpc`).
    pub resource_type: String,
    /// Name unique within the type.
    pub name: String,
}

impl ResourceId {
    /// Creates an identity without validating its parts.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Creates an identity, rejecting empty parts or invalid characters.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if either part is invalid.
    pub fn try_new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> std::result::Result<Self, String> {
        let id = Self::new(resource_type, name);
        for (label, part) in [("type", &id.resource_type), ("name", &id.name)] {
            if part.is_empty() || !part.chars().all(is_ident_char) {
                return Err(format!("invalid resource {label} '{part}'"));
            }
        }
        Ok(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (resource_type, name) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid resource id '{s}': expected type.name"))?;
        Self::try_new(resource_type, name)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

/// Per-resource lifecycle flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// On replace, provision the new instance before tearing down the old.
    #[serde(default)]
    pub create_before_destroy: bool,
    /// Refuse any plan that would destroy this resource.
    #[serde(default)]
    pub prevent_destroy: bool,
}

/// A declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Identity.
    pub id: ResourceId,
    /// Declared attributes.
    pub attributes: BTreeMap<String, Value>,
    /// Explicit ordering dependencies without attribute linkage.
    pub depends_on: Vec<ResourceId>,
    /// Lifecycle policy.
    pub lifecycle: LifecyclePolicy,
}

impl Resource {
    /// Creates a resource with no attributes.
    #[must_use]
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
            lifecycle: LifecyclePolicy::default(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_depends_on(mut self, id: ResourceId) -> Self {
        self.depends_on.push(id);
        self
    }

    /// Sets the lifecycle policy.
    #[must_use]
    pub const fn with_lifecycle(mut self, lifecycle: LifecyclePolicy) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Returns every reference embedded in the attributes, with the attribute
    /// that carries it.
    #[must_use]
    pub fn references(&self) -> Vec<(&str, &Reference)> {
        let mut found = Vec::new();
        for (name, value) in &self.attributes {
            value.visit_references(&mut |r| found.push((name.as_str(), r)));
        }
        found
    }

    /// Returns the implicit and explicit dependencies of this resource.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        self.references()
            .into_iter()
            .map(|(_, r)| r.target.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }
}

/// The set of declared resources for one run, keyed by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSet {
    resources: BTreeMap<ResourceId, Resource>,
}

impl ResourceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateResource`] if the identity is taken.
    pub fn insert(&mut self, resource: Resource) -> std::result::Result<(), ValidationError> {
        if self.resources.contains_key(&resource.id) {
            return Err(ValidationError::DuplicateResource {
                resource: resource.id.to_string(),
            });
        }
        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Builds a set from resources, rejecting duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateResource`] on the first duplicate.
    pub fn from_resources(
        resources: impl IntoIterator<Item = Resource>,
    ) -> std::result::Result<Self, ValidationError> {
        let mut set = Self::new();
        for resource in resources {
            set.insert(resource)?;
        }
        Ok(set)
    }

    /// Gets a resource by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Returns true if the identity is declared.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// Iterates resources in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Iterates identities in order.
    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_parse_and_display() {
        let id: ResourceId = "aws_route_table.private".parse().unwrap();
        assert_eq!(id.resource_type, "aws_route_table");
        assert_eq!(id.name, "private");
        assert_eq!(id.to_string(), "aws_route_table.private");

        assert!("aws_vpc".parse::<ResourceId>().is_err());
        assert!(".main".parse::<ResourceId>().is_err());
        assert!("aws_vpc.a.b".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_dependencies_merge_implicit_and_explicit() {
        let vpc = ResourceId::new("aws_vpc", "main");
        let igw = ResourceId::new("aws_internet_gateway", "main");
        let nat = Resource::new(ResourceId::new("aws_nat_gateway", "main"))
            .with_attribute("subnet_id", Value::reference(ResourceId::new("aws_subnet", "public"), "id"))
            .with_attribute("tags", Value::Map(BTreeMap::from([(
                "vpc".to_string(),
                Value::reference(vpc.clone(), "id"),
            )])))
            .with_depends_on(igw.clone());

        let deps = nat.dependencies();
        assert_eq!(deps.len(), 3);
        assert!(deps.contains(&vpc));
        assert!(deps.contains(&igw));
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let id = ResourceId::new("aws_vpc", "main");
        let result = ResourceSet::from_resources([Resource::new(id.clone()), Resource::new(id)]);
        assert_eq!(
            result,
            Err(ValidationError::DuplicateResource {
                resource: "aws_vpc.main".to_string()
            })
        );
    }
}
