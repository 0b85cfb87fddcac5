//! Declaration hashing for change detection.
//!
//! Hashes are deterministic: maps are ordered by key and every value is fed
//! with a type tag, so `"1"` and `1` never collide.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::model::{Resource, ResourceSet, Value};

/// Hasher for computing declaration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of every declared resource.
    #[must_use]
    pub fn hash_resources(&self, resources: &ResourceSet) -> String {
        let mut hasher = Sha256::new();
        for resource in resources.iter() {
            hasher.update(self.hash_resource(resource).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of a single declaration, including its lifecycle and
    /// explicit dependencies.
    #[must_use]
    pub fn hash_resource(&self, resource: &Resource) -> String {
        let mut hasher = Sha256::new();
        hasher.update(resource.id.to_string().as_bytes());
        feed_map(&mut hasher, &resource.attributes);

        let mut depends_on: Vec<String> = resource.depends_on.iter().map(ToString::to_string).collect();
        depends_on.sort_unstable();
        for dep in depends_on {
            hasher.update(b"d");
            hasher.update(dep.as_bytes());
        }

        hasher.update([
            u8::from(resource.lifecycle.create_before_destroy),
            u8::from(resource.lifecycle.prevent_destroy),
        ]);
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of an attribute map.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &BTreeMap<String, Value>) -> String {
        let mut hasher = Sha256::new();
        feed_map(&mut hasher, attributes);
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..8).unwrap_or(hash)
    }
}

fn feed_map(hasher: &mut Sha256, map: &BTreeMap<String, Value>) {
    hasher.update(b"{");
    hasher.update((map.len() as u64).to_be_bytes());
    for (key, value) in map {
        feed_str(hasher, key);
        feed_value(hasher, value);
    }
    hasher.update(b"}");
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

fn feed_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => hasher.update(if *b { b"t" } else { b"f" }),
        Value::Number(n) => {
            hasher.update(b"#");
            feed_str(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update(b"s");
            feed_str(hasher, s);
        }
        Value::Reference(r) => {
            hasher.update(b"r");
            feed_str(hasher, &r.to_string());
        }
        Value::List(items) => {
            hasher.update(b"[");
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                feed_value(hasher, item);
            }
            hasher.update(b"]");
        }
        Value::Map(entries) => feed_map(hasher, entries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceId;

    fn vpc(cidr: &str) -> Resource {
        Resource::new(ResourceId::new("aws_vpc", "main"))
            .with_attribute("cidr_block", cidr)
            .with_attribute("enable_dns_support", true)
    }

    #[test]
    fn test_resource_hash_deterministic() {
        let hasher = ConfigHasher::new();
        assert_eq!(
            hasher.hash_resource(&vpc("10.0.0.0/16")),
            hasher.hash_resource(&vpc("10.0.0.0/16"))
        );
        assert_ne!(
            hasher.hash_resource(&vpc("10.0.0.0/16")),
            hasher.hash_resource(&vpc("10.1.0.0/16"))
        );
    }

    #[test]
    fn test_value_types_do_not_collide() {
        let hasher = ConfigHasher::new();
        let a = BTreeMap::from([("port".to_string(), Value::from("5432"))]);
        let b = BTreeMap::from([("port".to_string(), Value::from(5432_i64))]);
        assert_ne!(hasher.hash_attributes(&a), hasher.hash_attributes(&b));
    }

    #[test]
    fn test_short_hash() {
        let short = ConfigHasher::short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
