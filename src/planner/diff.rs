//! Attribute-level diff between desired and recorded attributes.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::Value;
use crate::registry::{ChangeClass, Registry};

use super::plan::{ActionKind, AttributeChange, PlannedValue};

/// Engine for computing attribute diffs.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine<'a> {
    registry: &'a Registry,
}

impl<'a> DiffEngine<'a> {
    /// Creates a diff engine classifying changes with `registry`.
    #[must_use]
    pub const fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Diffs resolved desired attributes against a recorded snapshot.
    ///
    /// A desired value of `None` is unknown until apply and always counts as
    /// changed. Attributes recorded but no longer declared are removals.
    #[must_use]
    pub fn diff(
        &self,
        resource_type: &str,
        desired: &BTreeMap<String, Option<Value>>,
        recorded: &BTreeMap<String, Value>,
    ) -> Vec<AttributeChange> {
        let names: BTreeSet<&String> = desired.keys().chain(recorded.keys()).collect();

        names
            .into_iter()
            .filter_map(|name| {
                let old = recorded.get(name);
                let new = match desired.get(name) {
                    Some(Some(value)) if old == Some(value) => return None,
                    Some(Some(value)) => PlannedValue::Known(value.clone()),
                    Some(None) => PlannedValue::Unknown,
                    None => PlannedValue::Removed,
                };
                Some(AttributeChange {
                    attribute: name.clone(),
                    old: old.cloned(),
                    new,
                    requires_replace: self.registry.classify(resource_type, name)
                        == ChangeClass::RequiresReplace,
                })
            })
            .collect()
    }
}

/// Derives the action kind for an existing resource from its changes.
#[must_use]
pub fn classify_changes(changes: &[AttributeChange]) -> ActionKind {
    if changes.iter().any(|c| c.requires_replace) {
        ActionKind::Replace
    } else if changes.is_empty() {
        ActionKind::NoOp
    } else {
        ActionKind::Update
    }
}

/// Returns the attributes to send in an in-place update.
///
/// Removed attributes are sent as explicit nulls.
#[must_use]
pub fn update_payload(
    desired: &BTreeMap<String, Value>,
    recorded: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut payload: BTreeMap<String, Value> = desired
        .iter()
        .filter(|(name, value)| recorded.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    for name in recorded.keys() {
        if !desired.contains_key(name) {
            payload.insert(name.clone(), Value::Null);
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(pairs: &[(&str, &str)]) -> BTreeMap<String, Option<Value>> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Some(Value::from(*v))))
            .collect()
    }

    fn recorded(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn test_identical_attributes_no_changes() {
        let registry = Registry::builtin();
        let engine = DiffEngine::new(&registry);
        let changes = engine.diff(
            "aws_vpc",
            &known(&[("cidr_block", "10.0.0.0/16")]),
            &recorded(&[("cidr_block", "10.0.0.0/16")]),
        );
        assert!(changes.is_empty());
        assert_eq!(classify_changes(&changes), ActionKind::NoOp);
    }

    #[test]
    fn test_tag_change_is_update() {
        let registry = Registry::builtin();
        let engine = DiffEngine::new(&registry);
        let changes = engine.diff(
            "aws_vpc",
            &known(&[("cidr_block", "10.0.0.0/16"), ("tags", "b")]),
            &recorded(&[("cidr_block", "10.0.0.0/16"), ("tags", "a")]),
        );
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].requires_replace);
        assert_eq!(classify_changes(&changes), ActionKind::Update);
    }

    #[test]
    fn test_cidr_change_requires_replace() {
        let registry = Registry::builtin();
        let engine = DiffEngine::new(&registry);
        let changes = engine.diff(
            "aws_vpc",
            &known(&[("cidr_block", "10.1.0.0/16"), ("tags", "b")]),
            &recorded(&[("cidr_block", "10.0.0.0/16"), ("tags", "a")]),
        );
        assert_eq!(classify_changes(&changes), ActionKind::Replace);
    }

    #[test]
    fn test_unknown_value_counts_as_changed() {
        let registry = Registry::builtin();
        let engine = DiffEngine::new(&registry);
        let desired = BTreeMap::from([("vpc_id".to_string(), None)]);
        let changes = engine.diff("aws_subnet", &desired, &recorded(&[("vpc_id", "vpc-1")]));

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new, PlannedValue::Unknown);
        assert!(changes[0].requires_replace);
    }

    #[test]
    fn test_removed_attribute() {
        let registry = Registry::builtin();
        let engine = DiffEngine::new(&registry);
        let changes = engine.diff("aws_vpc", &known(&[]), &recorded(&[("tags", "a")]));
        assert_eq!(changes[0].new, PlannedValue::Removed);
        assert_eq!(classify_changes(&changes), ActionKind::Update);
    }

    #[test]
    fn test_update_payload() {
        let payload = update_payload(
            &recorded(&[("tags", "b"), ("cidr_block", "x")]),
            &recorded(&[("tags", "a"), ("cidr_block", "x"), ("monitoring", "on")]),
        );
        assert_eq!(payload.len(), 2);
        assert_eq!(payload["tags"], Value::from("b"));
        assert_eq!(payload["monitoring"], Value::Null);
    }
}
