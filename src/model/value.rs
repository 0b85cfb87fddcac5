//! Attribute value tree.
//!
//! Declared attributes are a tagged union of literals, nested lists and maps,
//! and references to another resource's exported attribute. References are
//! written in YAML as a string of the exact form `${type.name.attribute}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::resource::ResourceId;

/// Opening delimiter of a reference literal.
const REF_OPEN: &str = "${";

/// Closing delimiter of a reference literal.
const REF_CLOSE: &str = "}";

/// A reference to an exported attribute of another resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    /// Referenced resource.
    pub target: ResourceId,
    /// Exported attribute of the referenced resource.
    pub attribute: String,
}

/// A declared or recorded attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    /// Explicit null.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Numeric literal.
    Number(serde_json::Number),
    /// String literal.
    String(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Nested structure (e.g. an ingress rule), ordered by key.
    Map(BTreeMap<String, Value>),
    /// Reference to another resource's exported attribute.
    Reference(Reference),
}

impl Reference {
    /// Creates a reference to `attribute` of `target`.
    #[must_use]
    pub fn new(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }

    /// Parses the body of a reference literal (`type.name.attribute`).
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the body is malformed.
    pub fn parse(body: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = body.split('.').collect();
        let [resource_type, name, attribute] = parts.as_slice() else {
            return Err(format!(
                "invalid reference '${{{body}}}': expected ${{type.name.attribute}}"
            ));
        };

        if attribute.is_empty() || !attribute.chars().all(is_ident_char) {
            return Err(format!("invalid attribute in reference '${{{body}}}'"));
        }

        let target = ResourceId::try_new(*resource_type, *name)?;
        Ok(Self::new(target, *attribute))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.attribute)
    }
}

/// Characters allowed in identifiers of a reference.
pub(crate) const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl Value {
    /// Creates a reference value.
    #[must_use]
    pub fn reference(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self::Reference(Reference::new(target, attribute))
    }

    /// Calls `visit` for every reference embedded in this value, depth first.
    pub fn visit_references<'a>(&'a self, visit: &mut impl FnMut(&'a Reference)) {
        match self {
            Self::Reference(reference) => visit(reference),
            Self::List(items) => {
                for item in items {
                    item.visit_references(visit);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.visit_references(visit);
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }

    /// Returns every reference embedded in this value.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.visit_references(&mut |r| found.push(r));
        found
    }

    /// Substitutes every reference using `lookup`.
    ///
    /// Returns `None` if any embedded reference is not known yet; the whole
    /// value is then "known after apply".
    pub fn resolve(&self, lookup: &impl Fn(&Reference) -> Option<Self>) -> Option<Self> {
        match self {
            Self::Reference(reference) => lookup(reference),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Option<Vec<_>>>()
                .map(Self::List),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Self::Map),
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => Some(self.clone()),
        }
    }

    /// Returns true if a string literal in this value embeds `${`.
    ///
    /// Such strings are not interpolated; the validator warns about them.
    #[must_use]
    pub fn has_embedded_template(&self) -> bool {
        match self {
            Self::String(s) => s.contains(REF_OPEN),
            Self::List(items) => items.iter().any(Self::has_embedded_template),
            Self::Map(entries) => entries.values().any(Self::has_embedded_template),
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::Reference(_) => false,
        }
    }

    /// Returns the string content if this is a string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = String;

    fn try_from(json: serde_json::Value) -> std::result::Result<Self, Self::Error> {
        Ok(match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => parse_string(s)?,
            serde_json::Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<std::result::Result<_, _>>()?,
            ),
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                    .collect::<std::result::Result<_, _>>()?,
            ),
        })
    }
}

/// Parses a string literal, recognizing whole-string reference literals.
fn parse_string(s: String) -> std::result::Result<Value, String> {
    if let Some(body) = s
        .strip_prefix(REF_OPEN)
        .and_then(|rest| rest.strip_suffix(REF_CLOSE))
        && !body.contains(REF_OPEN)
        && !body.contains(REF_CLOSE)
    {
        return Reference::parse(body).map(Value::Reference);
    }
    Ok(Value::String(s))
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Map(entries) => {
                Self::Object(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
            Value::Reference(reference) => Self::String(reference.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Reference(r) => write!(f, "{r}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
