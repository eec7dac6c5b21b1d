//! [crate::properties] contains the basic building blocks shared by every other module:
//! identifiers, the [ResourceType] enumeration, attribute values and constraints.
pub use enumset::EnumSet;
use enumset::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use crate::error::ValidationError;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(src: u64) -> Self {
                $name(src)
            }
        }
    };
}

id_type!(
    /// Unique ID of a Site. Every attribute definition and resource is owned by exactly one.
    SiteId,
    "site:"
);
id_type!(
    /// Unique ID of a resource instance, shared across all resource types.
    ResourceId,
    "resource:"
);
id_type!(
    /// Unique ID of an [crate::attribute::AttributeDefinition].
    AttributeId,
    "attribute:"
);
id_type!(
    /// Unique ID of a stored [crate::value::ValueRow].
    ValueId,
    "value:"
);

/// The resource types that can carry attributes.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(repr = "u32")]
pub enum ResourceType {
    Device,
    Network,
    Interface,
    Circuit,
    AutonomousSystem,
    Protocol,
}

impl ResourceType {
    pub fn all() -> &'static [ResourceType] {
        &[
            ResourceType::Device,
            ResourceType::Network,
            ResourceType::Interface,
            ResourceType::Circuit,
            ResourceType::AutonomousSystem,
            ResourceType::Protocol,
        ]
    }

    /// Resource types whose instances form a forest through a `parent` reference.
    pub fn hierarchical() -> EnumSet<ResourceType> {
        ResourceType::Network | ResourceType::Interface
    }

    pub fn is_hierarchical(&self) -> bool {
        ResourceType::hierarchical().contains(*self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Device => "Device",
            ResourceType::Network => "Network",
            ResourceType::Interface => "Interface",
            ResourceType::Circuit => "Circuit",
            ResourceType::AutonomousSystem => "AutonomousSystem",
            ResourceType::Protocol => "Protocol",
        }
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ResourceType {
    type Error = ValidationError;

    fn try_from(src: &str) -> Result<ResourceType, ValidationError> {
        ResourceType::all()
            .iter()
            .find(|rt| rt.as_str() == src)
            .copied()
            .ok_or_else(|| {
                ValidationError::field("resource_name", format!("Invalid resource name: {src:?}."))
            })
    }
}

/// A single attribute value as handed over by the serialization layer: a string for plain
/// attributes, a list of strings for `multi` attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Single(String),
    Multi(Vec<String>),
}

impl AttrValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            AttrValue::Single(s) => Some(s),
            AttrValue::Multi(_) => None,
        }
    }

    pub fn as_multi(&self) -> Option<&[String]> {
        match self {
            AttrValue::Single(_) => None,
            AttrValue::Multi(v) => Some(v),
        }
    }

    /// Whether this value holds the given scalar, either directly or as a list member.
    pub fn contains(&self, scalar: &str) -> bool {
        match self {
            AttrValue::Single(s) => s == scalar,
            AttrValue::Multi(v) => v.iter().any(|s| s == scalar),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(src: &str) -> Self {
        AttrValue::Single(src.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(src: String) -> Self {
        AttrValue::Single(src)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(src: Vec<String>) -> Self {
        AttrValue::Multi(src)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(src: Vec<&str>) -> Self {
        AttrValue::Multi(src.into_iter().map(String::from).collect())
    }
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            AttrValue::Single(s) => write!(f, "{s}"),
            AttrValue::Multi(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

/// The attribute set of a resource keyed by attribute name.
pub type AttributeMap = BTreeMap<String, AttrValue>;

/// A partial update: `None` deletes the named attribute, `Some` sets it.
pub type AttributePatch = BTreeMap<String, Option<AttrValue>>;

/// Normalized constraint set of an attribute definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub allow_empty: bool,
    pub pattern: String,
    pub valid_values: Vec<String>,
}

impl Constraints {
    /// Normalize a partially specified JSON constraint object into the full three-key shape,
    /// filling in defaults for missing keys.
    pub fn from_json(value: &serde_json::Value) -> Result<Constraints, ValidationError> {
        let serde_json::Value::Object(map) = value else {
            return Err(ValidationError::field(
                "constraints",
                format!("Expected dictionary but received {}", json_type_name(value)),
            ));
        };

        let allow_empty = match map.get("allow_empty") {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(_) => {
                return Err(ValidationError::field(
                    "constraints",
                    "allow_empty expected type bool.",
                ))
            }
        };

        let pattern = match map.get("pattern") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(ValidationError::field(
                    "constraints",
                    "pattern expected type string.",
                ))
            }
        };

        let valid_values = match map.get("valid_values") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s.clone()),
                    _ => Err(ValidationError::field(
                        "constraints",
                        "valid_values items expected type string.",
                    )),
                })
                .collect::<Result<Vec<String>, ValidationError>>()?,
            Some(_) => {
                return Err(ValidationError::field(
                    "constraints",
                    "valid_values expected type list.",
                ))
            }
        };

        Ok(Constraints {
            allow_empty,
            pattern,
            valid_values,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "allow_empty": self.allow_empty,
            "pattern": self.pattern,
            "valid_values": self.valid_values,
        })
    }
}

pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "dict",
    }
}

/// Convert a raw JSON `attributes` payload into an [AttributePatch]. Values must already be
/// structured (string, list of strings or null); anything else is rejected.
pub fn patch_from_json(value: &serde_json::Value) -> Result<AttributePatch, ValidationError> {
    let serde_json::Value::Object(map) = value else {
        return Err(ValidationError::field(
            "attributes",
            format!("Expected dictionary but received {}", json_type_name(value)),
        ));
    };
    let mut patch = AttributePatch::new();
    for (name, raw) in map.iter() {
        let val = match raw {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(AttrValue::Single(s.clone())),
            serde_json::Value::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        serde_json::Value::String(s) => list.push(s.clone()),
                        other => {
                            return Err(ValidationError::field(
                                "value",
                                format!(
                                    "Attribute {name} list items must be strings, got {}",
                                    json_type_name(other)
                                ),
                            ))
                        }
                    }
                }
                Some(AttrValue::Multi(list))
            }
            other => {
                return Err(ValidationError::field(
                    "value",
                    format!(
                        "Attribute values must be a string type, got {} for {name}",
                        json_type_name(other)
                    ),
                ))
            }
        };
        patch.insert(name.clone(), val);
    }
    Ok(patch)
}
