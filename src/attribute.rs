//! Attribute definitions: the schema slots that resources of one type within one site may carry.
//!
//! An [AttributeDefinition] is always produced by [AttributeDefinition::clean], which normalizes
//! and checks an [AttributeSpec] (the raw, serialization-layer shaped input). Dependency edges
//! (`depends_on`) are not stored here; they live in [crate::dependency::DependencyGraph] and are
//! managed through [crate::schema::AttributeStore].
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{
    config::NameRules,
    error::ValidationError,
    properties::{AttrValue, AttributeId, Constraints, ResourceType, SiteId},
};

pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Raw input for creating or updating an attribute definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(alias = "resource_name")]
    pub resource_type: String,
    pub description: String,
    pub required: bool,
    pub display: bool,
    pub multi: bool,
    pub inheritable: bool,
    pub constraints: serde_json::Value,
    pub default: Option<AttrValue>,
    /// Names of attributes (same site and resource type) this one depends on.
    pub depends_on: Vec<String>,
}

impl AttributeSpec {
    pub fn new<N: Into<String>>(resource_type: ResourceType, name: N) -> Self {
        AttributeSpec {
            name: name.into(),
            resource_type: resource_type.to_string(),
            ..Default::default()
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn display(mut self, display: bool) -> Self {
        self.display = display;
        self
    }

    pub fn multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }

    pub fn inheritable(mut self, inheritable: bool) -> Self {
        self.inheritable = inheritable;
        self
    }

    pub fn constraints(mut self, constraints: serde_json::Value) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn default_value<V: Into<AttrValue>>(mut self, default: V) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn description<D: Into<String>>(mut self, description: D) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: AttributeId,
    pub site_id: SiteId,
    pub resource_type: ResourceType,
    pub name: String,
    pub description: String,
    pub required: bool,
    /// Forced to `true` whenever `required` is set.
    pub display: bool,
    pub multi: bool,
    pub inheritable: bool,
    pub constraints: Constraints,
    pub default: Option<AttrValue>,
}

impl AttributeDefinition {
    /// Validate `spec` and build the definition it describes.
    pub fn clean(
        id: AttributeId,
        site_id: SiteId,
        spec: &AttributeSpec,
        rules: &NameRules,
    ) -> Result<AttributeDefinition, ValidationError> {
        let resource_type = clean_resource_type(&spec.resource_type)?;
        let name = clean_name(&spec.name, rules)?;
        if spec.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::field(
                "description",
                format!("Description exceeds {MAX_DESCRIPTION_LEN} characters."),
            ));
        }
        let constraints = clean_constraints(&spec.constraints)?;
        if spec.inheritable && !resource_type.is_hierarchical() {
            return Err(ValidationError::field(
                "inheritable",
                format!(
                    "Attribute {name} cannot be inheritable: resource type {resource_type} is not \
                     hierarchical."
                ),
            ));
        }

        let mut attr = AttributeDefinition {
            id,
            site_id,
            resource_type,
            name,
            description: spec.description.clone(),
            required: spec.required,
            display: spec.display || spec.required,
            multi: spec.multi,
            inheritable: spec.inheritable,
            constraints,
            default: None,
        };
        attr.default = attr.clean_default(spec.default.as_ref())?;
        Ok(attr)
    }

    /// A default must have the right shape for `multi` and be a legal value under this
    /// definition's own constraints.
    fn clean_default(&self, value: Option<&AttrValue>) -> Result<Option<AttrValue>, ValidationError> {
        let Some(value) = value else {
            return Ok(None);
        };
        match (self.multi, value) {
            (true, AttrValue::Single(_)) => {
                return Err(ValidationError::field(
                    "default",
                    "Default for multi attribute must be a list.",
                ))
            }
            (false, AttrValue::Multi(_)) => {
                return Err(ValidationError::field(
                    "default",
                    "Default for single-value attribute must be a string.",
                ))
            }
            _ => {}
        }
        self.validate_value(value).map_err(|e| e.rekey("default"))?;
        Ok(Some(value.clone()))
    }

    /// Validate `value` against type, emptiness, pattern and valid_values. On success, return the
    /// scalars to be stored, one per value row.
    pub fn validate_value(&self, value: &AttrValue) -> Result<Vec<String>, ValidationError> {
        let scalars: Vec<&String> = match (self.multi, value) {
            (true, AttrValue::Multi(list)) => list.iter().collect(),
            (true, AttrValue::Single(_)) => {
                return Err(ValidationError::field(
                    "multi",
                    format!("Attribute {} values must be a list type", self.name),
                ))
            }
            (false, AttrValue::Single(s)) => vec![s],
            (false, AttrValue::Multi(_)) => {
                return Err(ValidationError::field(
                    "value",
                    format!("Attribute {} values must be a string type", self.name),
                ))
            }
        };

        let pattern = self.compiled_pattern()?;
        let valid_values: BTreeSet<&str> = self
            .constraints
            .valid_values
            .iter()
            .map(String::as_str)
            .collect();

        let mut inserts = Vec::with_capacity(scalars.len());
        for scalar in scalars {
            if !self.constraints.allow_empty && scalar.is_empty() {
                return Err(ValidationError::field(
                    "constraints",
                    format!("Attribute {} doesn't allow empty values", self.name),
                ));
            }
            if let Some(re) = pattern.as_ref() {
                if !re.is_match(scalar) {
                    return Err(ValidationError::field(
                        "pattern",
                        format!(
                            "Attribute value {} for {} didn't match pattern: {}",
                            scalar, self.name, self.constraints.pattern
                        ),
                    ));
                }
            }
            if !valid_values.is_empty() && !valid_values.contains(scalar.as_str()) {
                return Err(ValidationError::message(format!(
                    "Attribute value {} for {} not a valid value: {}",
                    scalar,
                    self.name,
                    self.constraints.valid_values.join(", ")
                )));
            }
            inserts.push(scalar.clone());
        }
        Ok(inserts)
    }

    /// The pattern constraint anchored at the start of the value.
    fn compiled_pattern(&self) -> Result<Option<Regex>, ValidationError> {
        if self.constraints.pattern.is_empty() {
            return Ok(None);
        }
        Regex::new(&format!("^(?:{})", self.constraints.pattern))
            .map(Some)
            .map_err(|e| ValidationError::field("constraints", format!("Invalid pattern: {e}")))
    }

    /// Full-state serialization used by the change log. `depends_on` is supplied by the caller
    /// because edges are owned by the dependency graph.
    pub fn to_dict(&self, depends_on: &[String]) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.0,
            "site_id": self.site_id.0,
            "description": self.description,
            "name": self.name,
            "resource_name": self.resource_type.as_str(),
            "required": self.required,
            "display": self.display,
            "multi": self.multi,
            "inheritable": self.inheritable,
            "constraints": self.constraints.to_json(),
            "default": self.default,
            "depends_on": depends_on,
        })
    }
}

pub fn clean_resource_type(value: &str) -> Result<ResourceType, ValidationError> {
    ResourceType::try_from(value)
}

pub fn clean_name(value: &str, rules: &NameRules) -> Result<String, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::field(
            "name",
            "Name must be non-zero length string.",
        ));
    }
    if value.chars().count() > rules.max_attribute_name_len {
        return Err(ValidationError::field(
            "name",
            format!(
                "Name exceeds {} characters: {value:?}",
                rules.max_attribute_name_len
            ),
        ));
    }
    if !rules.attribute_name.is_match(value) {
        return Err(ValidationError::field(
            "name",
            format!(
                "Invalid name: {value:?}. Names must match: {}",
                rules.attribute_name.as_str()
            ),
        ));
    }
    Ok(value.to_string())
}

/// Normalize constraints; `null` means "no constraints". The pattern must compile.
pub fn clean_constraints(value: &serde_json::Value) -> Result<Constraints, ValidationError> {
    let constraints = match value {
        serde_json::Value::Null => Constraints::default(),
        other => Constraints::from_json(other)?,
    };
    if !constraints.pattern.is_empty() {
        Regex::new(&constraints.pattern).map_err(|e| {
            ValidationError::field("constraints", format!("pattern is not a valid regex: {e}"))
        })?;
    }
    Ok(constraints)
}
