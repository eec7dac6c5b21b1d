//! Validation and persistence of a resource's attribute set.
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    attribute::AttributeDefinition,
    error::{NsotError, ValidationError},
    properties::{AttributeId, AttributeMap, AttributePatch},
    resource::AttributeBearer,
    schema::AttributeStore,
    value::{NewValue, ValueStore},
};

/// Writes attribute sets for resources. Borrows the schema read-only and the value store mutably
/// for the duration of one write.
pub struct Binder<'a> {
    schema: &'a AttributeStore,
    values: &'a mut ValueStore,
}

impl<'a> Binder<'a> {
    pub fn new(schema: &'a AttributeStore, values: &'a mut ValueStore) -> Binder<'a> {
        Binder { schema, values }
    }

    /// Validate `attributes` for `resource` and, if everything checks out, replace its value rows
    /// and recompute its attribute cache.
    ///
    /// - `attributes == None` with `partial` is a no-op. Without `partial` it is an empty set, so
    ///   defaults still apply.
    /// - In partial mode `None` values delete, other values overwrite, and keys not mentioned keep
    ///   their cached value. Defaults are not applied.
    /// - In full mode the map is the new attribute set; `None` values are treated as absent.
    ///   Defaults fill in missing attributes.
    ///
    /// Nothing is written unless every check passes.
    pub fn set_attributes<R: AttributeBearer + ?Sized>(
        &mut self,
        resource: &mut R,
        attributes: Option<AttributePatch>,
        valid_attributes: Option<&BTreeMap<String, AttributeDefinition>>,
        partial: bool,
    ) -> Result<(), NsotError> {
        tracing::debug!(
            "set_attributes {} {} partial={partial}: {attributes:?}",
            resource.resource_type(),
            resource.id()
        );
        if attributes.is_none() && partial {
            return Ok(());
        }
        let attributes = attributes.unwrap_or_default();

        let owned_schema;
        let schema = match valid_attributes {
            Some(schema) => schema,
            None => {
                owned_schema = self
                    .schema
                    .lookup_all(resource.resource_type(), resource.site_id());
                &owned_schema
            }
        };

        for name in attributes.keys() {
            if !schema.contains_key(name) {
                return Err(ValidationError::field(
                    "attributes",
                    format!("Attribute name ({name}) does not exist."),
                )
                .into());
            }
        }

        let mut candidate: AttributeMap = if partial {
            let mut merged = resource.get_attributes().clone();
            for (name, value) in attributes {
                match value {
                    Some(value) => merged.insert(name, value),
                    None => merged.remove(&name),
                };
            }
            merged
        } else {
            attributes
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| (name, v)))
                .collect()
        };

        if !partial {
            for attr in schema.values() {
                if let Some(default) = attr.default.as_ref() {
                    candidate
                        .entry(attr.name.clone())
                        .or_insert_with(|| default.clone());
                }
            }
        }

        self.check_dependencies(&candidate, schema)?;

        let missing: Vec<&str> = schema
            .values()
            .filter(|attr| attr.required && !candidate.contains_key(&attr.name))
            .map(|attr| attr.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::field(
                "attributes",
                format!("Missing required attributes: {}", missing.join(", ")),
            )
            .into());
        }

        let mut inserts = Vec::new();
        for (name, value) in candidate.iter() {
            let attr = schema.get(name).ok_or_else(|| {
                ValidationError::field(
                    "attributes",
                    format!("Attribute name ({name}) does not exist."),
                )
            })?;
            let mut seen = BTreeSet::new();
            for scalar in attr.validate_value(value)? {
                if !seen.insert(scalar.clone()) {
                    return Err(NsotError::Conflict(format!(
                        "Duplicate value {scalar:?} for attribute {name}"
                    )));
                }
                inserts.push(NewValue {
                    attribute_id: attr.id,
                    name: attr.name.clone(),
                    value: scalar,
                    site_id: attr.site_id,
                });
            }
        }

        let resource_type = resource.resource_type();
        let resource_id = resource.id();
        let purged = self.values.purge(resource_type, resource_id);
        tracing::debug!(
            "replacing {} value rows of {resource_type} {resource_id} with {}",
            purged.len(),
            inserts.len()
        );
        for insert in inserts {
            self.values.insert(resource_type, resource_id, insert)?;
        }

        let multi: BTreeMap<AttributeId, bool> =
            schema.values().map(|attr| (attr.id, attr.multi)).collect();
        resource.core_mut().attributes =
            self.values
                .collect_attributes(resource_type, resource_id, |id| {
                    multi.get(&id).copied().unwrap_or(false)
                });
        Ok(())
    }

    /// Every attribute in `candidate` must have all of its transitive dependencies present too.
    fn check_dependencies(
        &self,
        candidate: &AttributeMap,
        schema: &BTreeMap<String, AttributeDefinition>,
    ) -> Result<(), ValidationError> {
        for name in candidate.keys() {
            let Some(attr) = schema.get(name) else {
                continue;
            };
            for dep in self.schema.get_all_dependencies(attr.id) {
                if !candidate.contains_key(&dep.name) {
                    return Err(ValidationError::field(
                        "attributes",
                        format!("Attribute {} requires {}.", attr.name, dep.name),
                    ));
                }
            }
        }
        Ok(())
    }
}
