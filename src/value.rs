//! Attribute values: one stored row per scalar fact binding a resource to an attribute name.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::NsotError,
    properties::{AttrValue, AttributeId, AttributeMap, ResourceId, ResourceType, SiteId, ValueId},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRow {
    pub id: ValueId,
    pub attribute_id: AttributeId,
    /// Copy of the attribute name.
    pub name: String,
    pub value: String,
    pub resource_type: ResourceType,
    pub resource_id: ResourceId,
    /// Copy of the attribute's site.
    pub site_id: SiteId,
}

impl ValueRow {
    fn unique_key(&self) -> ValueKey {
        (
            self.name.clone(),
            self.value.clone(),
            self.resource_type,
            self.resource_id,
        )
    }
}

type ValueKey = (String, String, ResourceType, ResourceId);

/// How a value row is matched by a lookup.
#[derive(Debug, Clone)]
pub enum ValueMatch {
    Exact(String),
    /// Unanchored regex search over the stored value.
    Regex(Regex),
    /// Any stored value.
    Any,
}

impl ValueMatch {
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            ValueMatch::Exact(expected) => expected == value,
            ValueMatch::Regex(re) => re.is_match(value),
            ValueMatch::Any => true,
        }
    }
}

/// A value about to be inserted. Produced by the binder from validated input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewValue {
    pub attribute_id: AttributeId,
    pub name: String,
    pub value: String,
    pub site_id: SiteId,
}

#[derive(Debug, Clone, Default)]
pub struct ValueStore {
    rows: BTreeMap<ValueId, ValueRow>,
    unique: BTreeSet<ValueKey>,
    by_resource: BTreeMap<(ResourceType, ResourceId), BTreeSet<ValueId>>,
    next_id: u64,
}

impl ValueStore {
    pub fn new() -> ValueStore {
        ValueStore::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: ValueId) -> Option<&ValueRow> {
        self.rows.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueRow> {
        self.rows.values()
    }

    /// Would inserting `value` for this resource violate the unique index?
    pub fn contains(
        &self,
        name: &str,
        value: &str,
        resource_type: ResourceType,
        resource_id: ResourceId,
    ) -> bool {
        self.unique.contains(&(
            name.to_string(),
            value.to_string(),
            resource_type,
            resource_id,
        ))
    }

    pub fn insert(
        &mut self,
        resource_type: ResourceType,
        resource_id: ResourceId,
        new: NewValue,
    ) -> Result<ValueId, NsotError> {
        self.next_id += 1;
        let row = ValueRow {
            id: ValueId(self.next_id),
            attribute_id: new.attribute_id,
            name: new.name,
            value: new.value,
            resource_type,
            resource_id,
            site_id: new.site_id,
        };
        if !self.unique.insert(row.unique_key()) {
            return Err(NsotError::Conflict(format!(
                "Duplicate value {:?} for attribute {} on {} {}",
                row.value, row.name, resource_type, resource_id
            )));
        }
        self.by_resource
            .entry((resource_type, resource_id))
            .or_default()
            .insert(row.id);
        let id = row.id;
        self.rows.insert(id, row);
        Ok(id)
    }

    /// Delete every row owned by the resource. Returns the removed rows.
    pub fn purge(&mut self, resource_type: ResourceType, resource_id: ResourceId) -> Vec<ValueRow> {
        let ids = self
            .by_resource
            .remove(&(resource_type, resource_id))
            .unwrap_or_default();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.rows.remove(&id) {
                self.unique.remove(&row.unique_key());
                removed.push(row);
            }
        }
        removed
    }

    /// Rows owned by the resource in insertion order.
    pub fn rows_for(&self, resource_type: ResourceType, resource_id: ResourceId) -> Vec<&ValueRow> {
        self.by_resource
            .get(&(resource_type, resource_id))
            .map(|ids| ids.iter().filter_map(|id| self.rows.get(id)).collect())
            .unwrap_or_default()
    }

    /// Number of rows referencing the attribute definition.
    pub fn count_for_attribute(&self, attribute_id: AttributeId) -> usize {
        self.rows
            .values()
            .filter(|row| row.attribute_id == attribute_id)
            .count()
    }

    /// Resources of `resource_type` holding a value for `name` that satisfies `matcher`.
    pub fn matching(
        &self,
        resource_type: ResourceType,
        name: &str,
        matcher: &ValueMatch,
    ) -> BTreeSet<ResourceId> {
        self.rows
            .values()
            .filter(|row| {
                row.resource_type == resource_type && row.name == name && matcher.is_match(&row.value)
            })
            .map(|row| row.resource_id)
            .collect()
    }

    /// Rebuild the attribute map of a resource from its rows. `is_multi` reports whether the
    /// referenced definition holds a list.
    pub fn collect_attributes<F>(
        &self,
        resource_type: ResourceType,
        resource_id: ResourceId,
        is_multi: F,
    ) -> AttributeMap
    where
        F: Fn(AttributeId) -> bool,
    {
        let mut attrs = AttributeMap::new();
        for row in self.rows_for(resource_type, resource_id) {
            if is_multi(row.attribute_id) {
                match attrs
                    .entry(row.name.clone())
                    .or_insert_with(|| AttrValue::Multi(Vec::new()))
                {
                    AttrValue::Multi(list) => list.push(row.value.clone()),
                    single => *single = AttrValue::Multi(vec![row.value.clone()]),
                }
            } else {
                attrs.insert(row.name.clone(), AttrValue::Single(row.value.clone()));
            }
        }
        attrs
    }
}
