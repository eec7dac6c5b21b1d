//! The `depends_on` relation between attribute definitions.
//!
//! Edges point from the dependent attribute to the attribute it requires. The graph is allowed to
//! hold invalid edges (self loops, cycles, cross-scope edges) until [DependencyGraph::validate] is
//! run for an attribute, so that callers can add an edge and decide afterwards whether to keep it.
use petgraph::{
    graphmap::DiGraphMap,
    visit::{depth_first_search, Control, DfsEvent},
    Direction,
};
use std::collections::{BTreeMap, BTreeSet};

use crate::{attribute::AttributeDefinition, error::ValidationError, properties::AttributeId};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph(DiGraphMap<AttributeId, ()>);

impl DependencyGraph {
    pub fn new() -> DependencyGraph {
        DependencyGraph(DiGraphMap::new())
    }

    pub fn add_node(&mut self, id: AttributeId) {
        self.0.add_node(id);
    }

    /// Remove the node together with every edge touching it.
    pub fn remove_node(&mut self, id: AttributeId) {
        self.0.remove_node(id);
    }

    /// Insert `from -> to` without any validation. Returns false if the edge already existed.
    pub fn add_edge(&mut self, from: AttributeId, to: AttributeId) -> bool {
        self.0.add_edge(from, to, ()).is_none()
    }

    pub fn remove_edge(&mut self, from: AttributeId, to: AttributeId) -> bool {
        self.0.remove_edge(from, to).is_some()
    }

    /// Direct dependencies of `id`.
    pub fn depends_on(&self, id: AttributeId) -> BTreeSet<AttributeId> {
        if !self.0.contains_node(id) {
            return BTreeSet::new();
        }
        self.0
            .neighbors_directed(id, Direction::Outgoing)
            .collect()
    }

    /// Attributes with a direct edge pointing at `id`.
    pub fn dependents(&self, id: AttributeId) -> BTreeSet<AttributeId> {
        if !self.0.contains_node(id) {
            return BTreeSet::new();
        }
        self.0
            .neighbors_directed(id, Direction::Incoming)
            .filter(|source| *source != id)
            .collect()
    }

    pub fn has_dependencies(&self, id: AttributeId) -> bool {
        self.0.contains_node(id)
            && self
                .0
                .neighbors_directed(id, Direction::Outgoing)
                .next()
                .is_some()
    }

    /// Transitive closure of `depends_on` starting at `id`, not including `id` itself. Terminates
    /// on diamonds and on cycles since the search tracks discovered nodes.
    pub fn all_dependencies(&self, id: AttributeId) -> BTreeSet<AttributeId> {
        let mut found = BTreeSet::new();
        if !self.0.contains_node(id) {
            return found;
        }
        depth_first_search(&self.0, Some(id), |event| {
            if let DfsEvent::Discover(node, _) = event {
                if node != id {
                    found.insert(node);
                }
            }
        });
        found
    }

    /// Check every outgoing edge of `id`: no self reference, dependencies must share the site and
    /// resource type, and no path may lead from a dependency back to `id`.
    pub fn validate(
        &self,
        id: AttributeId,
        definitions: &BTreeMap<AttributeId, AttributeDefinition>,
    ) -> Result<(), ValidationError> {
        let Some(attr) = definitions.get(&id) else {
            return Err(ValidationError::field(
                "depends_on",
                format!("Attribute {id} does not exist."),
            ));
        };
        let deps = self.depends_on(id);
        if deps.contains(&id) {
            return Err(ValidationError::field(
                "depends_on",
                format!("Attribute {} cannot depend on itself.", attr.name),
            ));
        }

        for dep_id in deps.iter() {
            let Some(dep) = definitions.get(dep_id) else {
                return Err(ValidationError::field(
                    "depends_on",
                    format!("Attribute {} depends on unknown attribute {dep_id}.", attr.name),
                ));
            };
            if dep.site_id != attr.site_id {
                return Err(ValidationError::field(
                    "depends_on",
                    format!(
                        "Attribute {} cannot depend on {}: it belongs to a different site.",
                        attr.name, dep.name
                    ),
                ));
            }
            if dep.resource_type != attr.resource_type {
                return Err(ValidationError::field(
                    "depends_on",
                    format!(
                        "Attribute {} cannot depend on {}: resource type {} does not match {}.",
                        attr.name, dep.name, dep.resource_type, attr.resource_type
                    ),
                ));
            }
        }

        for dep_id in deps.iter() {
            let cycle = depth_first_search(&self.0, Some(*dep_id), |event| {
                if let DfsEvent::Discover(node, _) = event {
                    if node == id {
                        return Control::Break(*dep_id);
                    }
                }
                Control::Continue
            });
            if let Some(via) = cycle.break_value() {
                let via_name = definitions
                    .get(&via)
                    .map(|d| d.name.clone())
                    .unwrap_or_else(|| via.to_string());
                return Err(ValidationError::field(
                    "depends_on",
                    format!(
                        "Circular dependency detected: {} -> {} leads back to {}.",
                        attr.name, via_name, attr.name
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn edge_count(&self) -> usize {
        self.0.edge_count()
    }
}
