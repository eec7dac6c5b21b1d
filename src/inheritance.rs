//! Attribute inheritance across the Network and Interface forests.
use petgraph::{
    graphmap::DiGraphMap,
    visit::{depth_first_search, DfsEvent},
    Direction,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    attribute::AttributeDefinition,
    properties::{AttrValue, ResourceId},
    resource::AttributeBearer,
};

pub const SOURCE_SELF: &str = "self";

/// Parent to child edges of one hierarchical resource type.
#[derive(Debug, Clone, Default)]
pub struct ResourceTree(DiGraphMap<ResourceId, ()>);

impl ResourceTree {
    /// Build from `(id, parent)` pairs. Parents outside the given set are still linked.
    pub fn from_parents<I>(nodes: I) -> ResourceTree
    where
        I: IntoIterator<Item = (ResourceId, Option<ResourceId>)>,
    {
        let mut graph = DiGraphMap::new();
        for (id, parent) in nodes {
            graph.add_node(id);
            if let Some(parent) = parent {
                graph.add_edge(parent, id, ());
            }
        }
        ResourceTree(graph)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.0.contains_node(id)
    }

    pub fn parent(&self, id: ResourceId) -> Option<ResourceId> {
        if !self.0.contains_node(id) {
            return None;
        }
        self.0.neighbors_directed(id, Direction::Incoming).next()
    }

    pub fn children(&self, id: ResourceId) -> BTreeSet<ResourceId> {
        if !self.0.contains_node(id) {
            return BTreeSet::new();
        }
        self.0.neighbors_directed(id, Direction::Outgoing).collect()
    }

    /// Nearest first. Stops if the parent chain loops.
    pub fn ancestors(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut seen = BTreeSet::from([id]);
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// All descendants of every root in `roots`, excluding the roots themselves unless one is a
    /// descendant of another.
    pub fn descendants<I>(&self, roots: I) -> BTreeSet<ResourceId>
    where
        I: IntoIterator<Item = ResourceId>,
    {
        let roots: Vec<ResourceId> = roots
            .into_iter()
            .filter(|id| self.0.contains_node(*id))
            .collect();
        let mut found = BTreeSet::new();
        for root in roots.iter() {
            depth_first_search(&self.0, Some(*root), |event| {
                if let DfsEvent::TreeEdge(_, child) = event {
                    found.insert(child);
                }
            });
        }
        found
    }

    /// Widen `explicit` matches to the descendants that inherit the matched value. A descendant
    /// in `overriders` carries its own different value; it and its whole subtree are left out.
    pub fn expand_matches(
        &self,
        explicit: &BTreeSet<ResourceId>,
        overriders: &BTreeSet<ResourceId>,
    ) -> BTreeSet<ResourceId> {
        let descendants = self.descendants(explicit.iter().copied());
        let blocked: BTreeSet<ResourceId> = descendants.intersection(overriders).copied().collect();
        let blocked_descendants = self.descendants(blocked.iter().copied());
        let mut result = explicit.clone();
        result.extend(
            descendants
                .iter()
                .filter(|id| !blocked.contains(id) && !blocked_descendants.contains(id)),
        );
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedAttribute {
    pub value: AttrValue,
    pub inherited: bool,
    /// `"self"`, or the label of the ancestor the value came from.
    pub source: String,
}

/// Explicit attributes of `resource` plus every inheritable attribute it lacks but an ancestor
/// sets. `lookup` resolves ancestors by id; the walk follows [AttributeBearer::parent].
pub fn merged_attributes<'a, R, F>(
    resource: &R,
    inheritable: &[&AttributeDefinition],
    lookup: F,
) -> BTreeMap<String, MergedAttribute>
where
    R: AttributeBearer + ?Sized,
    F: Fn(ResourceId) -> Option<&'a dyn AttributeBearer>,
{
    let mut merged: BTreeMap<String, MergedAttribute> = resource
        .get_attributes()
        .iter()
        .map(|(name, value)| {
            (
                name.clone(),
                MergedAttribute {
                    value: value.clone(),
                    inherited: false,
                    source: SOURCE_SELF.to_string(),
                },
            )
        })
        .collect();

    let mut pending: BTreeSet<&str> = inheritable
        .iter()
        .filter(|attr| attr.inheritable && !merged.contains_key(&attr.name))
        .map(|attr| attr.name.as_str())
        .collect();

    let mut seen = BTreeSet::from([resource.id()]);
    let mut next = resource.parent();
    while let Some(parent_id) = next {
        if pending.is_empty() || !seen.insert(parent_id) {
            break;
        }
        let Some(ancestor) = lookup(parent_id) else {
            break;
        };
        let attrs = ancestor.get_attributes();
        pending.retain(|name| match attrs.get(*name) {
            Some(value) => {
                merged.insert(
                    name.to_string(),
                    MergedAttribute {
                        value: value.clone(),
                        inherited: true,
                        source: ancestor.label(),
                    },
                );
                false
            }
            None => true,
        });
        next = ancestor.parent();
    }
    merged
}
