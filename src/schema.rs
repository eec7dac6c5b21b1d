//! [AttributeStore] owns every [AttributeDefinition] together with the `depends_on` graph between
//! them. Definitions are unique per (site, resource type, name).
use std::collections::BTreeMap;

use crate::{
    attribute::{AttributeDefinition, AttributeSpec},
    config::NameRules,
    dependency::DependencyGraph,
    error::{NsotError, ValidationError},
    properties::{AttributeId, ResourceType, SiteId},
};

type ScopeKey = (SiteId, ResourceType, String);

#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    definitions: BTreeMap<AttributeId, AttributeDefinition>,
    index: BTreeMap<ScopeKey, AttributeId>,
    graph: DependencyGraph,
    rules: NameRules,
    next_id: u64,
}

impl AttributeStore {
    pub fn new(rules: NameRules) -> AttributeStore {
        AttributeStore {
            rules,
            ..Default::default()
        }
    }

    pub fn rules(&self) -> &NameRules {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.definitions.values()
    }

    pub fn get(&self, id: AttributeId) -> Option<&AttributeDefinition> {
        self.definitions.get(&id)
    }

    pub fn lookup(
        &self,
        site_id: SiteId,
        resource_type: ResourceType,
        name: &str,
    ) -> Option<&AttributeDefinition> {
        self.index
            .get(&(site_id, resource_type, name.to_string()))
            .and_then(|id| self.definitions.get(id))
    }

    /// Definitions named `name` for `resource_type`, restricted to `site_id` when given.
    pub fn find(
        &self,
        resource_type: ResourceType,
        name: &str,
        site_id: Option<SiteId>,
    ) -> Vec<&AttributeDefinition> {
        self.definitions
            .values()
            .filter(|d| {
                d.resource_type == resource_type
                    && d.name == name
                    && site_id.is_none_or(|site| d.site_id == site)
            })
            .collect()
    }

    /// The full schema of a resource type within a site, keyed by attribute name.
    pub fn lookup_all(
        &self,
        resource_type: ResourceType,
        site_id: SiteId,
    ) -> BTreeMap<String, AttributeDefinition> {
        self.definitions
            .values()
            .filter(|d| d.resource_type == resource_type && d.site_id == site_id)
            .map(|d| (d.name.clone(), d.clone()))
            .collect()
    }

    /// Definitions with (`true`) or without (`false`) outgoing `depends_on` edges.
    pub fn with_dependencies(&self, has_dependencies: bool) -> Vec<&AttributeDefinition> {
        self.definitions
            .values()
            .filter(|d| self.graph.has_dependencies(d.id) == has_dependencies)
            .collect()
    }

    pub fn create(
        &mut self,
        site_id: SiteId,
        spec: &AttributeSpec,
    ) -> Result<AttributeId, NsotError> {
        let id = AttributeId(self.next_id + 1);
        let attr = AttributeDefinition::clean(id, site_id, spec, &self.rules)?;
        let key = (site_id, attr.resource_type, attr.name.clone());
        if self.index.contains_key(&key) {
            return Err(NsotError::Conflict(format!(
                "Attribute {} already exists for {} in {}",
                attr.name, attr.resource_type, site_id
            )));
        }
        let deps = self.resolve_names(&attr, &spec.depends_on)?;

        self.next_id += 1;
        self.index.insert(key, id);
        self.definitions.insert(id, attr);
        self.graph.add_node(id);
        for dep in deps {
            self.graph.add_edge(id, dep);
        }
        if let Err(err) = self.graph.validate(id, &self.definitions) {
            self.remove_unchecked(id);
            return Err(err.into());
        }
        tracing::debug!("created attribute {id}");
        Ok(id)
    }

    /// Replace the mutable fields of a definition. Name, resource type and site are kept; the
    /// `depends_on` edge set is replaced by the names given in `spec`.
    pub fn update(&mut self, id: AttributeId, spec: &AttributeSpec) -> Result<(), NsotError> {
        let current = self
            .definitions
            .get(&id)
            .ok_or_else(|| NsotError::NotFound(format!("Attribute {id}")))?;
        let mut spec = spec.clone();
        spec.name = current.name.clone();
        spec.resource_type = current.resource_type.to_string();
        let updated = AttributeDefinition::clean(id, current.site_id, &spec, &self.rules)?;
        let new_deps = self.resolve_names(&updated, &spec.depends_on)?;

        let old_deps = self.graph.depends_on(id);
        let previous = self.definitions.insert(id, updated);
        for dep in old_deps.iter() {
            self.graph.remove_edge(id, *dep);
        }
        for dep in new_deps.iter() {
            self.graph.add_edge(id, *dep);
        }
        if let Err(err) = self.graph.validate(id, &self.definitions) {
            for dep in new_deps.iter() {
                self.graph.remove_edge(id, *dep);
            }
            for dep in old_deps.iter() {
                self.graph.add_edge(id, *dep);
            }
            if let Some(previous) = previous {
                self.definitions.insert(id, previous);
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Fails while any other definition depends on `id`.
    pub fn check_no_dependents(&self, id: AttributeId) -> Result<(), NsotError> {
        let attr = self.require(id)?;
        let dependents = self.dependent_names(id);
        if !dependents.is_empty() {
            return Err(ValidationError::field(
                "depends_on",
                format!(
                    "Cannot delete attribute {}: it is required by {}.",
                    attr.name,
                    dependents.join(", ")
                ),
            )
            .into());
        }
        Ok(())
    }

    /// Remove a definition. Fails while any other definition depends on it.
    pub fn delete(&mut self, id: AttributeId) -> Result<AttributeDefinition, NsotError> {
        self.check_no_dependents(id)?;
        self.remove_unchecked(id)
            .ok_or_else(|| NsotError::NotFound(format!("Attribute {id}")))
    }

    fn remove_unchecked(&mut self, id: AttributeId) -> Option<AttributeDefinition> {
        let attr = self.definitions.remove(&id)?;
        self.index
            .remove(&(attr.site_id, attr.resource_type, attr.name.clone()));
        self.graph.remove_node(id);
        Some(attr)
    }

    /// Add `from -> to` without validating it.
    pub fn add_dependency(&mut self, from: AttributeId, to: AttributeId) -> Result<(), NsotError> {
        self.require(from)?;
        self.require(to)?;
        self.graph.add_edge(from, to);
        Ok(())
    }

    /// Add `from -> to` and validate `from`; the edge is removed again if validation fails.
    pub fn link_dependency(&mut self, from: AttributeId, to: AttributeId) -> Result<(), NsotError> {
        self.require(from)?;
        self.require(to)?;
        let added = self.graph.add_edge(from, to);
        if let Err(err) = self.graph.validate(from, &self.definitions) {
            if added {
                self.graph.remove_edge(from, to);
            }
            return Err(err.into());
        }
        Ok(())
    }

    pub fn remove_dependency(&mut self, from: AttributeId, to: AttributeId) -> bool {
        self.graph.remove_edge(from, to)
    }

    pub fn validate_dependencies(&self, id: AttributeId) -> Result<(), NsotError> {
        self.require(id)?;
        Ok(self.graph.validate(id, &self.definitions)?)
    }

    /// Transitive closure of `depends_on`, excluding the definition itself.
    pub fn get_all_dependencies(&self, id: AttributeId) -> Vec<&AttributeDefinition> {
        self.graph
            .all_dependencies(id)
            .into_iter()
            .filter_map(|dep| self.definitions.get(&dep))
            .collect()
    }

    /// Ids of the direct dependencies.
    pub fn dependency_ids(&self, id: AttributeId) -> Vec<AttributeId> {
        self.graph.depends_on(id).into_iter().collect()
    }

    /// Names of the direct dependencies, sorted.
    pub fn depends_on_names(&self, id: AttributeId) -> Vec<String> {
        let mut names: Vec<String> = self
            .graph
            .depends_on(id)
            .into_iter()
            .filter_map(|dep| self.definitions.get(&dep).map(|d| d.name.clone()))
            .collect();
        names.sort();
        names
    }

    pub fn dependent_names(&self, id: AttributeId) -> Vec<String> {
        let mut names: Vec<String> = self
            .graph
            .dependents(id)
            .into_iter()
            .filter_map(|dep| self.definitions.get(&dep).map(|d| d.name.clone()))
            .collect();
        names.sort();
        names
    }

    /// Serialized definition including its `depends_on` names.
    pub fn to_dict(&self, id: AttributeId) -> Option<serde_json::Value> {
        self.definitions
            .get(&id)
            .map(|attr| attr.to_dict(&self.depends_on_names(id)))
    }

    fn require(&self, id: AttributeId) -> Result<&AttributeDefinition, NsotError> {
        self.definitions
            .get(&id)
            .ok_or_else(|| NsotError::NotFound(format!("Attribute {id}")))
    }

    /// Resolve `depends_on` names within the attribute's site. A name found only under another
    /// resource type resolves to that definition so that validation can report the mismatch.
    fn resolve_names(
        &self,
        attr: &AttributeDefinition,
        names: &[String],
    ) -> Result<Vec<AttributeId>, ValidationError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            if *name == attr.name {
                return Err(ValidationError::field(
                    "depends_on",
                    format!("Attribute {} cannot depend on itself.", attr.name),
                ));
            }
            let found = self
                .lookup(attr.site_id, attr.resource_type, name)
                .or_else(|| {
                    self.definitions
                        .values()
                        .find(|d| d.site_id == attr.site_id && d.name == *name)
                });
            match found {
                Some(dep) => ids.push(dep.id),
                None => {
                    return Err(ValidationError::field(
                        "depends_on",
                        format!("Attribute name ({name}) does not exist."),
                    ))
                }
            }
        }
        Ok(ids)
    }
}
