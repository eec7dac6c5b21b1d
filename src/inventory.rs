//! [Inventory] is the entry point the serialization layer calls into. It owns the sites, the
//! attribute schema, the value store, every resource and the change log, and keeps them consistent:
//! every mutation either completes (values rewritten, cache recomputed, change recorded, event
//! emitted) or leaves no trace.
use chrono::{DateTime, Duration, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    attribute::{AttributeDefinition, AttributeSpec},
    binder::Binder,
    change::{Change, ChangeEvent, ChangeLog, ResourceDiff},
    cidr::Cidr,
    config::NsotConfig,
    error::{NsotError, ValidationError},
    event::{EventOrigin, InventoryEvent},
    inheritance::{merged_attributes, MergedAttribute, ResourceTree},
    properties::{AttrValue, AttributeId, AttributePatch, ResourceId, ResourceType, SiteId},
    query::{QueryContext, SetQuery},
    resource::{
        clean_asn, clean_hostname, clean_label, AttributeBearer, AutonomousSystem, Circuit, Device,
        Interface, Network, Protocol, Resource, ResourceCore, Site,
    },
    schema::AttributeStore,
    value::ValueStore,
};

pub const SITE_RESOURCE_NAME: &str = "Site";
pub const ATTRIBUTE_RESOURCE_NAME: &str = "Attribute";
pub const DEFAULT_EXPIRING_DAYS: i64 = 7;

/// The type-specific part of a new resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource_name")]
pub enum NewResource {
    Device {
        hostname: String,
    },
    Network {
        cidr: String,
    },
    Interface {
        device: ResourceId,
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        parent: Option<ResourceId>,
    },
    Circuit {
        name: String,
        endpoint_a: ResourceId,
        #[serde(default)]
        endpoint_z: Option<ResourceId>,
    },
    AutonomousSystem {
        number: u64,
        #[serde(default)]
        description: String,
    },
    Protocol {
        #[serde(rename = "type")]
        protocol_type: String,
        device: ResourceId,
        #[serde(default)]
        interface: Option<ResourceId>,
        #[serde(default)]
        circuit: Option<ResourceId>,
        #[serde(default)]
        description: String,
    },
}

impl NewResource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            NewResource::Device { .. } => ResourceType::Device,
            NewResource::Network { .. } => ResourceType::Network,
            NewResource::Interface { .. } => ResourceType::Interface,
            NewResource::Circuit { .. } => ResourceType::Circuit,
            NewResource::AutonomousSystem { .. } => ResourceType::AutonomousSystem,
            NewResource::Protocol { .. } => ResourceType::Protocol,
        }
    }
}

/// Everything needed to create a resource. `site_id` may be omitted for resources whose site is
/// derived from a related resource (Interface, Circuit, Protocol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub site_id: Option<SiteId>,
    #[serde(flatten)]
    pub kind: NewResource,
    #[serde(default)]
    pub attributes: Option<AttributePatch>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResourceSpec {
    pub fn new(site_id: Option<SiteId>, kind: NewResource) -> ResourceSpec {
        ResourceSpec {
            site_id,
            kind,
            attributes: None,
            expires_at: None,
        }
    }

    pub fn device<S: Into<String>>(site_id: SiteId, hostname: S) -> ResourceSpec {
        ResourceSpec::new(
            Some(site_id),
            NewResource::Device {
                hostname: hostname.into(),
            },
        )
    }

    pub fn network<S: Into<String>>(site_id: SiteId, cidr: S) -> ResourceSpec {
        ResourceSpec::new(Some(site_id), NewResource::Network { cidr: cidr.into() })
    }

    pub fn interface<S: Into<String>>(device: ResourceId, name: S) -> ResourceSpec {
        ResourceSpec::new(
            None,
            NewResource::Interface {
                device,
                name: name.into(),
                description: String::new(),
                parent: None,
            },
        )
    }

    pub fn circuit<S: Into<String>>(name: S, endpoint_a: ResourceId) -> ResourceSpec {
        ResourceSpec::new(
            None,
            NewResource::Circuit {
                name: name.into(),
                endpoint_a,
                endpoint_z: None,
            },
        )
    }

    pub fn autonomous_system(site_id: SiteId, number: u64) -> ResourceSpec {
        ResourceSpec::new(
            Some(site_id),
            NewResource::AutonomousSystem {
                number,
                description: String::new(),
            },
        )
    }

    pub fn protocol<S: Into<String>>(device: ResourceId, protocol_type: S) -> ResourceSpec {
        ResourceSpec::new(
            None,
            NewResource::Protocol {
                protocol_type: protocol_type.into(),
                device,
                interface: None,
                circuit: None,
                description: String::new(),
            },
        )
    }

    /// Set the parent of an Interface. Ignored by other resource types.
    pub fn parent(mut self, parent: ResourceId) -> ResourceSpec {
        if let NewResource::Interface { parent: p, .. } = &mut self.kind {
            *p = Some(parent);
        }
        self
    }

    /// Set the Z side of a Circuit. Ignored by other resource types.
    pub fn endpoint_z(mut self, endpoint: ResourceId) -> ResourceSpec {
        if let NewResource::Circuit { endpoint_z, .. } = &mut self.kind {
            *endpoint_z = Some(endpoint);
        }
        self
    }

    pub fn attributes(mut self, attributes: AttributePatch) -> ResourceSpec {
        self.attributes = Some(attributes);
        self
    }

    pub fn attribute<N: Into<String>, V: Into<AttrValue>>(mut self, name: N, value: V) -> Self {
        self.attributes
            .get_or_insert_with(AttributePatch::new)
            .insert(name.into(), Some(value.into()));
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> ResourceSpec {
        self.expires_at = Some(at);
        self
    }
}

#[derive(Debug, Default)]
pub struct Inventory {
    config: NsotConfig,
    sites: BTreeMap<SiteId, Site>,
    schema: AttributeStore,
    values: ValueStore,
    resources: BTreeMap<ResourceId, Resource>,
    changes: ChangeLog,
    tx: Option<UnboundedSender<InventoryEvent>>,
    next_site: u64,
    next_resource: u64,
}

impl Inventory {
    pub fn new(config: NsotConfig) -> Result<Inventory, NsotError> {
        let rules = config.name_rules()?;
        Ok(Inventory {
            config,
            schema: AttributeStore::new(rules),
            ..Default::default()
        })
    }

    /// Emit an [InventoryEvent] on `tx` after every successful mutation.
    pub fn with_event_sender(mut self, tx: UnboundedSender<InventoryEvent>) -> Inventory {
        self.tx = Some(tx);
        self
    }

    pub fn config(&self) -> &NsotConfig {
        &self.config
    }

    pub fn schema(&self) -> &AttributeStore {
        &self.schema
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn changes(&self) -> &ChangeLog {
        &self.changes
    }

    fn emit(&self, event: InventoryEvent) {
        if let Some(tx) = self.tx.as_ref() {
            if let Err(e) = tx.send(event) {
                tracing::warn!("Event receiver dropped, not forwarding {}", e.0);
            }
        }
    }

    fn record(
        &mut self,
        site_id: SiteId,
        event: ChangeEvent,
        resource_name: &str,
        resource_id: u64,
        snapshot: serde_json::Value,
    ) {
        self.changes.record(
            site_id,
            event,
            resource_name,
            resource_id,
            snapshot,
            Utc::now(),
        );
    }

    fn emit_values(&self, id: ResourceId) {
        if let Some(resource) = self.resources.get(&id) {
            let rows = self
                .values
                .rows_for(resource.resource_type(), id)
                .into_iter()
                .cloned()
                .collect();
            self.emit(InventoryEvent::ValuesReplaced(
                resource.resource_type(),
                id,
                resource.site_id(),
                rows,
                EventOrigin::Local,
            ));
        }
    }

    // Sites

    #[tracing::instrument(skip(self))]
    pub fn create_site(&mut self, name: &str, description: &str) -> Result<SiteId, NsotError> {
        let name = clean_label("name", name)?;
        if self.sites.values().any(|s| s.name == name) {
            return Err(NsotError::Conflict(format!("Site {name:?} already exists")));
        }
        self.next_site += 1;
        let site = Site {
            id: SiteId(self.next_site),
            name,
            description: description.to_string(),
        };
        let id = site.id;
        let snapshot = site.to_dict();
        self.sites.insert(id, site);
        self.record(id, ChangeEvent::Create, SITE_RESOURCE_NAME, id.0, snapshot);
        tracing::info!("created site {id}");
        Ok(id)
    }

    pub fn site(&self, id: SiteId) -> Option<&Site> {
        self.sites.get(&id)
    }

    pub fn site_by_name(&self, name: &str) -> Option<&Site> {
        self.sites.values().find(|s| s.name == name)
    }

    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    /// Sites that still own attributes or resources cannot be deleted.
    #[tracing::instrument(skip(self))]
    pub fn delete_site(&mut self, id: SiteId) -> Result<(), NsotError> {
        let site = self
            .sites
            .get(&id)
            .ok_or_else(|| NsotError::NotFound(format!("Site {id}")))?;
        let in_use = self.schema.iter().any(|a| a.site_id == id)
            || self.resources.values().any(|r| r.site_id() == id);
        if in_use {
            return Err(NsotError::Conflict(format!(
                "Site {:?} still has attributes or resources",
                site.name
            )));
        }
        let snapshot = site.to_dict();
        self.sites.remove(&id);
        self.record(id, ChangeEvent::Delete, SITE_RESOURCE_NAME, id.0, snapshot);
        tracing::info!("deleted site {id}");
        Ok(())
    }

    fn require_site(&self, id: SiteId) -> Result<&Site, NsotError> {
        self.sites
            .get(&id)
            .ok_or_else(|| NsotError::NotFound(format!("Site {id}")))
    }

    // Attribute definitions

    #[tracing::instrument(skip(self))]
    pub fn create_attribute(
        &mut self,
        site_id: SiteId,
        spec: &AttributeSpec,
    ) -> Result<AttributeId, NsotError> {
        self.require_site(site_id)?;
        let id = self.schema.create(site_id, spec)?;
        self.attribute_changed(id, ChangeEvent::Create);
        tracing::info!("created attribute {id}");
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    pub fn update_attribute(
        &mut self,
        id: AttributeId,
        spec: &AttributeSpec,
    ) -> Result<(), NsotError> {
        self.schema.update(id, spec)?;
        self.attribute_changed(id, ChangeEvent::Update);
        Ok(())
    }

    /// Blocked while other definitions depend on it or any resource holds a value for it.
    #[tracing::instrument(skip(self))]
    pub fn delete_attribute(&mut self, id: AttributeId) -> Result<(), NsotError> {
        let snapshot = self
            .schema
            .to_dict(id)
            .ok_or_else(|| NsotError::NotFound(format!("Attribute {id}")))?;
        self.schema.check_no_dependents(id)?;
        let in_use = self.values.count_for_attribute(id);
        if in_use > 0 {
            return Err(NsotError::Conflict(format!(
                "Cannot delete attribute {id}: {in_use} values still reference it"
            )));
        }
        let attr = self.schema.delete(id)?;
        self.record(
            attr.site_id,
            ChangeEvent::Delete,
            ATTRIBUTE_RESOURCE_NAME,
            id.0,
            snapshot,
        );
        self.emit(InventoryEvent::AttributeRemoved(id, EventOrigin::Local));
        tracing::info!("deleted attribute {id}");
        Ok(())
    }

    fn attribute_changed(&mut self, id: AttributeId, event: ChangeEvent) {
        let Some(attr) = self.schema.get(id).cloned() else {
            return;
        };
        if let Some(snapshot) = self.schema.to_dict(id) {
            self.record(attr.site_id, event, ATTRIBUTE_RESOURCE_NAME, id.0, snapshot);
        }
        let deps = self.schema.dependency_ids(id);
        self.emit(InventoryEvent::AttributeUpdate(attr, deps, EventOrigin::Local));
    }

    pub fn attribute(&self, id: AttributeId) -> Option<&AttributeDefinition> {
        self.schema.get(id)
    }

    pub fn lookup_attribute(
        &self,
        site_id: SiteId,
        resource_type: ResourceType,
        name: &str,
    ) -> Option<&AttributeDefinition> {
        self.schema.lookup(site_id, resource_type, name)
    }

    /// Insert a dependency edge without validating it. See [Inventory::validate_dependencies].
    pub fn add_dependency(&mut self, from: AttributeId, to: AttributeId) -> Result<(), NsotError> {
        self.schema.add_dependency(from, to)
    }

    /// Insert a dependency edge and keep it only if the result is valid.
    #[tracing::instrument(skip(self))]
    pub fn link_dependency(&mut self, from: AttributeId, to: AttributeId) -> Result<(), NsotError> {
        self.schema.link_dependency(from, to)?;
        self.attribute_changed(from, ChangeEvent::Update);
        Ok(())
    }

    pub fn validate_dependencies(&self, id: AttributeId) -> Result<(), NsotError> {
        self.schema.validate_dependencies(id)
    }

    pub fn get_all_dependencies(&self, id: AttributeId) -> Vec<&AttributeDefinition> {
        self.schema.get_all_dependencies(id)
    }

    // Resources

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(&id)
    }

    fn require(&self, id: ResourceId) -> Result<&Resource, NsotError> {
        self.resources
            .get(&id)
            .ok_or_else(|| NsotError::NotFound(format!("Resource {id}")))
    }

    /// Resources of one type, optionally narrowed to a site, in id order.
    pub fn resources(
        &self,
        resource_type: ResourceType,
        site_id: Option<SiteId>,
    ) -> impl Iterator<Item = &Resource> {
        self.resources.values().filter(move |r| {
            r.resource_type() == resource_type && site_id.is_none_or(|s| r.site_id() == s)
        })
    }

    pub fn candidates(
        &self,
        resource_type: ResourceType,
        site_id: Option<SiteId>,
    ) -> BTreeSet<ResourceId> {
        self.resources(resource_type, site_id)
            .map(|r| r.id())
            .collect()
    }

    /// Validate and insert a resource, then bind its attributes. If the attributes are rejected
    /// the freshly inserted resource is deleted again before the error is returned.
    #[tracing::instrument(skip(self))]
    pub fn create_resource(&mut self, spec: ResourceSpec) -> Result<ResourceId, NsotError> {
        let id = ResourceId(self.next_resource + 1);
        let resource = self.build_resource(id, &spec)?;
        self.next_resource += 1;
        let moved = self.insert_resource(resource);

        let result = {
            let Some(resource) = self.resources.get_mut(&id) else {
                return Err(NsotError::NotFound(format!("Resource {id}")));
            };
            let mut binder = Binder::new(&self.schema, &mut self.values);
            binder.set_attributes(resource, spec.attributes.clone(), None, false)
        };
        if let Err(err) = result {
            tracing::warn!("attributes rejected for new resource {id}, deleting it: {err}");
            self.remove_resource_row(id);
            return Err(err);
        }

        if let Some(resource) = self.resources.get(&id) {
            let snapshot = resource.to_dict();
            let site_id = resource.site_id();
            let resource_name = resource.resource_type().as_str();
            let label = resource.label();
            self.record(site_id, ChangeEvent::Create, resource_name, id.0, snapshot);
            tracing::info!("created {resource_name} {label}");
        }
        for child in moved {
            self.resource_updated(child);
        }
        self.emit_values(id);
        Ok(id)
    }

    /// Replace (or with `partial`, merge into) the attributes of an existing resource.
    #[tracing::instrument(skip(self))]
    pub fn update_attributes(
        &mut self,
        id: ResourceId,
        attributes: Option<AttributePatch>,
        partial: bool,
    ) -> Result<(), NsotError> {
        let resource = self
            .resources
            .get_mut(&id)
            .ok_or_else(|| NsotError::NotFound(format!("Resource {id}")))?;
        let mut binder = Binder::new(&self.schema, &mut self.values);
        if let Err(err) = binder.set_attributes(resource, attributes, None, partial) {
            tracing::warn!("attribute update rejected for {id}: {err}");
            return Err(err);
        }
        self.resource_updated(id);
        self.emit_values(id);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn set_expiry(
        &mut self,
        id: ResourceId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), NsotError> {
        let resource = self
            .resources
            .get_mut(&id)
            .ok_or_else(|| NsotError::NotFound(format!("Resource {id}")))?;
        resource.core_mut().expires_at = expires_at;
        self.resource_updated(id);
        Ok(())
    }

    fn resource_updated(&mut self, id: ResourceId) {
        if let Some(resource) = self.resources.get(&id) {
            let snapshot = resource.to_dict();
            let site_id = resource.site_id();
            let resource_name = resource.resource_type().as_str();
            self.record(site_id, ChangeEvent::Update, resource_name, id.0, snapshot);
        }
    }

    /// Delete a resource and its values. Devices take their interfaces and protocols with them;
    /// the children of a deleted network or interface move up to its parent.
    #[tracing::instrument(skip(self))]
    pub fn delete_resource(&mut self, id: ResourceId) -> Result<(), NsotError> {
        let resource = self.require(id)?;
        let mut doomed = vec![id];
        if let Resource::Device(_) = resource {
            let mut owned: Vec<ResourceId> = self
                .resources
                .values()
                .filter(|r| match r {
                    Resource::Interface(i) => i.device == id,
                    Resource::Protocol(p) => p.device == id,
                    _ => false,
                })
                .map(|r| r.id())
                .collect();
            doomed.append(&mut owned);
        }

        for victim in doomed.iter() {
            if let Some(circuit) = self.resources.values().find_map(|r| {
                r.as_circuit().filter(|c| {
                    c.endpoint_a == *victim || c.endpoint_z == Some(*victim)
                })
            }) {
                return Err(NsotError::Conflict(format!(
                    "Cannot delete {victim}: it terminates circuit {}",
                    circuit.name
                )));
            }
        }

        // Protocols first, then interfaces, the device last.
        doomed.sort_by_key(|victim| match self.resources.get(victim) {
            Some(Resource::Protocol(_)) => 0,
            Some(Resource::Interface(_)) => 1,
            _ => 2,
        });
        let mut touched = BTreeSet::new();
        for victim in doomed {
            if let Some(resource) = self.resources.get(&victim) {
                let snapshot = resource.to_dict();
                let site_id = resource.site_id();
                let resource_type = resource.resource_type();
                self.record(
                    site_id,
                    ChangeEvent::Delete,
                    resource_type.as_str(),
                    victim.0,
                    snapshot,
                );
                let (_, reparented) = self.remove_resource_row(victim);
                touched.extend(reparented);
                self.emit(InventoryEvent::ResourceRemoved(
                    resource_type,
                    victim,
                    EventOrigin::Local,
                ));
                tracing::info!("deleted {resource_type} {victim}");
            }
        }
        for survivor in touched {
            self.resource_updated(survivor);
        }
        Ok(())
    }

    /// Insert `resource`, returning the networks that moved beneath it.
    fn insert_resource(&mut self, resource: Resource) -> Vec<ResourceId> {
        let id = resource.id();
        let mut moved = Vec::new();
        if let Resource::Network(net) = &resource {
            // Networks sitting directly under the new one's parent and inside its prefix move
            // beneath it.
            moved = self
                .resources
                .values()
                .filter_map(Resource::as_network)
                .filter(|other| {
                    other.core.site_id == net.core.site_id
                        && other.parent == net.parent
                        && net.cidr.is_supernet_of(&other.cidr)
                })
                .map(|other| other.core.id)
                .collect();
            for child in moved.iter() {
                if let Some(other) = self.resources.get_mut(child) {
                    other.set_parent(Some(id));
                }
            }
        }
        self.resources.insert(id, resource);
        moved
    }

    /// Drop the resource, its values and its place in any hierarchy without recording a change.
    /// Also returns the resources that were re-parented or lost a reference to it.
    fn remove_resource_row(&mut self, id: ResourceId) -> (Option<Resource>, Vec<ResourceId>) {
        let Some(resource) = self.resources.remove(&id) else {
            return (None, Vec::new());
        };
        self.values.purge(resource.resource_type(), id);
        let new_parent = resource.parent();
        let mut touched = Vec::new();
        for other in self.resources.values_mut() {
            let hierarchical = other.resource_type() == resource.resource_type()
                && resource.resource_type().is_hierarchical();
            if hierarchical && other.parent() == Some(id) {
                other.set_parent(new_parent);
                touched.push(other.id());
            }
            if let Resource::Protocol(p) = other {
                if p.interface == Some(id) || p.circuit == Some(id) {
                    touched.push(p.core.id);
                }
                if p.interface == Some(id) {
                    p.interface = None;
                }
                if p.circuit == Some(id) {
                    p.circuit = None;
                }
            }
        }
        (Some(resource), touched)
    }

    fn derive_site(
        &self,
        explicit: Option<SiteId>,
        source: ResourceId,
        source_type: ResourceType,
        field: &str,
    ) -> Result<SiteId, NsotError> {
        let source = self.require(source).map_err(|_| {
            NsotError::from(ValidationError::field(
                field,
                format!("{source_type} {source} does not exist."),
            ))
        })?;
        if source.resource_type() != source_type {
            return Err(ValidationError::field(
                field,
                format!("{} is not a {source_type}.", source.id()),
            )
            .into());
        }
        match explicit {
            Some(site) if site != source.site_id() => Err(ValidationError::field(
                "site",
                format!(
                    "Site {site} does not match the site of {source_type} {}.",
                    source.label()
                ),
            )
            .into()),
            _ => Ok(source.site_id()),
        }
    }

    fn build_resource(&self, id: ResourceId, spec: &ResourceSpec) -> Result<Resource, NsotError> {
        let site_id = match &spec.kind {
            NewResource::Interface { device, .. } | NewResource::Protocol { device, .. } => {
                self.derive_site(spec.site_id, *device, ResourceType::Device, "device")?
            }
            NewResource::Circuit { endpoint_a, .. } => {
                self.derive_site(spec.site_id, *endpoint_a, ResourceType::Interface, "endpoint_a")?
            }
            _ => spec.site_id.ok_or_else(|| {
                NsotError::from(ValidationError::field("site", "A site must be provided."))
            })?,
        };
        self.require_site(site_id)?;
        let mut core = ResourceCore::new(id, site_id);
        core.expires_at = spec.expires_at;

        let resource = match &spec.kind {
            NewResource::Device { hostname } => {
                let hostname = clean_hostname(hostname, self.schema.rules())?;
                if self
                    .resources(ResourceType::Device, Some(site_id))
                    .filter_map(Resource::as_device)
                    .any(|d| d.hostname == hostname)
                {
                    return Err(NsotError::Conflict(format!(
                        "Device {hostname} already exists in {site_id}"
                    )));
                }
                Resource::Device(Device { core, hostname })
            }
            NewResource::Network { cidr } => {
                let cidr = Cidr::from_str(cidr)?;
                let nets: Vec<&Network> = self
                    .resources(ResourceType::Network, Some(site_id))
                    .filter_map(Resource::as_network)
                    .collect();
                if nets.iter().any(|n| n.cidr == cidr) {
                    return Err(NsotError::Conflict(format!(
                        "Network {cidr} already exists in {site_id}"
                    )));
                }
                let parent = nets
                    .iter()
                    .filter(|n| n.cidr.is_supernet_of(&cidr))
                    .max_by_key(|n| n.cidr.prefix_len())
                    .map(|n| n.core.id);
                Resource::Network(Network { core, cidr, parent })
            }
            NewResource::Interface {
                device,
                name,
                description,
                parent,
            } => {
                let name = clean_label("name", name)?;
                let siblings: Vec<&Interface> = self
                    .resources(ResourceType::Interface, Some(site_id))
                    .filter_map(Resource::as_interface)
                    .filter(|i| i.device == *device)
                    .collect();
                if siblings.iter().any(|i| i.name == name) {
                    return Err(NsotError::Conflict(format!(
                        "Interface {name} already exists on device {device}"
                    )));
                }
                if let Some(parent) = parent {
                    if !siblings.iter().any(|i| i.core.id == *parent) {
                        return Err(ValidationError::field(
                            "parent",
                            format!("Parent {parent} is not an interface of device {device}."),
                        )
                        .into());
                    }
                }
                Resource::Interface(Interface {
                    core,
                    device: *device,
                    name,
                    description: description.clone(),
                    parent: *parent,
                })
            }
            NewResource::Circuit {
                name,
                endpoint_a,
                endpoint_z,
            } => {
                let name = clean_label("name", name)?;
                let circuits: Vec<&Circuit> = self
                    .resources(ResourceType::Circuit, None)
                    .filter_map(Resource::as_circuit)
                    .collect();
                if circuits
                    .iter()
                    .any(|c| c.core.site_id == site_id && c.name == name)
                {
                    return Err(NsotError::Conflict(format!(
                        "Circuit {name} already exists in {site_id}"
                    )));
                }
                if let Some(z) = endpoint_z {
                    if z == endpoint_a {
                        return Err(ValidationError::field(
                            "endpoint_z",
                            "A circuit cannot terminate on the same interface twice.",
                        )
                        .into());
                    }
                    self.derive_site(None, *z, ResourceType::Interface, "endpoint_z")?;
                }
                for endpoint in std::iter::once(endpoint_a).chain(endpoint_z.iter()) {
                    if circuits.iter().any(|c| {
                        c.endpoint_a == *endpoint || c.endpoint_z == Some(*endpoint)
                    }) {
                        return Err(NsotError::Conflict(format!(
                            "Interface {endpoint} already terminates a circuit"
                        )));
                    }
                }
                Resource::Circuit(Circuit {
                    core,
                    name,
                    endpoint_a: *endpoint_a,
                    endpoint_z: *endpoint_z,
                })
            }
            NewResource::AutonomousSystem {
                number,
                description,
            } => {
                let number = clean_asn(*number)?;
                if self
                    .resources(ResourceType::AutonomousSystem, Some(site_id))
                    .filter_map(Resource::as_autonomous_system)
                    .any(|a| a.number == number)
                {
                    return Err(NsotError::Conflict(format!(
                        "AS{number} already exists in {site_id}"
                    )));
                }
                Resource::AutonomousSystem(AutonomousSystem {
                    core,
                    number,
                    description: description.clone(),
                })
            }
            NewResource::Protocol {
                protocol_type,
                device,
                interface,
                circuit,
                description,
            } => {
                let protocol_type = clean_label("type", protocol_type)?;
                if let Some(interface) = interface {
                    let belongs = self
                        .get(*interface)
                        .and_then(Resource::as_interface)
                        .is_some_and(|i| i.device == *device);
                    if !belongs {
                        return Err(ValidationError::field(
                            "interface",
                            format!("Interface {interface} is not on device {device}."),
                        )
                        .into());
                    }
                }
                if let Some(circuit) = circuit {
                    if self.get(*circuit).and_then(Resource::as_circuit).is_none() {
                        return Err(ValidationError::field(
                            "circuit",
                            format!("Circuit {circuit} does not exist."),
                        )
                        .into());
                    }
                }
                Resource::Protocol(Protocol {
                    core,
                    protocol_type,
                    device: *device,
                    interface: *interface,
                    circuit: *circuit,
                    description: description.clone(),
                })
            }
        };
        Ok(resource)
    }

    /// Circuits terminating on any interface of the device.
    pub fn device_circuits(&self, device: ResourceId) -> Vec<&Circuit> {
        let interfaces: BTreeSet<ResourceId> = self
            .resources(ResourceType::Interface, None)
            .filter_map(Resource::as_interface)
            .filter(|i| i.device == device)
            .map(|i| i.core.id)
            .collect();
        self.resources(ResourceType::Circuit, None)
            .filter_map(Resource::as_circuit)
            .filter(|c| {
                interfaces.contains(&c.endpoint_a)
                    || c.endpoint_z.is_some_and(|z| interfaces.contains(&z))
            })
            .collect()
    }

    // Queries

    fn collect(&self, ids: BTreeSet<ResourceId>) -> Vec<&Resource> {
        ids.into_iter()
            .filter_map(|id| self.resources.get(&id))
            .collect()
    }

    /// Evaluate a set query against resources of `resource_type`.
    #[tracing::instrument(skip(self))]
    pub fn set_query(
        &self,
        resource_type: ResourceType,
        query: &str,
        site_id: Option<SiteId>,
        unique: bool,
    ) -> Result<Vec<&Resource>, NsotError> {
        let parsed = SetQuery::parse(resource_type, query, site_id)?;
        let candidates = self.candidates(resource_type, site_id);
        let ids = QueryContext::new(&self.schema, &self.values).set_query(
            &candidates,
            &parsed,
            unique,
        )?;
        Ok(self.collect(ids))
    }

    /// Attribute filtering as done for list endpoints: a set query in which intersection terms on
    /// inheritable attributes also match the descendants that inherit the value.
    #[tracing::instrument(skip(self))]
    pub fn filter_by_attributes(
        &self,
        resource_type: ResourceType,
        query: &str,
        site_id: Option<SiteId>,
    ) -> Result<Vec<&Resource>, NsotError> {
        let parsed = SetQuery::parse(resource_type, query, site_id)?;
        let candidates = self.candidates(resource_type, site_id);
        let tree = self.resource_tree(resource_type, site_id);
        let ids = QueryContext::new(&self.schema, &self.values)
            .with_inheritance(&tree)
            .set_query(&candidates, &parsed, false)?;
        Ok(self.collect(ids))
    }

    pub fn by_attribute(
        &self,
        resource_type: ResourceType,
        name: &str,
        value: &str,
        site_id: Option<SiteId>,
    ) -> Vec<&Resource> {
        let candidates = self.candidates(resource_type, site_id);
        let ids = QueryContext::new(&self.schema, &self.values).by_attribute(
            &candidates,
            resource_type,
            name,
            value,
        );
        self.collect(ids)
    }

    /// Parent links of one hierarchical resource type.
    pub fn resource_tree(
        &self,
        resource_type: ResourceType,
        site_id: Option<SiteId>,
    ) -> ResourceTree {
        ResourceTree::from_parents(
            self.resources(resource_type, site_id)
                .map(|r| (r.id(), r.parent())),
        )
    }

    /// Explicit attributes of the resource plus the inheritable ones it takes from its ancestors.
    pub fn merged_attributes(
        &self,
        id: ResourceId,
    ) -> Result<BTreeMap<String, MergedAttribute>, NsotError> {
        let resource = self.require(id)?;
        let inheritable: Vec<&AttributeDefinition> = self
            .schema
            .iter()
            .filter(|a| {
                a.inheritable
                    && a.site_id == resource.site_id()
                    && a.resource_type == resource.resource_type()
            })
            .collect();
        Ok(merged_attributes(resource, &inheritable, |parent| {
            self.resources
                .get(&parent)
                .map(|r| r as &dyn AttributeBearer)
        }))
    }

    /// With `expired`, resources whose expiry has passed. Otherwise those without an expiry or
    /// with one still in the future.
    pub fn expired(
        &self,
        resource_type: ResourceType,
        now: DateTime<Utc>,
        expired: bool,
    ) -> Vec<&Resource> {
        self.resources(resource_type, None)
            .filter(|r| r.core().is_expired(now) == expired)
            .collect()
    }

    /// Resources expiring after `now` but no later than `days` from now.
    pub fn expiring_within_days(
        &self,
        resource_type: ResourceType,
        now: DateTime<Utc>,
        days: i64,
    ) -> Vec<&Resource> {
        let cutoff = now + Duration::days(days);
        self.resources(resource_type, None)
            .filter(|r| r.expires_at().is_some_and(|at| now < at && at <= cutoff))
            .collect()
    }

    /// Per-key diff of a recorded change against the previous change to the same resource.
    pub fn resource_diff(&self, change_id: u64) -> Result<ResourceDiff, NsotError> {
        let change: &Change = self
            .changes
            .get(change_id)
            .ok_or_else(|| NsotError::NotFound(format!("Change {change_id}")))?;
        Ok(self.changes.resource_diff(change))
    }
}

/// An [Inventory] shared between threads. Every mutation runs under the write lock, so the
/// read-merge-write of a partial attribute update cannot interleave with another writer.
#[derive(Debug, Clone)]
pub struct SharedInventory(Arc<RwLock<Inventory>>);

impl SharedInventory {
    pub fn new(inventory: Inventory) -> SharedInventory {
        SharedInventory(Arc::new(RwLock::new(inventory)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Inventory> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Inventory> {
        self.0.write()
    }

    pub fn update_attributes(
        &self,
        id: ResourceId,
        attributes: Option<AttributePatch>,
        partial: bool,
    ) -> Result<(), NsotError> {
        self.0.write().update_attributes(id, attributes, partial)
    }

    pub fn create_resource(&self, spec: ResourceSpec) -> Result<ResourceId, NsotError> {
        self.0.write().create_resource(spec)
    }
}
