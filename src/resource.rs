//! Inventory resources that can carry attributes.
//!
//! Every concrete resource embeds a [ResourceCore] holding its identity, owning site, the
//! denormalized attribute cache and the optional expiry timestamp. The cache is written only by
//! [crate::binder::Binder] after a successful write to the value store; it is never an independent
//! source of truth. [Resource] is the tagged union over all concrete types and implements
//! [AttributeBearer] by delegation.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    attribute::AttributeDefinition,
    binder::Binder,
    cidr::Cidr,
    config::NameRules,
    error::{NsotError, ValidationError},
    properties::{AttributeMap, AttributePatch, ResourceId, ResourceType, SiteId},
};
use std::collections::BTreeMap;

pub const MAX_HOSTNAME_LEN: usize = 253;
pub const MIN_ASN: u64 = 1;
pub const MAX_ASN: u64 = 4_294_967_294;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Site {
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.0,
            "name": self.name,
            "description": self.description,
        })
    }
}

/// Fields shared by every resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCore {
    pub id: ResourceId,
    pub site_id: SiteId,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResourceCore {
    pub fn new(id: ResourceId, site_id: SiteId) -> ResourceCore {
        ResourceCore {
            id,
            site_id,
            attributes: AttributeMap::new(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Behavior shared by every resource that carries attributes.
pub trait AttributeBearer {
    fn resource_type(&self) -> ResourceType;

    fn core(&self) -> &ResourceCore;

    fn core_mut(&mut self) -> &mut ResourceCore;

    /// Human readable identifier: hostname, CIDR, interface name, `AS<number>`...
    fn label(&self) -> String;

    /// Full-state serialization recorded by the change log.
    fn to_dict(&self) -> serde_json::Value;

    /// Parent in the resource forest. Only hierarchical resource types have one.
    fn parent(&self) -> Option<ResourceId> {
        None
    }

    fn id(&self) -> ResourceId {
        self.core().id
    }

    fn site_id(&self) -> SiteId {
        self.core().site_id
    }

    fn get_attributes(&self) -> &AttributeMap {
        &self.core().attributes
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.core().expires_at
    }

    /// Validate and store `attributes` through `binder`. See [Binder::set_attributes].
    fn set_attributes(
        &mut self,
        binder: &mut Binder<'_>,
        attributes: Option<AttributePatch>,
        valid_attributes: Option<&BTreeMap<String, AttributeDefinition>>,
        partial: bool,
    ) -> Result<(), NsotError>
    where
        Self: Sized,
    {
        binder.set_attributes(self, attributes, valid_attributes, partial)
    }
}

fn expires_json(core: &ResourceCore) -> serde_json::Value {
    serde_json::json!(core.expires_at.map(|at| at.to_rfc3339()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub hostname: String,
}

impl AttributeBearer for Device {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Device
    }

    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn label(&self) -> String {
        self.hostname.clone()
    }

    fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.core.id.0,
            "site_id": self.core.site_id.0,
            "hostname": self.hostname,
            "attributes": self.core.attributes,
            "expires_at": expires_json(&self.core),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub cidr: Cidr,
    /// Most specific containing network in the same site.
    #[serde(default)]
    pub parent: Option<ResourceId>,
}

impl AttributeBearer for Network {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Network
    }

    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn label(&self) -> String {
        self.cidr.to_string()
    }

    fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.core.id.0,
            "site_id": self.core.site_id.0,
            "network_address": self.cidr.network_address().to_string(),
            "prefix_length": self.cidr.prefix_len(),
            "ip_version": if self.cidr.is_ipv4() { "4" } else { "6" },
            "parent_id": self.parent.map(|p| p.0),
            "attributes": self.core.attributes,
            "expires_at": expires_json(&self.core),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub device: ResourceId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Parent interface on the same device.
    #[serde(default)]
    pub parent: Option<ResourceId>,
}

impl AttributeBearer for Interface {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Interface
    }

    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.core.id.0,
            "site_id": self.core.site_id.0,
            "device": self.device.0,
            "name": self.name,
            "description": self.description,
            "parent_id": self.parent.map(|p| p.0),
            "attributes": self.core.attributes,
            "expires_at": expires_json(&self.core),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub name: String,
    pub endpoint_a: ResourceId,
    #[serde(default)]
    pub endpoint_z: Option<ResourceId>,
}

impl AttributeBearer for Circuit {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Circuit
    }

    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.core.id.0,
            "site_id": self.core.site_id.0,
            "name": self.name,
            "endpoint_a": self.endpoint_a.0,
            "endpoint_z": self.endpoint_z.map(|z| z.0),
            "attributes": self.core.attributes,
            "expires_at": expires_json(&self.core),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutonomousSystem {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub number: u64,
    #[serde(default)]
    pub description: String,
}

impl AutonomousSystem {
    /// Plain number below 65536, otherwise `high.low` over 16-bit halves.
    pub fn number_asdot(&self) -> String {
        number_asdot(self.number)
    }
}

pub fn number_asdot(number: u64) -> String {
    if number < 65536 {
        number.to_string()
    } else {
        format!("{}.{}", number / 65536, number % 65536)
    }
}

impl AttributeBearer for AutonomousSystem {
    fn resource_type(&self) -> ResourceType {
        ResourceType::AutonomousSystem
    }

    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn label(&self) -> String {
        format!("AS{}", self.number)
    }

    fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.core.id.0,
            "site_id": self.core.site_id.0,
            "number": self.number,
            "number_asdot": self.number_asdot(),
            "description": self.description,
            "attributes": self.core.attributes,
            "expires_at": expires_json(&self.core),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    #[serde(flatten)]
    pub core: ResourceCore,
    pub protocol_type: String,
    pub device: ResourceId,
    #[serde(default)]
    pub interface: Option<ResourceId>,
    #[serde(default)]
    pub circuit: Option<ResourceId>,
    #[serde(default)]
    pub description: String,
}

impl AttributeBearer for Protocol {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Protocol
    }

    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn label(&self) -> String {
        format!("{} on {}", self.protocol_type, self.device)
    }

    fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.core.id.0,
            "site_id": self.core.site_id.0,
            "type": self.protocol_type,
            "device": self.device.0,
            "interface": self.interface.map(|i| i.0),
            "circuit": self.circuit.map(|c| c.0),
            "description": self.description,
            "attributes": self.core.attributes,
            "expires_at": expires_json(&self.core),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource_name")]
pub enum Resource {
    Device(Device),
    Network(Network),
    Interface(Interface),
    Circuit(Circuit),
    AutonomousSystem(AutonomousSystem),
    Protocol(Protocol),
}

macro_rules! each_resource {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Resource::Device($inner) => $body,
            Resource::Network($inner) => $body,
            Resource::Interface($inner) => $body,
            Resource::Circuit($inner) => $body,
            Resource::AutonomousSystem($inner) => $body,
            Resource::Protocol($inner) => $body,
        }
    };
}

impl AttributeBearer for Resource {
    fn resource_type(&self) -> ResourceType {
        each_resource!(self, r => r.resource_type())
    }

    fn core(&self) -> &ResourceCore {
        each_resource!(self, r => r.core())
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        each_resource!(self, r => r.core_mut())
    }

    fn label(&self) -> String {
        each_resource!(self, r => r.label())
    }

    fn to_dict(&self) -> serde_json::Value {
        each_resource!(self, r => r.to_dict())
    }

    fn parent(&self) -> Option<ResourceId> {
        each_resource!(self, r => r.parent())
    }
}

impl Resource {
    pub fn as_device(&self) -> Option<&Device> {
        match self {
            Resource::Device(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_network(&self) -> Option<&Network> {
        match self {
            Resource::Network(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_interface(&self) -> Option<&Interface> {
        match self {
            Resource::Interface(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_circuit(&self) -> Option<&Circuit> {
        match self {
            Resource::Circuit(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_autonomous_system(&self) -> Option<&AutonomousSystem> {
        match self {
            Resource::AutonomousSystem(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_protocol(&self) -> Option<&Protocol> {
        match self {
            Resource::Protocol(p) => Some(p),
            _ => None,
        }
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ResourceId>) {
        match self {
            Resource::Network(n) => n.parent = parent,
            Resource::Interface(i) => i.parent = parent,
            _ => {}
        }
    }
}

pub fn clean_hostname(value: &str, rules: &NameRules) -> Result<String, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::field(
            "hostname",
            "Hostname must be non-zero length string.",
        ));
    }
    if value.len() > MAX_HOSTNAME_LEN {
        return Err(ValidationError::field(
            "hostname",
            format!("Hostname exceeds {MAX_HOSTNAME_LEN}-character FQDN limit."),
        ));
    }
    if !rules.device_name.is_match(value) {
        return Err(ValidationError::field(
            "hostname",
            format!("Invalid hostname: {value:?}."),
        ));
    }
    Ok(value.to_string())
}

pub fn clean_asn(number: u64) -> Result<u64, ValidationError> {
    if !(MIN_ASN..=MAX_ASN).contains(&number) {
        return Err(ValidationError::field(
            "number",
            format!("ASN must be between {MIN_ASN} and {MAX_ASN}, got: {number}."),
        ));
    }
    Ok(number)
}

/// Non-empty, trimmed name used for sites, interfaces and circuits.
pub fn clean_label(field: &str, value: &str) -> Result<String, ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::field(
            field,
            format!("{field} must be non-zero length string."),
        ));
    }
    Ok(value.to_string())
}
