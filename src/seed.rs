//! TOML inventory seeds.
//!
//! A seed lists sites, attribute definitions and resources. Resources refer to each other by
//! name instead of id:
//!
//! ```toml
//! [[sites]]
//! name = "lax"
//!
//! [[attributes]]
//! site = "lax"
//! resource_name = "Device"
//! name = "owner"
//! required = true
//!
//! [[resources]]
//! site = "lax"
//! resource_name = "Device"
//! hostname = "core-rtr1"
//! attributes = { owner = "neteng" }
//!
//! [[resources]]
//! resource_name = "Interface"
//! device = "core-rtr1"
//! name = "eth0"
//! ```
//!
//! Entries are applied in file order, so a definition must follow the ones it depends on and a
//! resource must follow the resources it references.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

use crate::{
    attribute::AttributeSpec,
    error::NsotError,
    inventory::{Inventory, NewResource, ResourceSpec},
    properties::{AttributePatch, ResourceId, ResourceType, SiteId},
    resource::{AttributeBearer, Resource},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub sites: Vec<SeedSite>,
    pub attributes: Vec<SeedAttribute>,
    pub resources: Vec<SeedResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSite {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedAttribute {
    pub site: String,
    #[serde(flatten)]
    pub spec: AttributeSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedResource {
    /// Required for Device, Network and AutonomousSystem. Optional otherwise.
    #[serde(default)]
    pub site: Option<String>,
    #[serde(flatten)]
    pub kind: SeedKind,
    #[serde(default)]
    pub attributes: Option<AttributePatch>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// [NewResource] with references spelled by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource_name")]
pub enum SeedKind {
    Device {
        hostname: String,
    },
    Network {
        cidr: String,
    },
    Interface {
        /// Device hostname.
        device: String,
        name: String,
        #[serde(default)]
        description: String,
        /// Name of another interface on the same device.
        #[serde(default)]
        parent: Option<String>,
    },
    Circuit {
        name: String,
        /// `hostname:interface`
        endpoint_a: String,
        #[serde(default)]
        endpoint_z: Option<String>,
    },
    AutonomousSystem {
        number: u64,
        #[serde(default)]
        description: String,
    },
    Protocol {
        #[serde(rename = "type")]
        protocol_type: String,
        device: String,
        #[serde(default)]
        interface: Option<String>,
        #[serde(default)]
        circuit: Option<String>,
        #[serde(default)]
        description: String,
    },
}

/// Ids assigned while applying a seed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub sites: BTreeMap<String, SiteId>,
    pub attributes: usize,
    pub resources: Vec<ResourceId>,
}

impl Seed {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Seed, NsotError> {
        let content = fs::read_to_string(path.as_ref())?;
        tracing::debug!("loading seed {:?}", path.as_ref());
        Seed::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Seed, NsotError> {
        Ok(toml::from_str(content)?)
    }

    /// Create every entry in `inventory`. Stops at the first failure; entries applied before it
    /// are kept.
    pub fn apply(&self, inventory: &mut Inventory) -> Result<SeedReport, NsotError> {
        let mut report = SeedReport::default();
        for site in self.sites.iter() {
            let id = inventory.create_site(&site.name, &site.description)?;
            report.sites.insert(site.name.clone(), id);
        }
        for attr in self.attributes.iter() {
            let site = site_named(inventory, &attr.site)?;
            inventory.create_attribute(site, &attr.spec)?;
            report.attributes += 1;
        }
        for resource in self.resources.iter() {
            let spec = resource.resolve(inventory)?;
            report.resources.push(inventory.create_resource(spec)?);
        }
        tracing::info!(
            "seed applied: {} sites, {} attributes, {} resources",
            report.sites.len(),
            report.attributes,
            report.resources.len()
        );
        Ok(report)
    }
}

fn site_named(inventory: &Inventory, name: &str) -> Result<SiteId, NsotError> {
    inventory
        .site_by_name(name)
        .map(|s| s.id)
        .ok_or_else(|| NsotError::NotFound(format!("Site {name:?}")))
}

fn device_named(
    inventory: &Inventory,
    site: Option<SiteId>,
    hostname: &str,
) -> Result<ResourceId, NsotError> {
    inventory
        .resources(ResourceType::Device, site)
        .filter_map(Resource::as_device)
        .find(|d| d.hostname == hostname)
        .map(|d| d.core.id)
        .ok_or_else(|| NsotError::NotFound(format!("Device {hostname:?}")))
}

fn interface_named(
    inventory: &Inventory,
    device: ResourceId,
    name: &str,
) -> Result<ResourceId, NsotError> {
    inventory
        .resources(ResourceType::Interface, None)
        .filter_map(Resource::as_interface)
        .find(|i| i.device == device && i.name == name)
        .map(|i| i.core.id)
        .ok_or_else(|| NsotError::NotFound(format!("Interface {name:?} on {device}")))
}

/// Resolve a `hostname:interface` endpoint.
fn endpoint_named(
    inventory: &Inventory,
    site: Option<SiteId>,
    endpoint: &str,
) -> Result<ResourceId, NsotError> {
    let (hostname, name) = endpoint.split_once(':').ok_or_else(|| {
        NsotError::Custom(format!(
            "Circuit endpoint {endpoint:?} is not of the form hostname:interface"
        ))
    })?;
    let device = device_named(inventory, site, hostname)?;
    interface_named(inventory, device, name)
}

impl SeedResource {
    fn resolve(&self, inventory: &Inventory) -> Result<ResourceSpec, NsotError> {
        let site = self
            .site
            .as_deref()
            .map(|name| site_named(inventory, name))
            .transpose()?;
        let kind = match &self.kind {
            SeedKind::Device { hostname } => NewResource::Device {
                hostname: hostname.clone(),
            },
            SeedKind::Network { cidr } => NewResource::Network { cidr: cidr.clone() },
            SeedKind::Interface {
                device,
                name,
                description,
                parent,
            } => {
                let device = device_named(inventory, site, device)?;
                NewResource::Interface {
                    device,
                    name: name.clone(),
                    description: description.clone(),
                    parent: parent
                        .as_deref()
                        .map(|p| interface_named(inventory, device, p))
                        .transpose()?,
                }
            }
            SeedKind::Circuit {
                name,
                endpoint_a,
                endpoint_z,
            } => NewResource::Circuit {
                name: name.clone(),
                endpoint_a: endpoint_named(inventory, site, endpoint_a)?,
                endpoint_z: endpoint_z
                    .as_deref()
                    .map(|z| endpoint_named(inventory, None, z))
                    .transpose()?,
            },
            SeedKind::AutonomousSystem {
                number,
                description,
            } => NewResource::AutonomousSystem {
                number: *number,
                description: description.clone(),
            },
            SeedKind::Protocol {
                protocol_type,
                device,
                interface,
                circuit,
                description,
            } => {
                let device = device_named(inventory, site, device)?;
                let circuit = match circuit {
                    Some(name) => Some(
                        inventory
                            .resources(ResourceType::Circuit, site)
                            .find(|c| c.as_circuit().is_some_and(|c| c.name == *name))
                            .map(|c| c.id())
                            .ok_or_else(|| NsotError::NotFound(format!("Circuit {name:?}")))?,
                    ),
                    None => None,
                };
                NewResource::Protocol {
                    protocol_type: protocol_type.clone(),
                    device,
                    interface: interface
                        .as_deref()
                        .map(|i| interface_named(inventory, device, i))
                        .transpose()?,
                    circuit,
                    description: description.clone(),
                }
            }
        };
        Ok(ResourceSpec {
            site_id: site,
            kind,
            attributes: self.attributes.clone(),
            expires_at: self.expires_at,
        })
    }
}
