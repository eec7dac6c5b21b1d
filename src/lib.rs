//! # nsot-core
//!
//! The attribute and resource data model of a Network Source of Truth: user-defined,
//! per-site attribute schemas, typed attribute values on network resources, and a set-theory
//! query language for finding resources by those values.
//!
//! ## Overview
//!
//! Every [`resource`] (Device, Network, Interface, Circuit, AutonomousSystem, Protocol) belongs to
//! a Site and carries a map of attributes. Which attributes it may carry is defined per site and
//! resource type by [`attribute::AttributeDefinition`]s. Definitions can be required, multi-valued,
//! constrained by pattern or allowed values, given defaults, made inheritable down the Network
//! and Interface hierarchies, and made to depend on one another.
//!
//! ## Architecture
//!
//! - **[`schema`]**: the Attribute Definition Store, holding definitions and their dependency edges
//! - **[`dependency`]**: the Dependency Graph Engine (self, scope and cycle checks over a petgraph
//!   `DiGraphMap`)
//! - **[`value`]**: the Value Store, one row per scalar fact, unique per resource
//! - **[`binder`]**: the Resource Attribute Binder (`set_attributes`)
//! - **[`query`]**: the Set-Query Evaluator (`+`, `-` and bare terms, `_regex` matching)
//! - **[`inheritance`]**: the Inheritance Resolver (merged views and inherited filter matches)
//! - **[`inventory`]**: the facade tying the stores together, with change tracking and events
//! - **[`db`]** (feature `service`): SQLite mirror fed by [`event::InventoryEvent`]s
//!
//! ## Quick Start
//!
//! ```rust
//! use nsot_core::{
//!     attribute::AttributeSpec,
//!     config::NsotConfig,
//!     inventory::{Inventory, ResourceSpec},
//!     properties::ResourceType,
//! };
//!
//! # fn main() -> Result<(), nsot_core::NsotError> {
//! let mut inventory = Inventory::new(NsotConfig::default())?;
//! let site = inventory.create_site("lax", "Los Angeles")?;
//! inventory.create_attribute(site, &AttributeSpec::new(ResourceType::Device, "owner"))?;
//! inventory.create_attribute(site, &AttributeSpec::new(ResourceType::Device, "role"))?;
//!
//! inventory.create_resource(
//!     ResourceSpec::device(site, "core-rtr1")
//!         .attribute("owner", "neteng")
//!         .attribute("role", "core"),
//! )?;
//! inventory.create_resource(ResourceSpec::device(site, "edge-rtr1").attribute("owner", "neteng"))?;
//!
//! let found = inventory.set_query(ResourceType::Device, "owner=neteng -role=core", Some(site), false)?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every fallible call returns [`NsotError`]. Caller mistakes are [`NsotError::Validation`]
//! carrying a [`ValidationError`] keyed by the offending field; use [`NsotError::status_code`] to
//! map errors onto HTTP statuses.

pub mod attribute;
pub mod binder;
pub mod change;
pub mod cidr;
pub mod config;
#[cfg(feature = "service")]
pub mod db;
pub mod dependency;
pub mod error;
pub mod event;
pub mod inheritance;
pub mod inventory;
pub mod properties;
pub mod query;
pub mod resource;
pub mod schema;
pub mod seed;
#[cfg(test)]
mod tests;
pub mod value;

pub use error::*;
