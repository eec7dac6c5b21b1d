use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    attribute::AttributeDefinition,
    properties::{AttributeId, ResourceId, ResourceType, SiteId},
    value::ValueRow,
};

/// Indicates where an [InventoryEvent] came from, so followers know whether it still has to be
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventOrigin {
    /// Generated by an [crate::inventory::Inventory] after the change was applied to it.
    /// Followers such as the SQLite mirror should apply it.
    Local,

    /// Replayed from a follower (a database restore, for example). The inventory must apply it.
    #[default]
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    /// Definition created or updated, with the ids of its direct dependencies.
    AttributeUpdate(AttributeDefinition, Vec<AttributeId>, EventOrigin),
    AttributeRemoved(AttributeId, EventOrigin),
    /// The complete new set of value rows of one resource.
    ValuesReplaced(ResourceType, ResourceId, SiteId, Vec<ValueRow>, EventOrigin),
    ResourceRemoved(ResourceType, ResourceId, EventOrigin),
}

impl InventoryEvent {
    pub fn origin(&self) -> EventOrigin {
        match self {
            InventoryEvent::AttributeUpdate(_, _, origin) => *origin,
            InventoryEvent::AttributeRemoved(_, origin) => *origin,
            InventoryEvent::ValuesReplaced(_, _, _, _, origin) => *origin,
            InventoryEvent::ResourceRemoved(_, _, origin) => *origin,
        }
    }

    /// Returns a new event with the specified origin
    pub fn with_origin(self, new_origin: EventOrigin) -> Self {
        match self {
            InventoryEvent::AttributeUpdate(a, d, _) => {
                InventoryEvent::AttributeUpdate(a, d, new_origin)
            }
            InventoryEvent::AttributeRemoved(a, _) => InventoryEvent::AttributeRemoved(a, new_origin),
            InventoryEvent::ValuesReplaced(t, r, s, v, _) => {
                InventoryEvent::ValuesReplaced(t, r, s, v, new_origin)
            }
            InventoryEvent::ResourceRemoved(t, r, _) => {
                InventoryEvent::ResourceRemoved(t, r, new_origin)
            }
        }
    }
}

impl Display for InventoryEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            InventoryEvent::AttributeUpdate(a, _, _) => write!(f, "AttributeUpdate({})", a.id),
            InventoryEvent::AttributeRemoved(a, _) => write!(f, "AttributeRemoved({a})"),
            InventoryEvent::ValuesReplaced(t, r, _, v, _) => {
                write!(f, "ValuesReplaced({t} {r}, {} rows)", v.len())
            }
            InventoryEvent::ResourceRemoved(t, r, _) => write!(f, "ResourceRemoved({t} {r})"),
        }
    }
}
