//! Audit trail of every create, update and delete.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
};

use crate::properties::SiteId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeEvent {
    Create,
    Update,
    Delete,
}

impl Display for ChangeEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let s = match self {
            ChangeEvent::Create => "Create",
            ChangeEvent::Update => "Update",
            ChangeEvent::Delete => "Delete",
        };
        write!(f, "{s}")
    }
}

/// Old and new value of one key of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

pub type ResourceDiff = BTreeMap<String, FieldDiff>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: u64,
    pub site_id: SiteId,
    pub change_at: DateTime<Utc>,
    pub event: ChangeEvent,
    /// `Attribute`, `Site` or one of the resource type names.
    pub resource_name: String,
    pub resource_id: u64,
    /// Full `to_dict()` snapshot taken after the change (before it, for deletes).
    pub resource: serde_json::Value,
}

impl Change {
    pub fn to_dict(&self, resource_diff: &ResourceDiff) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "site_id": self.site_id.0,
            "change_at": self.change_at.timestamp(),
            "event": self.event.to_string(),
            "resource_name": self.resource_name,
            "resource_id": self.resource_id,
            "resource": self.resource,
            "resource_diff": resource_diff,
        })
    }
}

fn snapshot_keys(snapshot: &serde_json::Value) -> impl Iterator<Item = (&String, &serde_json::Value)> {
    snapshot.as_object().into_iter().flat_map(|map| map.iter())
}

#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    changes: Vec<Change>,
}

impl ChangeLog {
    pub fn new() -> ChangeLog {
        ChangeLog::default()
    }

    pub fn record(
        &mut self,
        site_id: SiteId,
        event: ChangeEvent,
        resource_name: &str,
        resource_id: u64,
        resource: serde_json::Value,
        change_at: DateTime<Utc>,
    ) -> &Change {
        let id = self.changes.len() as u64 + 1;
        tracing::debug!("change {id}: {event} {resource_name}({resource_id})");
        self.changes.push(Change {
            id,
            site_id,
            change_at,
            event,
            resource_name: resource_name.to_string(),
            resource_id,
            resource,
        });
        &self.changes[self.changes.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn get(&self, id: u64) -> Option<&Change> {
        id.checked_sub(1)
            .and_then(|idx| self.changes.get(idx as usize))
    }

    /// Changes recorded for one resource, oldest first.
    pub fn history<'a>(
        &'a self,
        resource_name: &'a str,
        resource_id: u64,
    ) -> impl Iterator<Item = &'a Change> + 'a {
        self.changes
            .iter()
            .filter(move |c| c.resource_name == resource_name && c.resource_id == resource_id)
    }

    /// The most recent change to the same resource recorded before `change`.
    pub fn previous(&self, change: &Change) -> Option<&Change> {
        self.changes
            .iter()
            .filter(|c| {
                c.id < change.id
                    && c.resource_name == change.resource_name
                    && c.resource_id == change.resource_id
            })
            .next_back()
    }

    /// Per-key difference between `change` and the previous change to the same resource.
    ///
    /// Create lists every key as new. Delete lists every key of the previous snapshot (or of its
    /// own when there is none) as removed. Update lists only the keys whose value changed, or every
    /// key as new when there is no earlier change.
    pub fn resource_diff(&self, change: &Change) -> ResourceDiff {
        let all_new = |snapshot: &serde_json::Value| -> ResourceDiff {
            snapshot_keys(snapshot)
                .map(|(k, v)| {
                    (
                        k.clone(),
                        FieldDiff {
                            old: serde_json::Value::Null,
                            new: v.clone(),
                        },
                    )
                })
                .collect()
        };

        match change.event {
            ChangeEvent::Create => all_new(&change.resource),
            ChangeEvent::Delete => {
                let old = self
                    .previous(change)
                    .map(|prev| &prev.resource)
                    .unwrap_or(&change.resource);
                snapshot_keys(old)
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            FieldDiff {
                                old: v.clone(),
                                new: serde_json::Value::Null,
                            },
                        )
                    })
                    .collect()
            }
            ChangeEvent::Update => {
                let Some(prev) = self.previous(change) else {
                    return all_new(&change.resource);
                };
                let keys: BTreeSet<&String> = snapshot_keys(&prev.resource)
                    .chain(snapshot_keys(&change.resource))
                    .map(|(k, _)| k)
                    .collect();
                let null = serde_json::Value::Null;
                keys.into_iter()
                    .filter_map(|key| {
                        let old = prev.resource.get(key).unwrap_or(&null);
                        let new = change.resource.get(key).unwrap_or(&null);
                        (old != new).then(|| {
                            (
                                key.clone(),
                                FieldDiff {
                                    old: old.clone(),
                                    new: new.clone(),
                                },
                            )
                        })
                    })
                    .collect()
            }
        }
    }
}
