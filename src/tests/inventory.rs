//! Tests for sites, resource lifecycles, the change log and emitted events

use super::helpers::*;
use crate::{
    attribute::AttributeSpec,
    change::ChangeEvent,
    error::NsotError,
    event::{EventOrigin, InventoryEvent},
    inventory::{Inventory, NewResource, ResourceSpec, SharedInventory, DEFAULT_EXPIRING_DAYS},
    properties::{AttrValue, AttributePatch, ResourceId, ResourceType, SiteId},
    resource::{AttributeBearer, Resource},
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::thread;
use test_log::test;
use tokio::sync::mpsc::unbounded_channel;

fn conflict<T: std::fmt::Debug>(result: Result<T, NsotError>) -> String {
    match result {
        Err(NsotError::Conflict(msg)) => msg,
        other => panic!("expected a conflict, got {other:?}"),
    }
}

fn patch(name: &str, value: Option<&str>) -> AttributePatch {
    AttributePatch::from([(name.to_string(), value.map(AttrValue::from))])
}

/// Device `foo-bar1` with interfaces `eth0` and `eth1`.
fn create_device(inventory: &mut Inventory, site: SiteId) -> (ResourceId, ResourceId, ResourceId) {
    let device = inventory
        .create_resource(ResourceSpec::device(site, "foo-bar1"))
        .unwrap();
    let eth0 = inventory
        .create_resource(ResourceSpec::interface(device, "eth0"))
        .unwrap();
    let eth1 = inventory
        .create_resource(ResourceSpec::interface(device, "eth1"))
        .unwrap();
    (device, eth0, eth1)
}

#[test]
fn test_sites() {
    let (mut inventory, site) = create_test_inventory();
    assert_eq!(inventory.site_by_name("test-site").map(|s| s.id), Some(site));
    conflict(inventory.create_site("test-site", ""));
    let err = validation_error(inventory.create_site("  ", ""));
    assert_eq!(err.field_name(), Some("name"));

    create_attr(&mut inventory, site, ResourceType::Device, "owner");
    conflict(inventory.delete_site(site));

    let other = inventory.create_site("other-site", "").unwrap();
    inventory.delete_site(other).unwrap();
    assert_eq!(inventory.sites().count(), 1);
    assert!(matches!(
        inventory.delete_site(other),
        Err(NsotError::NotFound(_))
    ));
}

#[test]
fn test_site_is_required_and_derived() {
    let (mut inventory, site) = create_test_inventory();
    let mut spec = ResourceSpec::device(site, "foo-bar1");
    spec.site_id = None;
    let err = validation_error(inventory.create_resource(spec));
    assert_eq!(err.field_name(), Some("site"));

    assert!(matches!(
        inventory.create_resource(ResourceSpec::device(SiteId(99), "foo-bar1")),
        Err(NsotError::NotFound(_))
    ));

    let (device, eth0, _) = create_device(&mut inventory, site);
    assert_eq!(inventory.get(eth0).unwrap().site_id(), site);

    let err = validation_error(inventory.create_resource(ResourceSpec::interface(ResourceId(99), "eth9")));
    assert_eq!(err.field_name(), Some("device"));
    // Interfaces are not devices
    let err = validation_error(inventory.create_resource(ResourceSpec::interface(eth0, "eth9")));
    assert_eq!(err.field_name(), Some("device"));

    let other = inventory.create_site("other-site", "").unwrap();
    let mut spec = ResourceSpec::interface(device, "eth9");
    spec.site_id = Some(other);
    let err = validation_error(inventory.create_resource(spec));
    assert_eq!(err.field_name(), Some("site"));
}

#[test]
fn test_natural_keys_are_unique_per_scope() {
    let (mut inventory, site) = create_test_inventory();
    let (device, eth0, _) = create_device(&mut inventory, site);

    conflict(inventory.create_resource(ResourceSpec::device(site, "foo-bar1")));
    conflict(inventory.create_resource(ResourceSpec::interface(device, "eth0")));
    inventory
        .create_resource(ResourceSpec::network(site, "10.0.0.0/8"))
        .unwrap();
    conflict(inventory.create_resource(ResourceSpec::network(site, "10.0.0.0/8")));
    inventory
        .create_resource(ResourceSpec::autonomous_system(site, 65000))
        .unwrap();
    conflict(inventory.create_resource(ResourceSpec::autonomous_system(site, 65000)));
    let err = validation_error(inventory.create_resource(ResourceSpec::autonomous_system(site, 0)));
    assert_eq!(err.field_name(), Some("number"));

    // Another site has its own namespace
    let other = inventory.create_site("other-site", "").unwrap();
    inventory
        .create_resource(ResourceSpec::device(other, "foo-bar1"))
        .unwrap();
    inventory
        .create_resource(ResourceSpec::network(other, "10.0.0.0/8"))
        .unwrap();

    // Same interface name on another device is fine
    let device2 = inventory
        .create_resource(ResourceSpec::device(site, "foo-bar2"))
        .unwrap();
    inventory
        .create_resource(ResourceSpec::interface(device2, "eth0"))
        .unwrap();

    // A parent interface must live on the same device
    let err = validation_error(
        inventory.create_resource(ResourceSpec::interface(device2, "eth0.100").parent(eth0)),
    );
    assert_eq!(err.field_name(), Some("parent"));

    let err = validation_error(inventory.create_resource(ResourceSpec::network(site, "10.1.2.3/16")));
    assert_eq!(err.field_name(), Some("cidr"));
    let err = validation_error(inventory.create_resource(ResourceSpec::device(site, "bad host")));
    assert_eq!(err.field_name(), Some("hostname"));
}

#[test]
fn test_circuits() {
    let (mut inventory, site) = create_test_inventory();
    let (device, eth0, eth1) = create_device(&mut inventory, site);
    let peer = inventory
        .create_resource(ResourceSpec::device(site, "foo-bar2"))
        .unwrap();
    let peer_eth0 = inventory
        .create_resource(ResourceSpec::interface(peer, "eth0"))
        .unwrap();

    let err = validation_error(
        inventory.create_resource(ResourceSpec::circuit("c1", eth0).endpoint_z(eth0)),
    );
    assert_eq!(err.field_name(), Some("endpoint_z"));
    let err = validation_error(inventory.create_resource(ResourceSpec::circuit("c1", device)));
    assert_eq!(err.field_name(), Some("endpoint_a"));

    let circuit = inventory
        .create_resource(ResourceSpec::circuit("c1", eth0).endpoint_z(peer_eth0))
        .unwrap();
    assert_eq!(inventory.get(circuit).unwrap().site_id(), site);
    conflict(inventory.create_resource(ResourceSpec::circuit("c1", eth1)));
    // One circuit per interface
    conflict(inventory.create_resource(ResourceSpec::circuit("c2", eth1).endpoint_z(peer_eth0)));

    let names: Vec<&str> = inventory
        .device_circuits(peer)
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(names, ["c1"]);
    assert_eq!(inventory.device_circuits(device).len(), 1);
    let c2 = inventory
        .create_resource(ResourceSpec::circuit("c2", eth1))
        .unwrap();
    assert_eq!(inventory.device_circuits(device).len(), 2);
    assert!(inventory.get(c2).unwrap().as_circuit().unwrap().endpoint_z.is_none());
}

#[test]
fn test_device_delete_cascades() {
    let (mut inventory, site) = create_test_inventory();
    create_attr(&mut inventory, site, ResourceType::Interface, "speed");
    let (device, eth0, eth1) = create_device(&mut inventory, site);
    inventory
        .update_attributes(eth0, Some(patch("speed", Some("1000"))), false)
        .unwrap();
    let bgp = inventory
        .create_resource(ResourceSpec::protocol(device, "bgp"))
        .unwrap();
    let circuit = inventory
        .create_resource(ResourceSpec::circuit("c1", eth1))
        .unwrap();

    let msg = conflict(inventory.delete_resource(device));
    assert!(msg.contains("terminates circuit c1"));
    assert!(inventory.get(device).is_some());

    inventory.delete_resource(circuit).unwrap();
    inventory.delete_resource(device).unwrap();
    for id in [device, eth0, eth1, bgp] {
        assert!(inventory.get(id).is_none());
    }
    assert!(inventory.values().is_empty());

    // Dependents are recorded before the device
    let deleted: Vec<&str> = inventory
        .changes()
        .iter()
        .filter(|c| c.event == ChangeEvent::Delete)
        .map(|c| c.resource_name.as_str())
        .collect();
    assert_eq!(deleted, ["Circuit", "Protocol", "Interface", "Interface", "Device"]);
}

#[test]
fn test_protocol_references() {
    let (mut inventory, site) = create_test_inventory();
    let (device, eth0, eth1) = create_device(&mut inventory, site);
    let other = inventory
        .create_resource(ResourceSpec::device(site, "foo-bar2"))
        .unwrap();
    let other_eth0 = inventory
        .create_resource(ResourceSpec::interface(other, "eth0"))
        .unwrap();
    let circuit = inventory
        .create_resource(ResourceSpec::circuit("c1", eth1))
        .unwrap();

    let protocol_on = |interface, circuit| {
        ResourceSpec::new(
            None,
            NewResource::Protocol {
                protocol_type: "ospf".into(),
                device,
                interface,
                circuit,
                description: String::new(),
            },
        )
    };
    let err = validation_error(inventory.create_resource(protocol_on(Some(other_eth0), None)));
    assert_eq!(err.field_name(), Some("interface"));
    let err = validation_error(inventory.create_resource(protocol_on(None, Some(eth0))));
    assert_eq!(err.field_name(), Some("circuit"));

    let protocol = inventory
        .create_resource(protocol_on(Some(eth0), Some(circuit)))
        .unwrap();
    let resource = inventory.get(protocol).unwrap();
    assert_eq!(resource.label(), format!("ospf on {device}"));
    assert_eq!(resource.to_dict()["type"], "ospf");

    inventory.delete_resource(eth0).unwrap();
    inventory.delete_resource(circuit).unwrap();
    let protocol = inventory.get(protocol).unwrap().as_protocol().unwrap();
    assert_eq!(protocol.interface, None);
    assert_eq!(protocol.circuit, None);
}

#[test]
fn test_expiry_queries() {
    let (mut inventory, site) = create_test_inventory();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let past = inventory
        .create_resource(ResourceSpec::device(site, "past").expires_at(now - Duration::hours(1)))
        .unwrap();
    let soon = inventory
        .create_resource(ResourceSpec::device(site, "soon").expires_at(now + Duration::days(2)))
        .unwrap();
    let later = inventory
        .create_resource(ResourceSpec::device(site, "later").expires_at(now + Duration::days(30)))
        .unwrap();
    let never = inventory
        .create_resource(ResourceSpec::device(site, "never"))
        .unwrap();

    let ids = |found: Vec<&Resource>| found.into_iter().map(|r| r.id()).collect::<Vec<_>>();
    assert_eq!(ids(inventory.expired(ResourceType::Device, now, true)), [past]);
    assert_eq!(
        ids(inventory.expired(ResourceType::Device, now, false)),
        [soon, later, never]
    );
    assert_eq!(
        ids(inventory.expiring_within_days(ResourceType::Device, now, DEFAULT_EXPIRING_DAYS)),
        [soon]
    );

    inventory.set_expiry(later, None).unwrap();
    assert_eq!(inventory.get(later).unwrap().expires_at(), None);
    assert_eq!(
        inventory.get(past).unwrap().to_dict()["expires_at"],
        json!((now - Duration::hours(1)).to_rfc3339())
    );
}

#[test]
fn test_change_log_and_diffs() {
    let (mut inventory, site) = create_test_inventory();
    create_attr(&mut inventory, site, ResourceType::Device, "owner");
    let device = inventory
        .create_resource(ResourceSpec::device(site, "foo-bar1").attribute("owner", "jathan"))
        .unwrap();
    inventory
        .update_attributes(device, Some(patch("owner", Some("gary"))), true)
        .unwrap();
    inventory.delete_resource(device).unwrap();

    let history: Vec<(u64, ChangeEvent)> = inventory
        .changes()
        .history("Device", device.0)
        .map(|c| (c.id, c.event))
        .collect();
    assert_eq!(
        history,
        [
            (3, ChangeEvent::Create),
            (4, ChangeEvent::Update),
            (5, ChangeEvent::Delete)
        ]
    );
    let first = inventory.changes().get(1).unwrap();
    assert_eq!(first.resource_name, "Site");
    assert_eq!(inventory.changes().get(2).unwrap().resource_name, "Attribute");

    let created = inventory.resource_diff(3).unwrap();
    assert_eq!(created["hostname"].new, json!("foo-bar1"));
    assert_eq!(created["hostname"].old, json!(null));

    // Only what changed
    let updated = inventory.resource_diff(4).unwrap();
    assert_eq!(updated.keys().collect::<Vec<_>>(), ["attributes"]);
    assert_eq!(updated["attributes"].old, json!({"owner": "jathan"}));
    assert_eq!(updated["attributes"].new, json!({"owner": "gary"}));

    let deleted = inventory.resource_diff(5).unwrap();
    assert_eq!(deleted["attributes"].old, json!({"owner": "gary"}));
    assert!(deleted.values().all(|d| d.new.is_null()));

    assert!(matches!(inventory.resource_diff(0), Err(NsotError::NotFound(_))));
    assert!(matches!(inventory.resource_diff(99), Err(NsotError::NotFound(_))));
    let dict = inventory.changes().get(4).unwrap().to_dict(&updated);
    assert_eq!(dict["event"], "Update");
    assert_eq!(dict["resource_diff"]["attributes"]["new"], json!({"owner": "gary"}));
}

#[test]
fn test_rejected_writes_are_not_recorded() {
    let (mut inventory, site) = create_test_inventory();
    create_attr(&mut inventory, site, ResourceType::Device, "owner");
    let before = inventory.changes().len();
    inventory
        .create_resource(ResourceSpec::device(site, "foo-bar1").attribute("bogus", "x"))
        .unwrap_err();
    assert_eq!(inventory.changes().len(), before);
    // The failed create did not burn the hostname
    inventory
        .create_resource(ResourceSpec::device(site, "foo-bar1"))
        .unwrap();
}

#[test]
fn test_events_follow_mutations() {
    let (tx, mut rx) = unbounded_channel();
    let (inventory, site) = create_test_inventory();
    let mut inventory = inventory.with_event_sender(tx);

    let vendor = create_attr(&mut inventory, site, ResourceType::Device, "vendor");
    let model = inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "model")
                .depends_on(["vendor"]),
        )
        .unwrap();
    match rx.try_recv().unwrap() {
        InventoryEvent::AttributeUpdate(attr, deps, origin) => {
            assert_eq!(attr.id, vendor);
            assert!(deps.is_empty());
            assert_eq!(origin, EventOrigin::Local);
        }
        other => panic!("unexpected event {other}"),
    }
    match rx.try_recv().unwrap() {
        InventoryEvent::AttributeUpdate(attr, deps, _) => {
            assert_eq!(attr.id, model);
            assert_eq!(deps, [vendor]);
        }
        other => panic!("unexpected event {other}"),
    }

    let device = inventory
        .create_resource(
            ResourceSpec::device(site, "foo-bar1")
                .attribute("vendor", "juniper")
                .attribute("model", "mx960"),
        )
        .unwrap();
    match rx.try_recv().unwrap() {
        InventoryEvent::ValuesReplaced(rt, id, event_site, rows, _) => {
            assert_eq!(rt, ResourceType::Device);
            assert_eq!(id, device);
            assert_eq!(event_site, site);
            assert_eq!(rows.len(), 2);
        }
        other => panic!("unexpected event {other}"),
    }

    // Rejected writes emit nothing
    inventory
        .update_attributes(device, Some(patch("vendor", None)), true)
        .unwrap_err();
    assert!(rx.try_recv().is_err());

    inventory.delete_resource(device).unwrap();
    assert!(matches!(
        rx.try_recv().unwrap(),
        InventoryEvent::ResourceRemoved(ResourceType::Device, id, EventOrigin::Local) if id == device
    ));
    inventory.delete_attribute(model).unwrap();
    assert!(matches!(
        rx.try_recv().unwrap(),
        InventoryEvent::AttributeRemoved(id, _) if id == model
    ));

    // A dropped receiver does not fail writes
    drop(rx);
    inventory
        .create_resource(ResourceSpec::device(site, "foo-bar2"))
        .unwrap();
}

#[test]
fn test_delete_attribute_blocked_by_values() {
    let (mut inventory, site) = create_test_inventory();
    let owner = create_attr(&mut inventory, site, ResourceType::Device, "owner");
    let device = inventory
        .create_resource(ResourceSpec::device(site, "foo-bar1").attribute("owner", "jathan"))
        .unwrap();

    let msg = conflict(inventory.delete_attribute(owner));
    assert!(msg.contains("1 values"));

    inventory.update_attributes(device, None, false).unwrap();
    inventory.delete_attribute(owner).unwrap();
    assert!(inventory.attribute(owner).is_none());
    assert!(inventory
        .lookup_attribute(site, ResourceType::Device, "owner")
        .is_none());
}

#[test]
fn test_delete_attribute_reports_dependents_before_values() {
    let (mut inventory, site) = create_test_inventory();
    let vendor = create_attr(&mut inventory, site, ResourceType::Device, "vendor");
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "model").depends_on(["vendor"]),
        )
        .unwrap();
    inventory
        .create_resource(ResourceSpec::device(site, "foo-bar1").attribute("vendor", "juniper"))
        .unwrap();

    let err = validation_error(inventory.delete_attribute(vendor));
    assert_eq!(err.field_name(), Some("depends_on"));
    assert!(err.text().contains("model"));
    assert!(inventory.attribute(vendor).is_some());
}

#[test]
fn test_shared_inventory_serializes_writers() {
    let (mut inventory, site) = create_test_inventory();
    for name in ["a", "b", "c", "d"] {
        create_attr(&mut inventory, site, ResourceType::Device, name);
    }
    let shared = SharedInventory::new(inventory);
    let device = shared
        .create_resource(ResourceSpec::device(site, "foo-bar1"))
        .unwrap();

    let handles: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| {
            let shared = shared.clone();
            thread::spawn(move || {
                shared
                    .update_attributes(
                        device,
                        Some(patch(name, Some(name))),
                        true,
                    )
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every partial update survived
    let read = shared.read();
    let attrs = read.get(device).unwrap().get_attributes();
    assert_eq!(attrs.len(), 4);
    assert_eq!(read.values().len(), 4);
}
