//! Tests for binding attribute sets to resources

use super::helpers::*;
use crate::{
    attribute::AttributeSpec,
    binder::Binder,
    config::NameRules,
    error::NsotError,
    inventory::ResourceSpec,
    properties::{AttrValue, AttributePatch, ResourceId, ResourceType, SiteId},
    resource::{AttributeBearer, Device, ResourceCore},
    schema::AttributeStore,
    value::{ValueMatch, ValueStore},
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use test_log::test;

fn patch(pairs: &[(&str, Option<AttrValue>)]) -> AttributePatch {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn single(value: &str) -> Option<AttrValue> {
    Some(AttrValue::Single(value.to_string()))
}

#[test]
fn test_binder_writes_rows_and_cache() {
    init_logging();
    let site = SiteId(1);
    let mut schema = AttributeStore::new(NameRules::default());
    schema
        .create(site, &AttributeSpec::new(ResourceType::Device, "owner"))
        .unwrap();
    schema
        .create(
            site,
            &AttributeSpec::new(ResourceType::Device, "tags").multi(true),
        )
        .unwrap();
    let mut values = ValueStore::new();
    let mut device = Device {
        core: ResourceCore::new(ResourceId(1), site),
        hostname: "foo-bar1".to_string(),
    };

    let mut binder = Binder::new(&schema, &mut values);
    device
        .set_attributes(
            &mut binder,
            Some(patch(&[
                ("owner", single("jathan")),
                ("tags", Some(vec!["a", "b"].into())),
            ])),
            None,
            false,
        )
        .unwrap();

    assert_eq!(values.len(), 3);
    assert_eq!(
        device.get_attributes().get("tags"),
        Some(&AttrValue::Multi(vec!["a".into(), "b".into()]))
    );
    assert_eq!(
        values.matching(ResourceType::Device, "tags", &ValueMatch::Exact("b".into())),
        BTreeSet::from([ResourceId(1)])
    );

    // A full write replaces the previous set entirely
    let mut binder = Binder::new(&schema, &mut values);
    device
        .set_attributes(&mut binder, Some(patch(&[("owner", single("gary"))])), None, false)
        .unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(device.get_attributes().len(), 1);
}

#[test]
fn test_binder_respects_explicit_schema() {
    init_logging();
    let site = SiteId(1);
    let mut schema = AttributeStore::new(NameRules::default());
    schema
        .create(site, &AttributeSpec::new(ResourceType::Device, "owner"))
        .unwrap();
    let mut values = ValueStore::new();
    let mut device = Device {
        core: ResourceCore::new(ResourceId(7), site),
        hostname: "foo".to_string(),
    };

    let empty = BTreeMap::new();
    let mut binder = Binder::new(&schema, &mut values);
    let err = validation_error(binder.set_attributes(
        &mut device,
        Some(patch(&[("owner", single("jathan"))])),
        Some(&empty),
        false,
    ));
    assert_eq!(err.text(), "Attribute name (owner) does not exist.");
    assert!(values.is_empty());
}

#[test]
fn test_required_and_unknown_attributes() {
    let (mut inventory, site) = create_test_inventory();
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "owner").required(true),
        )
        .unwrap();

    let err = validation_error(inventory.create_resource(ResourceSpec::device(site, "foo")));
    assert_eq!(err.field_name(), Some("attributes"));
    assert_eq!(err.text(), "Missing required attributes: owner");

    let err = validation_error(inventory.create_resource(
        ResourceSpec::device(site, "foo")
            .attribute("owner", "jathan")
            .attribute("bogus", "x"),
    ));
    assert_eq!(err.to_string(), "{'attributes': 'Attribute name (bogus) does not exist.'}");

    // Failed creates leave nothing behind
    assert_eq!(inventory.resources(ResourceType::Device, None).count(), 0);
    assert!(inventory.values().is_empty());

    let id = inventory
        .create_resource(ResourceSpec::device(site, "foo").attribute("owner", "jathan"))
        .unwrap();
    assert_eq!(
        inventory.get(id).unwrap().get_attributes().get("owner"),
        Some(&AttrValue::Single("jathan".into()))
    );
}

#[test]
fn test_defaults_fill_full_writes_only() {
    let (mut inventory, site) = create_test_inventory();
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "role").default_value("edge"),
        )
        .unwrap();
    create_attr(&mut inventory, site, ResourceType::Device, "owner");

    let id = inventory
        .create_resource(ResourceSpec::device(site, "foo"))
        .unwrap();
    assert_eq!(
        inventory.get(id).unwrap().get_attributes().get("role"),
        Some(&AttrValue::Single("edge".into()))
    );

    // Explicit values win over defaults
    inventory
        .update_attributes(id, Some(patch(&[("role", single("core"))])), false)
        .unwrap();
    assert_eq!(
        inventory.get(id).unwrap().get_attributes().get("role"),
        Some(&AttrValue::Single("core".into()))
    );

    // Deleting in partial mode does not bring the default back
    inventory
        .update_attributes(id, Some(patch(&[("role", None)])), true)
        .unwrap();
    assert!(inventory.get(id).unwrap().get_attributes().is_empty());
}

#[test]
fn test_partial_updates_merge() {
    let (mut inventory, site) = create_test_inventory();
    create_attr(&mut inventory, site, ResourceType::Device, "owner");
    create_attr(&mut inventory, site, ResourceType::Device, "vendor");
    let id = inventory
        .create_resource(
            ResourceSpec::device(site, "foo")
                .attribute("owner", "jathan")
                .attribute("vendor", "juniper"),
        )
        .unwrap();

    inventory
        .update_attributes(id, Some(patch(&[("owner", single("gary"))])), true)
        .unwrap();
    let attrs = inventory.get(id).unwrap().get_attributes().clone();
    assert_eq!(attrs.get("owner"), Some(&AttrValue::Single("gary".into())));
    assert_eq!(attrs.get("vendor"), Some(&AttrValue::Single("juniper".into())));

    // No attributes in partial mode is a no-op
    inventory.update_attributes(id, None, true).unwrap();
    assert_eq!(inventory.get(id).unwrap().get_attributes(), &attrs);

    inventory
        .update_attributes(id, Some(patch(&[("vendor", None)])), true)
        .unwrap();
    let attrs = inventory.get(id).unwrap().get_attributes();
    assert_eq!(attrs.len(), 1);
    assert_eq!(inventory.values().len(), 1);

    // No attributes in full mode clears everything
    inventory.update_attributes(id, None, false).unwrap();
    assert!(inventory.get(id).unwrap().get_attributes().is_empty());
    assert!(inventory.values().is_empty());
}

#[test]
fn test_dependencies_enforced_on_values() {
    let (mut inventory, site) = create_test_inventory();
    create_attr(&mut inventory, site, ResourceType::Device, "vendor");
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "model").depends_on(["vendor"]),
        )
        .unwrap();

    let err = validation_error(
        inventory.create_resource(ResourceSpec::device(site, "foo").attribute("model", "mx960")),
    );
    assert_eq!(err.text(), "Attribute model requires vendor.");

    let id = inventory
        .create_resource(
            ResourceSpec::device(site, "foo")
                .attribute("model", "mx960")
                .attribute("vendor", "juniper"),
        )
        .unwrap();

    let err = validation_error(inventory.update_attributes(
        id,
        Some(patch(&[("vendor", None)])),
        true,
    ));
    assert!(err.text().contains("requires"));
    // The rejected update left the stored values alone
    assert_eq!(inventory.get(id).unwrap().get_attributes().len(), 2);
    assert_eq!(inventory.values().len(), 2);
}

#[test]
fn test_default_satisfies_dependency() {
    let (mut inventory, site) = create_test_inventory();
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "vendor").default_value("juniper"),
        )
        .unwrap();
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "model").depends_on(["vendor"]),
        )
        .unwrap();
    let id = inventory
        .create_resource(ResourceSpec::device(site, "foo").attribute("model", "mx960"))
        .unwrap();
    assert_eq!(inventory.get(id).unwrap().get_attributes().len(), 2);
}

#[test]
fn test_multi_values() {
    let (mut inventory, site) = create_test_inventory();
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "aliases").multi(true),
        )
        .unwrap();

    let err = validation_error(
        inventory.create_resource(ResourceSpec::device(site, "foo").attribute("aliases", "one")),
    );
    assert_eq!(err.field_name(), Some("multi"));

    let result = inventory.create_resource(
        ResourceSpec::device(site, "foo").attribute("aliases", vec!["one", "one"]),
    );
    assert!(matches!(result, Err(NsotError::Conflict(_))));
    assert_eq!(result.unwrap_err().status_code(), http::StatusCode::CONFLICT);

    let id = inventory
        .create_resource(ResourceSpec::device(site, "foo").attribute("aliases", vec!["one", "two"]))
        .unwrap();
    assert_eq!(inventory.values().len(), 2);
    assert_eq!(
        inventory.get(id).unwrap().to_dict()["attributes"],
        json!({"aliases": ["one", "two"]})
    );
}

#[test]
fn test_full_replace_is_idempotent() {
    let (mut inventory, site) = create_test_inventory();
    inventory
        .create_attribute(site, &AttributeSpec::new(ResourceType::Device, "tags").multi(true))
        .unwrap();
    create_attr(&mut inventory, site, ResourceType::Device, "owner");
    let id = inventory
        .create_resource(ResourceSpec::device(site, "foo"))
        .unwrap();
    let attrs = patch(&[
        ("owner", single("jathan")),
        ("tags", Some(vec!["a", "b"].into())),
    ]);
    for _ in 0..2 {
        inventory
            .update_attributes(id, Some(attrs.clone()), false)
            .unwrap();
        assert_eq!(inventory.values().len(), 3);
        assert_eq!(inventory.get(id).unwrap().get_attributes().len(), 2);
    }
}

#[test]
fn test_required_cannot_be_deleted() {
    let (mut inventory, site) = create_test_inventory();
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "owner").required(true),
        )
        .unwrap();
    let id = inventory
        .create_resource(ResourceSpec::device(site, "foo").attribute("owner", "jathan"))
        .unwrap();
    let err = validation_error(inventory.update_attributes(
        id,
        Some(patch(&[("owner", None)])),
        true,
    ));
    assert_eq!(err.text(), "Missing required attributes: owner");
    assert_eq!(inventory.values().len(), 1);
}

#[test]
fn test_transitive_dependencies() {
    let (mut inventory, site) = create_test_inventory();
    create_attr(&mut inventory, site, ResourceType::Device, "c");
    inventory
        .create_attribute(site, &AttributeSpec::new(ResourceType::Device, "b").depends_on(["c"]))
        .unwrap();
    inventory
        .create_attribute(site, &AttributeSpec::new(ResourceType::Device, "a").depends_on(["b"]))
        .unwrap();

    let err = validation_error(
        inventory.create_resource(ResourceSpec::device(site, "foo").attribute("a", "x")),
    );
    assert_eq!(err.field_name(), Some("attributes"));
    // a -> b is satisfied, b -> c is not
    let err = validation_error(inventory.create_resource(
        ResourceSpec::device(site, "foo")
            .attribute("a", "x")
            .attribute("b", "y"),
    ));
    assert_eq!(err.text(), "Attribute a requires c.");
    inventory
        .create_resource(
            ResourceSpec::device(site, "foo")
                .attribute("a", "x")
                .attribute("b", "y")
                .attribute("c", "z"),
        )
        .unwrap();
}

#[test]
fn test_required_default_and_multi_default() {
    let (mut inventory, site) = create_test_inventory();
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "role")
                .required(true)
                .default_value("default-role"),
        )
        .unwrap();
    inventory
        .create_attribute(
            site,
            &AttributeSpec::new(ResourceType::Device, "tags")
                .multi(true)
                .default_value(vec!["t1", "t2"]),
        )
        .unwrap();

    let d1 = inventory
        .create_resource(ResourceSpec::device(site, "d1"))
        .unwrap();
    let attrs = inventory.get(d1).unwrap().get_attributes();
    assert_eq!(attrs.get("role"), Some(&AttrValue::Single("default-role".into())));
    assert_eq!(
        attrs.get("tags"),
        Some(&AttrValue::Multi(vec!["t1".into(), "t2".into()]))
    );

    let d2 = inventory
        .create_resource(ResourceSpec::device(site, "d2").attribute("role", "custom"))
        .unwrap();
    assert_eq!(
        inventory.get(d2).unwrap().get_attributes().get("role"),
        Some(&AttrValue::Single("custom".into()))
    );
}
