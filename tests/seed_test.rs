//! Loading TOML seeds into an inventory and querying the result.

mod common;

use common::{init_logging, write_seed, TEST_SEED};
use nsot_core::{
    config::NsotConfig,
    inventory::Inventory,
    properties::{AttrValue, ResourceType},
    resource::AttributeBearer,
    seed::Seed,
    NsotError,
};
use tempfile::TempDir;

fn seeded() -> Inventory {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let path = write_seed(&temp_dir, TEST_SEED);
    let mut inventory = Inventory::new(NsotConfig::default()).unwrap();
    let report = Seed::from_path(&path).unwrap().apply(&mut inventory).unwrap();
    assert_eq!(report.sites.len(), 2);
    assert_eq!(report.attributes, 6);
    assert_eq!(report.resources.len(), 8);
    inventory
}

fn labels(inventory: &Inventory, rt: ResourceType, query: &str, site: &str) -> Vec<String> {
    let site = inventory.site_by_name(site).map(|s| s.id);
    inventory
        .set_query(rt, query, site, false)
        .unwrap()
        .into_iter()
        .map(|r| r.label())
        .collect()
}

#[test]
fn test_seed_builds_queryable_inventory() {
    let inventory = seeded();

    assert_eq!(
        labels(&inventory, ResourceType::Device, "vendor=juniper", "lax"),
        ["core-rtr1"]
    );
    assert_eq!(
        labels(&inventory, ResourceType::Device, "vendor=juniper", "sfo"),
        ["sfo-rtr1"]
    );
    assert_eq!(
        labels(&inventory, ResourceType::Device, "role=core +role=edge -model=mx960", "lax"),
        ["edge-rtr1"]
    );

    let lax = inventory.site_by_name("lax").map(|s| s.id);
    let everywhere = inventory
        .set_query(ResourceType::Device, "vendor=juniper", None, false)
        .unwrap();
    assert_eq!(everywhere.len(), 2);

    let networks = inventory
        .filter_by_attributes(ResourceType::Network, "owner=neteng", lax)
        .unwrap();
    assert_eq!(networks.len(), 2);

    let circuit = inventory
        .resources(ResourceType::Circuit, lax)
        .next()
        .unwrap();
    assert_eq!(circuit.label(), "c1");
    let core = inventory
        .resources(ResourceType::Device, lax)
        .find(|d| d.label() == "core-rtr1")
        .unwrap();
    assert_eq!(inventory.device_circuits(core.id()).len(), 1);
}

#[test]
fn test_seed_dependencies_validate() {
    let inventory = seeded();
    for attr in inventory.schema().iter() {
        inventory.validate_dependencies(attr.id).unwrap();
    }
    let model = inventory
        .lookup_attribute(
            inventory.site_by_name("lax").unwrap().id,
            ResourceType::Device,
            "model",
        )
        .unwrap();
    let deps: Vec<&str> = inventory
        .get_all_dependencies(model.id)
        .iter()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(deps, ["vendor"]);
}

#[test]
fn test_seed_failures() {
    init_logging();
    let mut inventory = Inventory::new(NsotConfig::default()).unwrap();
    let seed = Seed::parse(
        r#"
[[sites]]
name = "lax"

[[attributes]]
site = "lax"
resource_name = "Device"
name = "role"
constraints = { valid_values = ["core", "edge"] }

[[resources]]
site = "lax"
resource_name = "Device"
hostname = "core-rtr1"
attributes = { role = "core" }

[[resources]]
site = "lax"
resource_name = "Device"
hostname = "bad-rtr1"
attributes = { role = "spine" }
"#,
    )
    .unwrap();
    let err = seed.apply(&mut inventory).unwrap_err();
    assert!(matches!(err, NsotError::Validation(_)));
    assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);

    // Entries before the failure stay applied
    let devices: Vec<_> = inventory.resources(ResourceType::Device, None).collect();
    assert_eq!(devices.len(), 1);
    assert_eq!(
        devices[0].get_attributes().get("role"),
        Some(&AttrValue::Single("core".into()))
    );

    let err = Seed::parse(
        r#"
[[resources]]
resource_name = "Interface"
device = "missing"
name = "eth0"
"#,
    )
    .unwrap()
    .apply(&mut inventory)
    .unwrap_err();
    assert!(matches!(err, NsotError::NotFound(_)));

    assert!(Seed::parse("[[resources]]\nresource_name = \"Toaster\"\n").is_err());
}
