//! Shared test utilities for inventory testing

use crate::{
    attribute::AttributeSpec,
    config::NsotConfig,
    error::{NsotError, ValidationError},
    inventory::Inventory,
    properties::{AttributeId, ResourceType, SiteId},
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// An empty inventory with a single site.
pub fn create_test_inventory() -> (Inventory, SiteId) {
    init_logging();
    let mut inventory = Inventory::new(NsotConfig::default()).expect("default config is valid");
    let site = inventory
        .create_site("test-site", "Test site")
        .expect("site is created");
    (inventory, site)
}

/// Create a plain attribute definition.
pub fn create_attr(
    inventory: &mut Inventory,
    site: SiteId,
    resource_type: ResourceType,
    name: &str,
) -> AttributeId {
    inventory
        .create_attribute(site, &AttributeSpec::new(resource_type, name))
        .expect("attribute is created")
}

/// The validation error carried by `result`; panics on success or any other error kind.
pub fn validation_error<T: std::fmt::Debug>(result: Result<T, NsotError>) -> ValidationError {
    match result {
        Err(NsotError::Validation(err)) => err,
        other => panic!("expected a validation error, got {other:?}"),
    }
}
