//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::path::PathBuf;
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; later calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Two sites, device attributes with a dependency and an allowed-values constraint, an inheritable
/// network attribute, and a small topology:
///
/// ```text
/// lax: core-rtr1 (juniper, core)  eth0 --- c1 --- edge-rtr1:eth0
///      edge-rtr1 (arista, edge)
///      10.0.0.0/8 owner=neteng > 10.1.0.0/16
/// sfo: sfo-rtr1 (juniper, core)
/// ```
#[allow(dead_code)]
pub const TEST_SEED: &str = r#"
[[sites]]
name = "lax"
description = "Los Angeles"

[[sites]]
name = "sfo"

[[attributes]]
site = "lax"
resource_name = "Device"
name = "vendor"
required = true

[[attributes]]
site = "lax"
resource_name = "Device"
name = "model"
depends_on = ["vendor"]

[[attributes]]
site = "lax"
resource_name = "Device"
name = "role"
constraints = { valid_values = ["core", "edge"] }

[[attributes]]
site = "lax"
resource_name = "Network"
name = "owner"
inheritable = true

[[attributes]]
site = "sfo"
resource_name = "Device"
name = "vendor"

[[attributes]]
site = "sfo"
resource_name = "Device"
name = "role"

[[resources]]
site = "lax"
resource_name = "Device"
hostname = "core-rtr1"
attributes = { vendor = "juniper", model = "mx960", role = "core" }

[[resources]]
site = "lax"
resource_name = "Device"
hostname = "edge-rtr1"
attributes = { vendor = "arista", role = "edge" }

[[resources]]
site = "sfo"
resource_name = "Device"
hostname = "sfo-rtr1"
attributes = { vendor = "juniper", role = "core" }

[[resources]]
resource_name = "Interface"
device = "core-rtr1"
name = "eth0"

[[resources]]
resource_name = "Interface"
device = "edge-rtr1"
name = "eth0"

[[resources]]
resource_name = "Circuit"
name = "c1"
endpoint_a = "core-rtr1:eth0"
endpoint_z = "edge-rtr1:eth0"

[[resources]]
site = "lax"
resource_name = "Network"
cidr = "10.0.0.0/8"
attributes = { owner = "neteng" }

[[resources]]
site = "lax"
resource_name = "Network"
cidr = "10.1.0.0/16"
"#;

/// Write `content` to `seed.toml` in `temp_dir`.
#[allow(dead_code)]
pub fn write_seed(temp_dir: &TempDir, content: &str) -> PathBuf {
    let path = temp_dir.path().join("seed.toml");
    std::fs::write(&path, content).unwrap();
    path
}
