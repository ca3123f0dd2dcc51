mod common;

use common::{assert_result_invalid_contains, assert_result_ok};
use rockbridge::ObserverRegistry;
use rockbridge_c::rockbridge_registry_init;

// Runs as its own test binary so the global registry is still uncreated.
#[test]
fn test_registry_init_sizes_global_registry_once() {
    assert_result_invalid_contains(rockbridge_registry_init(0), "invalid handle table capacity");

    assert_result_ok(rockbridge_registry_init(64));
    assert_eq!(ObserverRegistry::global().capacity(), 64);

    assert_result_invalid_contains(rockbridge_registry_init(8), "already initialized");
    assert_eq!(ObserverRegistry::global().capacity(), 64);
}
