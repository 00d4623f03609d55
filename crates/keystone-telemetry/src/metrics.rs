//! Metric names emitted by Keystone crates.
//!
//! Keystone records through the `metrics` facade and never installs a
//! recorder itself; the host process chooses the exporter.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `keystone_requests_total` | Counter | `transport`, `outcome` |
//! | `keystone_authz_decisions_total` | Counter | `decision` |
//! | `keystone_policy_reloads_total` | Counter | `outcome` |
//! | `keystone_store_errors_total` | Counter | `entity`, `operation` |

use metrics::{describe_counter, Unit};
use std::sync::Once;

/// Calls that left the middleware chain.
pub const REQUESTS_TOTAL: &str = "keystone_requests_total";

/// Policy decisions.
pub const AUTHZ_DECISIONS_TOTAL: &str = "keystone_authz_decisions_total";

/// Rule reload attempts.
pub const POLICY_RELOADS_TOTAL: &str = "keystone_policy_reloads_total";

/// Failed store operations.
pub const STORE_ERRORS_TOTAL: &str = "keystone_store_errors_total";

/// Every counter Keystone emits.
pub const ALL: &[&str] = &[
    REQUESTS_TOTAL,
    AUTHZ_DECISIONS_TOTAL,
    POLICY_RELOADS_TOTAL,
    STORE_ERRORS_TOTAL,
];

static DESCRIBED: Once = Once::new();

/// Registers metric descriptions with the installed recorder.
///
/// Call after installing a recorder; later calls are ignored.
pub fn describe_metrics() {
    DESCRIBED.call_once(|| {
        describe_counter!(
            REQUESTS_TOTAL,
            Unit::Count,
            "Calls that left the middleware chain, by transport and outcome"
        );
        describe_counter!(
            AUTHZ_DECISIONS_TOTAL,
            Unit::Count,
            "Authorization decisions by result"
        );
        describe_counter!(
            POLICY_RELOADS_TOTAL,
            Unit::Count,
            "Policy rule reloads by outcome"
        );
        describe_counter!(
            STORE_ERRORS_TOTAL,
            Unit::Count,
            "Failed store operations by entity and operation"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_share_prefix() {
        assert_eq!(ALL.len(), 4);
        for name in ALL {
            assert!(name.starts_with("keystone_"), "{name}");
            assert!(name.ends_with("_total"), "{name}");
        }
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
        describe_metrics();
    }
}
