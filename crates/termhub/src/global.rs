//! Process-wide registry accessor.
//!
//! Some embedders want one registry for the lifetime of the process without
//! threading a handle through every layer. This module lazily constructs a
//! single [`SessionRegistry`] with default configuration on first access.
//!
//! The shared instance lives until process exit and has no teardown hook;
//! applications that need scoped ownership or an explicit shutdown should
//! construct a [`SessionRegistry`] themselves and call
//! [`SessionRegistry::shutdown`].

use std::sync::OnceLock;

use crate::config::Config;
use crate::registry::SessionRegistry;

static REGISTRY: OnceLock<SessionRegistry> = OnceLock::new();

/// Returns the process-wide session registry, constructing it with default
/// configuration on first call.
pub fn registry() -> &'static SessionRegistry {
    REGISTRY.get_or_init(|| SessionRegistry::new(Config::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_accessor_returns_same_instance() {
        let first: *const SessionRegistry = registry();
        let second: *const SessionRegistry = registry();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    #[serial]
    fn test_accessor_registry_is_usable() {
        let registry = registry();
        let id = registry.create(Some("sleep 30"), None).unwrap();
        assert!(registry.list_active().contains(&id));
        registry.close(&id).unwrap();
    }
}
