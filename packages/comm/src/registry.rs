//! Target name → factory registry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use embedkern_runtime::Function;

use crate::error::{CommError, Result};

/// Factories for remotely opened comms, keyed by target name.
///
/// A factory is called as `factory(comm, message)` once per inbound
/// `comm_open` naming its target. Registration overwrites; lookups never see
/// a half-updated entry.
///
/// Targets are scoped to the [`CommManager`](crate::CommManager) that owns
/// the registry, and so to the runtime that manager serves. Two managers
/// never see each other's targets; a process-wide table means sharing one
/// manager.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: RwLock<HashMap<String, Function>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, returning the one it replaced.
    pub fn register(&self, target_name: impl Into<String>, factory: Function) -> Option<Function> {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target_name.into(), factory)
    }

    pub fn unregister(&self, target_name: &str) -> Option<Function> {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target_name)
    }

    pub fn resolve(&self, target_name: &str) -> Result<Function> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target_name)
            .cloned()
            .ok_or_else(|| CommError::UnknownTarget(target_name.to_string()))
    }

    pub fn contains(&self, target_name: &str) -> bool {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(target_name)
    }

    /// Registered target names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedkern_runtime::{Exception, Object, RuntimeGuard};
    use std::sync::Arc;
    use std::thread;

    fn first(
        _: &RuntimeGuard<'_>,
        _: &Object,
        _: &[Object],
    ) -> std::result::Result<Object, Exception> {
        Ok(Object::Int(1))
    }

    fn second(
        _: &RuntimeGuard<'_>,
        _: &Object,
        _: &[Object],
    ) -> std::result::Result<Object, Exception> {
        Ok(Object::Int(2))
    }

    #[test]
    fn register_overwrites() {
        let registry = TargetRegistry::new();
        assert!(registry.register("echo", Function::new("first", first)).is_none());
        let replaced = registry.register("echo", Function::new("second", second));
        assert_eq!(replaced.map(|f| f.name().to_string()), Some("first".to_string()));
        assert_eq!(registry.resolve("echo").unwrap().name(), "second");
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn unknown_target() {
        let registry = TargetRegistry::new();
        assert_eq!(
            registry.resolve("nope").unwrap_err(),
            CommError::UnknownTarget("nope".to_string())
        );
        registry.register("nope", Function::new("first", first));
        assert!(registry.unregister("nope").is_some());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn resolve_during_overwrites_sees_whole_entries() {
        let registry = Arc::new(TargetRegistry::new());
        registry.register("t", Function::new("first", first));

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..200 {
                    let f = if i % 2 == 0 {
                        Function::new("second", second)
                    } else {
                        Function::new("first", first)
                    };
                    registry.register("t", f);
                }
            })
        };
        for _ in 0..200 {
            let name = registry.resolve("t").unwrap().name().to_string();
            assert!(name == "first" || name == "second");
        }
        writer.join().unwrap();
    }
}
