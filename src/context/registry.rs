//! Process-wide cache of shared execution contexts.
//!
//! Every shared [`ContextKind`] maps to one live context. A cached context
//! that is no longer active (quit, or its loop thread faulted) is replaced
//! on the next lookup. `ContextKind::New` is never cached.

use crate::context::{ContextFactory, ContextInfo, ContextKind, ExecutionContext};
use crate::error::{DispatchError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ContextRegistry {
    factory: Arc<dyn ContextFactory>,
    shared: Mutex<HashMap<ContextKind, ContextInfo>>,
}

impl ContextRegistry {
    pub fn new(factory: Arc<dyn ContextFactory>) -> Self {
        Self {
            factory,
            shared: Mutex::new(HashMap::new()),
        }
    }

    /// Look up (or create) the context for `kind`.
    pub fn get(&self, kind: ContextKind) -> Result<ContextInfo> {
        if !kind.is_shared() {
            return self.factory.create(kind);
        }

        let mut shared = self.shared.lock();
        if let Some(info) = shared.get(&kind) {
            if info.context.is_active() {
                return Ok(info.clone());
            }
            tracing::warn!(
                "Shared context '{}' is no longer active, recreating",
                info.name()
            );
        }

        let info = self.factory.create(kind)?;
        shared.insert(kind, info.clone());
        Ok(info)
    }

    /// A fresh pipeline-owned context.
    pub fn named(&self, name: Option<&str>) -> Result<ContextInfo> {
        self.factory.create_named(name)
    }

    /// The designated main context.
    pub fn main(&self) -> Result<ContextInfo> {
        self.get(ContextKind::Main)
    }

    /// Context suitable for background work: rejects the main context.
    pub fn background(&self, kind: ContextKind) -> Result<ContextInfo> {
        let info = self.get(kind)?;
        ensure_not_main(info.context.as_ref())?;
        Ok(info)
    }
}

/// Reject contexts designated as main for background pipelines.
pub fn ensure_not_main(context: &dyn ExecutionContext) -> Result<()> {
    if context.is_main() {
        return Err(DispatchError::MainContextForBackground {
            context: context.name().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DefaultContextFactory;

    fn registry() -> ContextRegistry {
        ContextRegistry::new(Arc::new(DefaultContextFactory::default()))
    }

    #[test]
    fn test_shared_kinds_are_cached() {
        let registry = registry();
        let a = registry.get(ContextKind::Network).unwrap();
        let b = registry.get(ContextKind::Network).unwrap();
        assert!(Arc::ptr_eq(&a.context, &b.context));
    }

    #[test]
    fn test_new_kind_is_not_cached() {
        let registry = registry();
        let a = registry.get(ContextKind::New).unwrap();
        let b = registry.get(ContextKind::New).unwrap();
        assert!(!Arc::ptr_eq(&a.context, &b.context));
    }

    #[test]
    fn test_inactive_context_is_replaced() {
        let registry = registry();
        let a = registry.get(ContextKind::Io).unwrap();
        a.context.quit();
        let b = registry.get(ContextKind::Io).unwrap();
        assert!(!Arc::ptr_eq(&a.context, &b.context));
        assert!(b.context.is_active());
    }

    #[test]
    fn test_background_rejects_main() {
        let registry = registry();
        let err = registry.background(ContextKind::Main).unwrap_err();
        assert!(matches!(err, DispatchError::MainContextForBackground { .. }));
        assert!(registry.background(ContextKind::Background).is_ok());
    }
}
