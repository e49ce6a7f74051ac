//! Context factory: turns a [`ContextKind`] or a name into a context.

use crate::config::ThreadNames;
use crate::context::{ContextInfo, ContextKind, ImmediateContext, RunLoop};
use crate::error::{DispatchError, Result, ResultExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Builds execution contexts. Install a custom one through
/// [`crate::config::Settings::context_factory`] to run nodes on host loops.
pub trait ContextFactory: Send + Sync {
    /// Create a context of the given kind.
    fn create(&self, kind: ContextKind) -> Result<ContextInfo>;

    /// Create a fresh context owned by one pipeline. `None` or an empty name
    /// picks a numbered default.
    fn create_named(&self, name: Option<&str>) -> Result<ContextInfo>;
}

/// Backs every kind with a dedicated [`RunLoop`], except `Test` which runs
/// inline.
#[derive(Debug, Default)]
pub struct DefaultContextFactory {
    names: ThreadNames,
    new_count: AtomicU64,
}

impl DefaultContextFactory {
    pub fn new(names: ThreadNames) -> Self {
        Self {
            names,
            new_count: AtomicU64::new(0),
        }
    }

    fn spawn(&self, name: &str) -> Result<Arc<RunLoop>> {
        let run_loop = RunLoop::spawn(name)
            .map_err(DispatchError::from)
            .with_context(|| format!("Failed to spawn run loop '{}'", name))?;
        Ok(Arc::new(run_loop))
    }
}

impl ContextFactory for DefaultContextFactory {
    fn create(&self, kind: ContextKind) -> Result<ContextInfo> {
        let info = match kind {
            ContextKind::Background => ContextInfo::shared(self.spawn(&self.names.background)?),
            ContextKind::BackgroundSecondary => {
                ContextInfo::shared(self.spawn(&self.names.background_secondary)?)
            }
            ContextKind::Network => ContextInfo::shared(self.spawn(&self.names.network)?),
            ContextKind::Io => ContextInfo::shared(self.spawn(&self.names.io)?),
            ContextKind::New => return self.create_named(None),
            ContextKind::Main => {
                let run_loop = RunLoop::spawn_main(&self.names.main)
                    .map_err(DispatchError::from)
                    .context("Failed to spawn main run loop")?;
                ContextInfo::shared(Arc::new(run_loop))
            }
            ContextKind::Test => ContextInfo::shared(Arc::new(ImmediateContext::new("dispatch-test"))),
        };
        Ok(info)
    }

    fn create_named(&self, name: Option<&str>) -> Result<ContextInfo> {
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("dispatch{}", self.new_count.fetch_add(1, Ordering::Relaxed) + 1),
        };
        Ok(ContextInfo::owned(self.spawn(&name)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_kinds_use_configured_names() {
        let names = ThreadNames {
            io: "custom-io".to_string(),
            ..ThreadNames::default()
        };
        let factory = DefaultContextFactory::new(names);
        let info = factory.create(ContextKind::Io).unwrap();
        assert_eq!(info.name(), "custom-io");
        assert!(!info.close_on_cancel);
    }

    #[test]
    fn test_new_contexts_are_numbered_and_owned() {
        let factory = DefaultContextFactory::default();
        let first = factory.create(ContextKind::New).unwrap();
        let second = factory.create_named(Some("")).unwrap();
        assert_eq!(first.name(), "dispatch1");
        assert_eq!(second.name(), "dispatch2");
        assert!(first.close_on_cancel);
    }

    #[test]
    fn test_main_kind_is_main() {
        let factory = DefaultContextFactory::default();
        assert!(factory.create(ContextKind::Main).unwrap().context.is_main());
        assert!(!factory.create(ContextKind::Test).unwrap().context.is_main());
    }
}
