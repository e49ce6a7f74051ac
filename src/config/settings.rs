//! Process-wide runtime settings
//!
//! Settings are installed explicitly with [`init`] and read with [`current`].
//! Until `init` is called, [`Settings::default`] applies. Re-initialising
//! rebuilds the context registry; pipelines already built keep the contexts
//! they were bound to.
//!
//! # Contents
//!
//! - `enable_log_warnings` - warn about pipelines started without a controller
//! - `logger` - where those warnings go
//! - `error_callback` - default sink for unrecoverable failures
//! - `context_factory` - how execution contexts are created

use crate::context::{ContextFactory, ContextRegistry, DefaultContextFactory};
use crate::error::ErrorCallback;
use crate::logging::{Logger, TracingLogger};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

/// Runtime settings for the dispatch engine
#[derive(Clone)]
pub struct Settings {
    /// Whether leak warnings are printed
    pub enable_log_warnings: bool,

    /// Logger used for engine warnings
    pub logger: Arc<dyn Logger>,

    /// Process-wide default error sink
    pub error_callback: Option<Arc<dyn ErrorCallback>>,

    /// Factory for execution contexts
    pub context_factory: Arc<dyn ContextFactory>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_log_warnings: true,
            logger: Arc::new(TracingLogger),
            error_callback: None,
            context_factory: Arc::new(DefaultContextFactory::default()),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("enable_log_warnings", &self.enable_log_warnings)
            .field("error_callback", &self.error_callback.is_some())
            .finish_non_exhaustive()
    }
}

struct Runtime {
    settings: Settings,
    registry: Arc<ContextRegistry>,
}

impl Runtime {
    fn new(settings: Settings) -> Self {
        let registry = Arc::new(ContextRegistry::new(settings.context_factory.clone()));
        Self { settings, registry }
    }
}

static RUNTIME: OnceLock<RwLock<Runtime>> = OnceLock::new();

fn runtime() -> &'static RwLock<Runtime> {
    RUNTIME.get_or_init(|| RwLock::new(Runtime::new(Settings::default())))
}

/// Install process-wide settings
pub fn init(settings: Settings) {
    tracing::debug!("Initialising dispatch settings: {:?}", settings);
    *runtime().write() = Runtime::new(settings);
}

/// Snapshot of the current settings
pub fn current() -> Settings {
    runtime().read().settings.clone()
}

/// The context registry built from the current settings
pub fn registry() -> Arc<ContextRegistry> {
    runtime().read().registry.clone()
}

/// Replace only the process-wide error callback
pub fn set_error_callback(callback: Option<Arc<dyn ErrorCallback>>) {
    runtime().write().settings.error_callback = callback;
}

/// Toggle leak warnings
pub fn set_log_warnings(enabled: bool) {
    runtime().write().settings.enable_log_warnings = enabled;
}

/// Replace the logger used for engine warnings
pub fn set_logger(logger: Arc<dyn Logger>) {
    runtime().write().settings.logger = logger;
}
