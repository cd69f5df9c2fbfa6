//! Runtime lifecycle: bring-up, shim import, teardown.
//!
//! Loading runs once per bridge and must complete before any entry point is
//! dispatched. The sequence follows the embedded runtime's own startup
//! contract: bring the interpreter up (which ends with the execution lock
//! released, exactly once, for thread-state setup), then under a single lock
//! hold extend the module search path, publish the plugin name through the
//! argument vector, and import the shim module that adapts the plugin's
//! entry points.
//!
//! Import failure is fatal-logged but leaves the bridge safely inert: the
//! module slot stays empty, so every later dispatch no-ops with a fatal
//! diagnostic instead of crashing the host.

use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::error::BridgeError;
use crate::runtime::{RuntimeError, ScriptRuntime, ScriptSession};
use crate::Bridge;

/// Environment variable naming the installation root directory.
pub const ROOT_ENV: &str = "PYBRIDGE_ROOT";

/// Name of the shim entry module imported at load time.
pub const SHIM_MODULE: &str = "filter_shim";

/// Shim module directory, relative to the installation root.
pub const SHIM_REL_PATH: &str = "python/plugins/common/shim";

/// Shared script support-code directory, relative to the installation root.
pub const SUPPORT_REL_PATH: &str = "python";

/// Search-path layout derived from one installation root.
struct ShimLayout {
    shim_dir: PathBuf,
    support_dir: PathBuf,
}

impl ShimLayout {
    fn from_root(root: &Path) -> Self {
        Self {
            shim_dir: root.join(SHIM_REL_PATH),
            support_dir: root.join(SUPPORT_REL_PATH),
        }
    }
}

impl<R: ScriptRuntime> Bridge<R> {
    /// Loads the shim module, locating the installation via [`ROOT_ENV`].
    ///
    /// Absence of the environment variable is a fatal startup condition.
    /// Not safe to call concurrently with itself; the host calls it once
    /// per bridge instantiation.
    pub fn load(&self, plugin_path: &Path) -> Result<(), BridgeError> {
        let root = env::var(ROOT_ENV).map_err(|_| {
            error!(
                "{} is not set; cannot load plugin '{}'",
                ROOT_ENV, self.plugin_name()
            );
            BridgeError::RootNotSet(ROOT_ENV)
        })?;
        self.load_from_root(plugin_path, Path::new(&root))
    }

    /// Loads the shim module from an explicit installation root.
    pub fn load_from_root(&self, plugin_path: &Path, root: &Path) -> Result<(), BridgeError> {
        let layout = ShimLayout::from_root(root);
        debug!(
            "loading plugin '{}' (path {}): shim dir {}, support dir {}",
            self.plugin_name(),
            plugin_path.display(),
            layout.shim_dir.display(),
            layout.support_dir.display()
        );

        // Interpreter bring-up ends with the execution lock released; the
        // import sequence below reacquires it once for its full duration.
        self.runtime().bootstrap()?;

        let imported = self
            .runtime()
            .with_lock(|session| -> Result<R::Module, RuntimeError> {
                session.append_search_path(&layout.shim_dir)?;
                session.append_search_path(&layout.support_dir)?;
                session.set_argv(&["", self.plugin_name()])?;
                session.import_module(SHIM_MODULE)
            });

        match imported {
            Ok(module) => {
                *self.module_slot() = Some(module);
                debug!(
                    "shim module '{}' loaded for plugin '{}'",
                    SHIM_MODULE,
                    self.plugin_name()
                );
                Ok(())
            }
            Err(err) => {
                if let Some(detail) = err.detail() {
                    error!(
                        "script error while loading plugin '{}': {}",
                        self.plugin_name(),
                        detail
                    );
                }
                match err {
                    RuntimeError::ImportFailed { .. } => {
                        error!(
                            "cannot import shim module '{}' from {} for plugin '{}'",
                            SHIM_MODULE,
                            layout.shim_dir.display(),
                            self.plugin_name()
                        );
                        Err(BridgeError::ImportFailed {
                            module: SHIM_MODULE.to_string(),
                            plugin: self.plugin_name().to_string(),
                        })
                    }
                    other => {
                        error!(
                            "runtime startup failed for plugin '{}': {}",
                            self.plugin_name(),
                            other
                        );
                        Err(BridgeError::Runtime(other))
                    }
                }
            }
        }
    }

    /// Releases the script module, returning the bridge to its inert state.
    ///
    /// Called by `plugin_shutdown`; the module slot has no other writers
    /// after load.
    pub fn unload(&self) {
        if self.module_slot().take().is_some() {
            debug!("script module released for plugin '{}'", self.plugin_name());
        }
    }
}
