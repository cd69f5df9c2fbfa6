//! The bridge context: one runtime, one script module, one plugin.
//!
//! A [`Bridge`] is an explicitly owned value, not a process global. A host
//! that loads several scripted plugins creates one bridge per plugin; each
//! owns its runtime instance and that runtime's execution lock, so bridges
//! never share script state.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::resolver::{self, EntryPoint};
use crate::runtime::ScriptRuntime;

pub mod dispatch;
pub mod lifecycle;

pub use lifecycle::{ROOT_ENV, SHIM_MODULE, SHIM_REL_PATH, SUPPORT_REL_PATH};

/// Drives one script-implemented filter plugin behind the native plugin ABI.
///
/// The module slot is written only by the lifecycle operations
/// ([`load`](Bridge::load), [`unload`](Bridge::unload)); dispatch only reads
/// it. A dispatcher call that observes an empty slot logs at fatal severity
/// and returns its inert value without touching the execution lock.
pub struct Bridge<R: ScriptRuntime> {
    plugin_name: String,
    runtime: R,
    module: RwLock<Option<R::Module>>,
}

impl<R: ScriptRuntime> Bridge<R> {
    /// Creates an inert bridge for `plugin_name`.
    ///
    /// Symbol resolution works immediately; entry-point dispatch stays inert
    /// until [`load`](Bridge::load) succeeds.
    pub fn new(runtime: R, plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            runtime,
            module: RwLock::new(None),
        }
    }

    /// The plugin this bridge serves; used in every diagnostic message.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// True once the shim module has been imported and not yet unloaded.
    pub fn is_loaded(&self) -> bool {
        self.module_guard().is_some()
    }

    /// Maps a requested entry-point symbol to its dispatcher.
    ///
    /// Pure and safe to call before [`load`](Bridge::load); the host probes
    /// capabilities this way at plugin load time.
    pub fn resolve_symbol(&self, symbol: &str) -> Option<EntryPoint> {
        resolver::resolve_symbol(&self.plugin_name, symbol)
    }

    pub(crate) fn runtime(&self) -> &R {
        &self.runtime
    }

    pub(crate) fn module_guard(&self) -> RwLockReadGuard<'_, Option<R::Module>> {
        self.module.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn module_slot(&self) -> RwLockWriteGuard<'_, Option<R::Module>> {
        self.module.write().unwrap_or_else(PoisonError::into_inner)
    }
}
