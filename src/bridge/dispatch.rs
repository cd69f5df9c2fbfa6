//! Entry-point dispatch: native ABI call in, script invocation out.
//!
//! Every entry point shares one shape. Check the module slot (an empty slot
//! is fatal-logged and returns the entry point's inert value, without
//! touching the execution lock). Acquire the lock for the remainder of the
//! call. Look up the script callable; a missing or non-invocable attribute
//! is fatal-logged together with any drained script error. Marshal the
//! native arguments, invoke, and interpret the outcome: a raising call is
//! recoverable — logged at error severity, the bridge and runtime stay
//! usable — while a successful one gets a debug trace of the result's
//! identity. Transient script references drop at scope exit on every path,
//! and the lock releases last, when the `with_lock` closure unwinds.
//!
//! The host may drive different entry points from different threads at the
//! same time; the execution lock totally serializes them in whatever order
//! they acquire it. No fairness, no timeout, no cancellation.

use tracing::{debug, error};

use crate::marshal;
use crate::plugin::{OutputBinding, PluginInfo};
use crate::reading::ReadingSet;
use crate::resolver::EntryPoint;
use crate::runtime::{RuntimeError, ScriptRuntime, ScriptSession};
use crate::Bridge;

impl<R: ScriptRuntime> Bridge<R> {
    /// `plugin_info`: asks the script to describe the plugin.
    ///
    /// Returns `None` when the module is not loaded, the callable is
    /// missing, the call raises, or the result cannot be converted.
    pub fn plugin_info(&self) -> Option<PluginInfo> {
        self.call_entry(EntryPoint::Info, |session, callable| {
            let result = match session.call(callable, &[]) {
                Ok(result) => result,
                Err(err) => {
                    self.log_call_failure(EntryPoint::Info, &err);
                    return None;
                }
            };
            debug!(
                "plugin_info: got result object '{}', plugin '{}'",
                session.describe(&result),
                self.plugin_name()
            );
            match session.plugin_info(&result) {
                Ok(info) => Some(info),
                Err(err) => {
                    error!(
                        "plugin_info: unusable result for plugin '{}': {}",
                        self.plugin_name(),
                        err
                    );
                    None
                }
            }
        })
    }

    /// `plugin_init`: creates a configured plugin instance.
    ///
    /// `config` is the serialized configuration snapshot, passed to the
    /// script verbatim. The output binding is wrapped as two opaque
    /// script-side references — destination first, stream second — stored by
    /// the plugin for the lifetime of the handle.
    ///
    /// The returned handle is an owned script-side object the host must
    /// treat as opaque and pass back unmodified on every subsequent call. A
    /// call that succeeds but yields the runtime's null sentinel is treated
    /// as "no usable result" and reported as `None`.
    pub fn plugin_init(&self, config: &str, output: OutputBinding) -> Option<R::Object> {
        self.call_entry(EntryPoint::Init, |session, callable| {
            let args = (|| -> Result<[R::Object; 3], RuntimeError> {
                Ok([
                    session.text(config)?,
                    session.wrap_output_handle(output.handle)?,
                    session.wrap_output_stream(output.stream)?,
                ])
            })();
            let args = match args {
                Ok(args) => args,
                Err(err) => {
                    error!(
                        "plugin_init: cannot marshal arguments for plugin '{}': {}",
                        self.plugin_name(),
                        err
                    );
                    return None;
                }
            };
            match session.call(callable, &[&args[0], &args[1], &args[2]]) {
                Ok(handle) => {
                    debug!(
                        "plugin_init: got result object '{}', plugin '{}'",
                        session.describe(&handle),
                        self.plugin_name()
                    );
                    if session.is_unset(&handle) {
                        error!(
                            "plugin_init: no usable handle returned for plugin '{}'",
                            self.plugin_name()
                        );
                        None
                    } else {
                        Some(handle)
                    }
                }
                Err(err) => {
                    self.log_call_failure(EntryPoint::Init, &err);
                    None
                }
            }
        })
    }

    /// `plugin_ingest`: feeds one batch of readings through the filter.
    ///
    /// Takes ownership of `batch`; the native records are converted to
    /// script form and released before the script callable runs, on every
    /// path. The plugin forwards its output (if any) through the binding it
    /// received at init time — the bridge neither sees nor returns it.
    pub fn plugin_ingest(&self, handle: &R::Object, batch: ReadingSet) {
        self.call_entry(EntryPoint::Ingest, move |session, callable| {
            let readings = match marshal::to_script_list(session, batch) {
                Ok(readings) => readings,
                Err(err) => {
                    error!(
                        "plugin_ingest: cannot marshal readings for plugin '{}': {}",
                        self.plugin_name(),
                        err
                    );
                    return None;
                }
            };
            match session.call(callable, &[handle, &readings]) {
                Ok(result) => {
                    debug!(
                        "plugin_ingest: got result object '{}', plugin '{}'",
                        session.describe(&result),
                        self.plugin_name()
                    );
                }
                Err(err) => self.log_call_failure(EntryPoint::Ingest, &err),
            }
            Some(())
        });
    }

    /// `plugin_reconfigure`: hands the script a new configuration snapshot.
    ///
    /// The snapshot is immutable text; with the execution lock held for the
    /// whole call, the script observes either the prior or the new
    /// configuration, never an interleaving.
    pub fn plugin_reconfigure(&self, handle: &R::Object, new_config: &str) {
        self.call_entry(EntryPoint::Reconfigure, |session, callable| {
            let config = match session.text(new_config) {
                Ok(config) => config,
                Err(err) => {
                    error!(
                        "plugin_reconfigure: cannot marshal configuration for plugin '{}': {}",
                        self.plugin_name(),
                        err
                    );
                    return None;
                }
            };
            match session.call(callable, &[handle, &config]) {
                Ok(result) => {
                    debug!(
                        "plugin_reconfigure: got result object '{}', plugin '{}'",
                        session.describe(&result),
                        self.plugin_name()
                    );
                }
                Err(err) => self.log_call_failure(EntryPoint::Reconfigure, &err),
            }
            Some(())
        });
    }

    /// `plugin_shutdown`: tears the plugin instance down.
    ///
    /// Consumes the handle — the script-side object is released after the
    /// call — and clears the module slot, returning the bridge to its inert
    /// state: subsequent dispatches fatal-log and no-op.
    pub fn plugin_shutdown(&self, handle: R::Object) {
        self.call_entry(EntryPoint::Shutdown, |session, callable| {
            match session.call(callable, &[&handle]) {
                Ok(result) => {
                    debug!(
                        "plugin_shutdown: got result object '{}', plugin '{}'",
                        session.describe(&result),
                        self.plugin_name()
                    );
                }
                Err(err) => self.log_call_failure(EntryPoint::Shutdown, &err),
            }
            Some(())
        });
        drop(handle);
        self.unload();
    }

    /// The shared dispatch shape: module precondition, scoped lock, callable
    /// lookup, then the entry-specific body.
    fn call_entry<T>(
        &self,
        entry: EntryPoint,
        body: impl FnOnce(&mut R::Session<'_>, &R::Object) -> Option<T>,
    ) -> Option<T> {
        let guard = self.module_guard();
        let Some(module) = guard.as_ref() else {
            error!(
                "{}: no script module loaded for plugin '{}'",
                entry.symbol(),
                self.plugin_name()
            );
            return None;
        };
        self.runtime().with_lock(|session| {
            let callable = match session.callable(module, entry.symbol()) {
                Ok(callable) => callable,
                Err(err) => {
                    if let Some(detail) = err.detail() {
                        error!(
                            "{}: script error for plugin '{}': {}",
                            entry.symbol(),
                            self.plugin_name(),
                            detail
                        );
                    }
                    error!(
                        "cannot find callable '{}' in loaded script module, plugin '{}'",
                        entry.symbol(),
                        self.plugin_name()
                    );
                    return None;
                }
            };
            body(session, &callable)
            // `callable` and the body's transient references drop here,
            // before `with_lock` releases the execution lock.
        })
    }

    fn log_call_failure(&self, entry: EntryPoint, err: &RuntimeError) {
        error!(
            "{}: error while getting result object, plugin '{}'",
            entry.symbol(),
            self.plugin_name()
        );
        if let Some(detail) = err.detail() {
            error!(
                "{}: script error for plugin '{}': {}",
                entry.symbol(),
                self.plugin_name(),
                detail
            );
        }
    }
}
