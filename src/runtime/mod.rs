//! The seam between the bridge core and the embedded scripting runtime.
//!
//! The bridge is generic over a [`ScriptRuntime`]: the real backend embeds
//! CPython (see [`python`], feature `scripting_python`), and the test suite
//! drives the same dispatch code with a stub that records lock hold/release
//! pairs and simulates script functions.
//!
//! # Locking
//!
//! Embedded runtimes of this kind serialize every touch of interpreter state
//! behind one global execution lock — their data structures are not
//! otherwise thread-safe. [`ScriptRuntime::with_lock`] is the only way to
//! obtain a [`ScriptSession`], so holding the lock for the full duration of
//! an entry-point call is structural, and the lock is released on every exit
//! path when the closure unwinds its scope. Acquisition blocks for as long
//! as another thread's script call is in flight; there is no timeout.
//!
//! # Error draining
//!
//! A pending error left inside the runtime corrupts subsequent, unrelated
//! calls. Session operations therefore return failures that already carry
//! the drained error detail ([`RuntimeError::detail`]); the dispatcher logs
//! it at the point of detection and nothing pends across a call boundary.

use std::path::Path;

use thiserror::Error;

use crate::plugin::{OutputHandle, OutputStream};
use crate::reading::Reading;
use crate::PluginInfo;

#[cfg(feature = "scripting_python")]
pub mod python;

/// Errors reported by a runtime session operation.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Interpreter bring-up failed.
    #[error("runtime startup failed: {0}")]
    Startup(String),

    /// Importing a script module failed.
    #[error("import of module '{module}' failed")]
    ImportFailed {
        /// Module name the import targeted.
        module: String,
        /// Drained script-side error detail, when the runtime produced one.
        detail: Option<String>,
    },

    /// The requested callable is absent from the module or not invocable.
    #[error("callable '{name}' is missing or not invocable")]
    MissingCallable {
        /// Name of the callable that was looked up.
        name: String,
        /// Drained script-side error detail, when the runtime produced one.
        detail: Option<String>,
    },

    /// An invocable script function raised or returned no usable result.
    #[error("script call raised an error")]
    CallFailed {
        /// Drained script-side error detail, when the runtime produced one.
        detail: Option<String>,
    },

    /// A native value could not be converted to or from script form.
    #[error("cannot marshal value: {0}")]
    Marshal(String),
}

impl RuntimeError {
    /// The drained script-side error detail attached to this failure, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            RuntimeError::ImportFailed { detail, .. }
            | RuntimeError::MissingCallable { detail, .. }
            | RuntimeError::CallFailed { detail } => detail.as_deref(),
            RuntimeError::Startup(_) | RuntimeError::Marshal(_) => None,
        }
    }
}

/// An embedded scripting runtime owned by one bridge instance.
pub trait ScriptRuntime: Send + Sync {
    /// Owned reference to a loaded script module.
    type Module: Send + Sync;
    /// Owned reference to an arbitrary script-side value. Dropping it
    /// releases the script-side reference.
    type Object: Send + Sync;
    /// Session type giving access to script state while the execution lock
    /// is held.
    type Session<'a>: ScriptSession<Module = Self::Module, Object = Self::Object>
    where
        Self: 'a;

    /// One-time interpreter bring-up.
    ///
    /// Returns with the execution lock *released*: runtimes of this family
    /// require the initializing thread to hand the lock back once after
    /// thread-state setup, before normal scoped acquisition begins. Safe to
    /// call more than once; later calls are no-ops.
    fn bootstrap(&self) -> Result<(), RuntimeError>;

    /// Acquires the runtime's global execution lock, blocking until it is
    /// available, and runs `f` with a session. The lock is released when
    /// `f` returns, on every exit path.
    fn with_lock<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut Self::Session<'_>) -> T;
}

/// Operations available while the execution lock is held.
///
/// All methods take `&mut self`: a session is single-threaded by
/// construction, and exclusive access keeps stub implementations honest.
pub trait ScriptSession {
    /// Owned reference to a loaded script module.
    type Module;
    /// Owned reference to an arbitrary script-side value.
    type Object;

    /// Appends a directory to the runtime's module search path.
    fn append_search_path(&mut self, dir: &Path) -> Result<(), RuntimeError>;

    /// Sets the runtime's command-line argument vector, so script code can
    /// recover which plugin it is serving.
    fn set_argv(&mut self, argv: &[&str]) -> Result<(), RuntimeError>;

    /// Imports a module by name.
    fn import_module(&mut self, name: &str) -> Result<Self::Module, RuntimeError>;

    /// Looks up `name` in `module` and confirms it is invocable.
    fn callable(
        &mut self,
        module: &Self::Module,
        name: &str,
    ) -> Result<Self::Object, RuntimeError>;

    /// Invokes `callable` with positional `args`.
    fn call(
        &mut self,
        callable: &Self::Object,
        args: &[&Self::Object],
    ) -> Result<Self::Object, RuntimeError>;

    /// True when `value` is the runtime's null sentinel (e.g. `None`).
    fn is_unset(&mut self, value: &Self::Object) -> bool;

    /// Short identity string for result-trace logging.
    fn describe(&mut self, value: &Self::Object) -> String;

    /// Converts native text to the runtime's string type.
    fn text(&mut self, value: &str) -> Result<Self::Object, RuntimeError>;

    /// Wraps the opaque output destination token for script-side transport.
    fn wrap_output_handle(&mut self, handle: OutputHandle) -> Result<Self::Object, RuntimeError>;

    /// Wraps the native output stream function for script-side transport.
    fn wrap_output_stream(&mut self, stream: OutputStream) -> Result<Self::Object, RuntimeError>;

    /// Creates an empty script-side reading list.
    fn empty_reading_list(&mut self) -> Result<Self::Object, RuntimeError>;

    /// Appends `reading`, converted to the runtime's mapping type, to a list
    /// created by [`empty_reading_list`](Self::empty_reading_list).
    fn append_reading(
        &mut self,
        list: &mut Self::Object,
        reading: &Reading,
    ) -> Result<(), RuntimeError>;

    /// Converts a script-side `plugin_info` result to its native form.
    fn plugin_info(&mut self, value: &Self::Object) -> Result<PluginInfo, RuntimeError>;
}
