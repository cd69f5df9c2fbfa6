//! Embedded-scripting bridge for filter plugins.
//!
//! A pipeline host loads filter plugins through a fixed entry-point contract
//! (`plugin_info`, `plugin_init`, `plugin_ingest`, `plugin_reconfigure`,
//! `plugin_shutdown`). This crate makes a plugin written for an embedded
//! scripting runtime look exactly like a native one: the host resolves entry
//! points by name, holds them for the plugin's lifetime, and invokes them
//! from its own threads; the bridge translates each call into a script
//! invocation under the runtime's global execution lock.
//!
//! # Architecture
//!
//! ```text
//! host plugin loader
//!     ├── resolver::resolve_symbol        (name -> EntryPoint, load time)
//!     └── Bridge<R: ScriptRuntime>
//!         ├── lifecycle: load / unload    (interpreter bring-up, shim import)
//!         ├── dispatch: plugin_*          (lock, look up callable, call)
//!         │   └── marshal                 (ReadingSet -> script list)
//!         └── runtime backend
//!             ├── PyRuntime               (feature `scripting_python`)
//!             └── test stubs              (tests/common)
//! ```
//!
//! The bridge owns exactly one runtime instance and one script module. All
//! script execution is serialized by the runtime's execution lock, acquired
//! for the full duration of every entry-point call; a hang in script code
//! blocks the calling host thread indefinitely, by design.
//!
//! Script-side failures never surface to the host as faults. They are logged
//! (fatal severity for a missing module or callable, error severity for a
//! failing call) and the entry point returns its inert value: no handle, no
//! info, a silent no-op for ingest and friends.

pub mod bridge;
pub mod error;
pub mod marshal;
pub mod plugin;
pub mod reading;
pub mod resolver;
pub mod runtime;

pub use bridge::Bridge;
pub use error::BridgeError;
pub use plugin::{OutputBinding, OutputHandle, OutputStream, PluginInfo};
pub use reading::{DatapointValue, Reading, ReadingSet};
pub use resolver::{resolve_symbol, EntryPoint};
pub use runtime::{RuntimeError, ScriptRuntime, ScriptSession};

#[cfg(feature = "scripting_python")]
pub use runtime::python::PyRuntime;
