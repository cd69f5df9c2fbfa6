//! Types crossing the host plugin ABI.
//!
//! These mirror what the host's plugin loader exchanges with any filter
//! plugin, native or scripted: the descriptive [`PluginInfo`] block returned
//! by `plugin_info`, and the output binding handed to `plugin_init` that
//! tells a plugin where to forward filtered batches.

use serde::{Deserialize, Serialize};

use crate::reading::ReadingSet;

/// Descriptive information a plugin reports about itself.
///
/// The script's `plugin_info` entry point returns this as a mapping; the
/// bridge converts it to the native form the host expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin version string.
    pub version: String,
    /// Operating mode flags, e.g. `"none"` or `"poll"`.
    pub mode: String,
    /// Plugin kind; always `"filter"` for plugins served by this bridge.
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Plugin interface version the plugin was written against.
    pub interface: String,
    /// Default configuration category for the plugin.
    pub config: serde_json::Value,
}

/// Opaque token identifying the downstream destination for filtered batches.
///
/// The host creates it, the bridge forwards it verbatim, and only the host
/// ever interprets it. The bridge never dereferences the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputHandle(pub u64);

/// Native function the host exposes for forwarding a filtered batch
/// downstream, invoked as `(output_handle, new_batch)`.
///
/// The bridge never calls this itself; the call is made from within the
/// script layer through the wrapped reference created at init time. A plugin
/// may legitimately never invoke it for a given input (buffering and
/// suppression are valid filter behaviors).
pub type OutputStream = fn(OutputHandle, ReadingSet);

/// The (destination, stream) pair supplied once at `plugin_init` time.
#[derive(Clone, Copy)]
pub struct OutputBinding {
    /// Destination token passed back on every forwarded batch.
    pub handle: OutputHandle,
    /// Host function receiving forwarded batches.
    pub stream: OutputStream,
}

impl std::fmt::Debug for OutputBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBinding")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
