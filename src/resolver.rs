//! Entry-point symbol resolution.
//!
//! The host's plugin loader probes the bridge by symbol name once at load
//! time and then dispatches through what it resolved. The set of entry
//! points is closed, so resolution is a fixed lookup table from name to
//! [`EntryPoint`] variant; the host matches on the variant to reach the
//! corresponding [`Bridge`](crate::Bridge) method.
//!
//! Resolution is pure (no runtime interaction) and safe to call before the
//! bridge has loaded its script module — hosts commonly probe capabilities
//! before initializing the plugin.

use tracing::{error, warn};

/// The closed set of entry points a filter plugin exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// `plugin_info`: describe the plugin.
    Info,
    /// `plugin_init`: create a configured plugin instance.
    Init,
    /// `plugin_ingest`: filter one batch of readings.
    Ingest,
    /// `plugin_reconfigure`: apply a new configuration snapshot.
    Reconfigure,
    /// `plugin_shutdown`: tear the plugin instance down.
    Shutdown,
}

impl EntryPoint {
    /// Every supported entry point, in ABI declaration order.
    pub const ALL: [EntryPoint; 5] = [
        EntryPoint::Info,
        EntryPoint::Init,
        EntryPoint::Ingest,
        EntryPoint::Reconfigure,
        EntryPoint::Shutdown,
    ];

    /// The ABI symbol name, which doubles as the script callable name.
    pub const fn symbol(self) -> &'static str {
        match self {
            EntryPoint::Info => "plugin_info",
            EntryPoint::Init => "plugin_init",
            EntryPoint::Ingest => "plugin_ingest",
            EntryPoint::Reconfigure => "plugin_reconfigure",
            EntryPoint::Shutdown => "plugin_shutdown",
        }
    }
}

/// Recognized but unsupported in the filter plugin profile.
const UNSUPPORTED_SYMBOL: &str = "plugin_start";

/// Maps a requested symbol name to its entry point.
///
/// `plugin_start` is recognized but unsupported for filter plugins: it is
/// reported to the host as absent after a warning, not an error. Any name
/// outside the closed set is an unknown symbol, logged at fatal severity.
pub fn resolve_symbol(plugin_name: &str, symbol: &str) -> Option<EntryPoint> {
    for entry in EntryPoint::ALL {
        if symbol == entry.symbol() {
            return Some(entry);
        }
    }
    if symbol == UNSUPPORTED_SYMBOL {
        warn!("filter plugin bridge does not support '{UNSUPPORTED_SYMBOL}'");
        return None;
    }
    error!(
        "cannot resolve symbol '{}' in the filter plugin bridge, plugin '{}'",
        symbol, plugin_name
    );
    None
}
