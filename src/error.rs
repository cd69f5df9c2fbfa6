//! Bridge-level error type.
//!
//! `BridgeError` covers the lifecycle operations: locating the installation
//! root, bringing the runtime up, and importing the shim module. Entry-point
//! dispatch never returns an error to the host — failures there are logged
//! and swallowed into inert return values, which is the host-facing contract.

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Errors raised while loading a bridge, before any plugin call is possible.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The environment variable naming the installation root is not set.
    #[error("environment variable {0} is not set; cannot locate the plugin runtime installation")]
    RootNotSet(&'static str),

    /// The embedded runtime failed during bring-up or a startup operation.
    #[error("script runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The shim module could not be imported; the bridge stays inert.
    #[error("failed to import shim module '{module}' for plugin '{plugin}'")]
    ImportFailed {
        /// Name of the shim module the import targeted.
        module: String,
        /// Plugin this bridge was loading.
        plugin: String,
    },
}
