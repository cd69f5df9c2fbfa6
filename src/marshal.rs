//! Record batch marshalling.
//!
//! Converts a native [`ReadingSet`] into the runtime's list-of-mappings
//! representation, preserving element order and per-record field values.
//! The conversion consumes the batch: this function is the last native
//! reader of each record, and the native storage is released when it
//! returns, before the script callable ever runs.

use crate::reading::ReadingSet;
use crate::runtime::{RuntimeError, ScriptSession};

/// Converts `batch` to a script-side list, consuming the native batch.
///
/// An empty batch yields an empty, non-null list — a valid outcome distinct
/// from failure.
pub fn to_script_list<S: ScriptSession>(
    session: &mut S,
    batch: ReadingSet,
) -> Result<S::Object, RuntimeError> {
    let mut list = session.empty_reading_list()?;
    for reading in batch.readings() {
        session.append_reading(&mut list, reading)?;
    }
    Ok(list)
    // `batch` is dropped here; nothing native refers to the records anymore.
}
