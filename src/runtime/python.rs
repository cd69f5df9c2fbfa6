//! CPython backend for the bridge.
//!
//! The execution lock is the interpreter's GIL: [`PyRuntime::with_lock`] is
//! `Python::with_gil`, so every session lives inside one GIL hold and the
//! release-on-all-paths guarantee comes from the closure scope.
//!
//! Bring-up fixes the runtime's reported program name to the bridge
//! identifier, registers the `filter_ingest` helper module on the
//! interpreter init tab, then starts the freethreaded interpreter, which
//! hands the GIL back to the runtime once thread-state setup is done.
//! The shim imports `filter_ingest` to forward filtered batches downstream:
//! `filter_ingest_callback` unwraps the two capsules created at init time,
//! rebuilds a native [`ReadingSet`] from the script list, and invokes the
//! host's output stream as `(output_handle, new_batch)`.

use std::ffi::CStr;
use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use pyo3::exceptions::{PyKeyError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyCapsule, PyDict, PyList, PyString, PyTracebackMethods, PyTuple};
use tracing::warn;

use crate::plugin::{OutputHandle, OutputStream, PluginInfo};
use crate::reading::{DatapointValue, Reading, ReadingSet};
use crate::runtime::{RuntimeError, ScriptRuntime, ScriptSession};

const OUTPUT_HANDLE_CAPSULE: &CStr = c"pybridge.output_handle";
const OUTPUT_STREAM_CAPSULE: &CStr = c"pybridge.output_stream";

/// Fixed identifier the runtime reports as its program name.
const PROGRAM_NAME: &CStr = c"filter_shim";

static PYTHON_READY: OnceCell<()> = OnceCell::new();

/// The embedded CPython runtime owned by one bridge.
#[derive(Debug, Default)]
pub struct PyRuntime;

impl PyRuntime {
    /// Creates the runtime handle. The interpreter itself starts at
    /// [`bootstrap`](ScriptRuntime::bootstrap).
    pub fn new() -> Self {
        Self
    }
}

impl ScriptRuntime for PyRuntime {
    type Module = Py<PyModule>;
    type Object = Py<PyAny>;
    type Session<'a>
        = PySession<'a>
    where
        Self: 'a;

    fn bootstrap(&self) -> Result<(), RuntimeError> {
        PYTHON_READY.get_or_init(|| {
            if interpreter_initialized() {
                // Pre-init configuration belongs to whoever started the
                // interpreter; leave its identity and module table alone.
                warn!("interpreter already initialized; keeping its program name and module table");
            } else {
                // Both steps must precede interpreter init: the program
                // name so the runtime reports itself as the shim host, the
                // inittab entry so the shim can `import filter_ingest` like
                // any other module.
                set_program_name(PROGRAM_NAME);
                pyo3::append_to_inittab!(filter_ingest);
            }
            pyo3::prepare_freethreaded_python();
        });
        Ok(())
    }

    fn with_lock<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut Self::Session<'_>) -> T,
    {
        Python::with_gil(|py| f(&mut PySession { py }))
    }
}

/// Session operations executed while the GIL is held.
pub struct PySession<'py> {
    py: Python<'py>,
}

impl ScriptSession for PySession<'_> {
    type Module = Py<PyModule>;
    type Object = Py<PyAny>;

    fn append_search_path(&mut self, dir: &Path) -> Result<(), RuntimeError> {
        let py = self.py;
        let appended = (|| -> PyResult<()> {
            let sys = py.import("sys")?;
            let path = sys.getattr("path")?.downcast_into::<PyList>().map_err(PyErr::from)?;
            path.append(dir.to_string_lossy().as_ref())?;
            Ok(())
        })();
        appended.map_err(|err| RuntimeError::Startup(format_exception(py, &err)))
    }

    fn set_argv(&mut self, argv: &[&str]) -> Result<(), RuntimeError> {
        let py = self.py;
        let set = (|| -> PyResult<()> {
            let sys = py.import("sys")?;
            sys.setattr("argv", PyList::new(py, argv.iter().copied())?)?;
            Ok(())
        })();
        set.map_err(|err| RuntimeError::Startup(format_exception(py, &err)))
    }

    fn import_module(&mut self, name: &str) -> Result<Self::Module, RuntimeError> {
        match self.py.import(name) {
            Ok(module) => Ok(module.unbind()),
            Err(err) => Err(RuntimeError::ImportFailed {
                module: name.to_string(),
                detail: Some(format_exception(self.py, &err)),
            }),
        }
    }

    fn callable(
        &mut self,
        module: &Self::Module,
        name: &str,
    ) -> Result<Self::Object, RuntimeError> {
        let attr = match module.bind(self.py).getattr(name) {
            Ok(attr) => attr,
            Err(err) => {
                return Err(RuntimeError::MissingCallable {
                    name: name.to_string(),
                    detail: Some(format_exception(self.py, &err)),
                })
            }
        };
        if !attr.is_callable() {
            return Err(RuntimeError::MissingCallable {
                name: name.to_string(),
                detail: None,
            });
        }
        Ok(attr.unbind())
    }

    fn call(
        &mut self,
        callable: &Self::Object,
        args: &[&Self::Object],
    ) -> Result<Self::Object, RuntimeError> {
        let py = self.py;
        let args = PyTuple::new(py, args.iter().map(|obj| obj.bind(py)))
            .map_err(|err| RuntimeError::Marshal(format_exception(py, &err)))?;
        match callable.bind(py).call1(args) {
            Ok(result) => Ok(result.unbind()),
            Err(err) => Err(RuntimeError::CallFailed {
                detail: Some(format_exception(py, &err)),
            }),
        }
    }

    fn is_unset(&mut self, value: &Self::Object) -> bool {
        value.bind(self.py).is_none()
    }

    fn describe(&mut self, value: &Self::Object) -> String {
        format!("{:p}", value.as_ptr())
    }

    fn text(&mut self, value: &str) -> Result<Self::Object, RuntimeError> {
        Ok(PyString::new(self.py, value).into_any().unbind())
    }

    fn wrap_output_handle(&mut self, handle: OutputHandle) -> Result<Self::Object, RuntimeError> {
        let py = self.py;
        PyCapsule::new(py, handle, Some(OUTPUT_HANDLE_CAPSULE.into()))
            .map(|capsule| capsule.into_any().unbind())
            .map_err(|err| RuntimeError::Marshal(format_exception(py, &err)))
    }

    fn wrap_output_stream(&mut self, stream: OutputStream) -> Result<Self::Object, RuntimeError> {
        let py = self.py;
        PyCapsule::new(py, stream, Some(OUTPUT_STREAM_CAPSULE.into()))
            .map(|capsule| capsule.into_any().unbind())
            .map_err(|err| RuntimeError::Marshal(format_exception(py, &err)))
    }

    fn empty_reading_list(&mut self) -> Result<Self::Object, RuntimeError> {
        Ok(PyList::empty(self.py).into_any().unbind())
    }

    fn append_reading(
        &mut self,
        list: &mut Self::Object,
        reading: &Reading,
    ) -> Result<(), RuntimeError> {
        let py = self.py;
        let appended = (|| -> PyResult<()> {
            let record = PyDict::new(py);
            record.set_item("asset", &reading.asset)?;
            record.set_item("timestamp", reading.timestamp.to_rfc3339())?;
            let values = PyDict::new(py);
            for (name, value) in &reading.values {
                match value {
                    DatapointValue::Bool(b) => values.set_item(name, *b)?,
                    DatapointValue::Integer(i) => values.set_item(name, *i)?,
                    DatapointValue::Float(f) => values.set_item(name, *f)?,
                    DatapointValue::Text(s) => values.set_item(name, s)?,
                    DatapointValue::FloatArray(a) => {
                        values.set_item(name, PyList::new(py, a.iter().copied())?)?;
                    }
                }
            }
            record.set_item("readings", values)?;
            list.bind(py).downcast::<PyList>()?.append(record)?;
            Ok(())
        })();
        appended.map_err(|err| RuntimeError::Marshal(format_exception(py, &err)))
    }

    fn plugin_info(&mut self, value: &Self::Object) -> Result<PluginInfo, RuntimeError> {
        let py = self.py;
        let info = (|| -> PyResult<PluginInfo> {
            let dict = value.bind(py).downcast::<PyDict>()?;
            let field = |key: &str| -> PyResult<String> {
                dict.get_item(key)?
                    .ok_or_else(|| PyKeyError::new_err(key.to_string()))?
                    .extract()
            };
            let config = match dict.get_item("config")? {
                Some(config) => {
                    // Round-trip through the interpreter's own json module;
                    // the script dict may hold arbitrary nesting.
                    let dumped: String = py
                        .import("json")?
                        .getattr("dumps")?
                        .call1((config,))?
                        .extract()?;
                    serde_json::from_str(&dumped)
                        .map_err(|err| PyValueError::new_err(err.to_string()))?
                }
                None => serde_json::Value::Null,
            };
            Ok(PluginInfo {
                name: field("name")?,
                version: field("version")?,
                mode: field("mode")?,
                plugin_type: field("type")?,
                interface: field("interface")?,
                config,
            })
        })();
        info.map_err(|err| RuntimeError::Marshal(format_exception(py, &err)))
    }
}

#[allow(unsafe_code)]
fn interpreter_initialized() -> bool {
    unsafe { pyo3::ffi::Py_IsInitialized() != 0 }
}

/// Pre-init identity setup: decode the identifier to the interpreter's wide
/// encoding, hand it over, release the decoded buffer (the interpreter
/// keeps its own copy).
#[allow(unsafe_code, deprecated)]
fn set_program_name(name: &CStr) {
    unsafe {
        let wide = pyo3::ffi::Py_DecodeLocale(name.as_ptr(), std::ptr::null_mut());
        if wide.is_null() {
            return;
        }
        pyo3::ffi::Py_SetProgramName(wide);
        pyo3::ffi::PyMem_RawFree(wide.cast());
    }
}

/// Renders a drained interpreter error: exception text plus traceback.
fn format_exception(py: Python<'_>, err: &PyErr) -> String {
    let mut text = err.to_string();
    if let Some(traceback) = err.traceback(py) {
        if let Ok(rendered) = traceback.format() {
            text.push('\n');
            text.push_str(&rendered);
        }
    }
    text
}

/// Helper module the shim imports to forward filtered batches downstream.
#[pymodule]
fn filter_ingest(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(filter_ingest_callback, m)?)?;
    Ok(())
}

/// Invokes the host's output stream with a batch produced by the plugin.
///
/// `stream` and `handle` are the two capsules handed to `plugin_init`;
/// `readings` is a list of reading mappings in the marshalled layout.
#[pyfunction]
fn filter_ingest_callback(
    stream: &Bound<'_, PyCapsule>,
    handle: &Bound<'_, PyCapsule>,
    readings: &Bound<'_, PyList>,
) -> PyResult<()> {
    let stream: OutputStream = capsule_value(stream, OUTPUT_STREAM_CAPSULE)?;
    let handle: OutputHandle = capsule_value(handle, OUTPUT_HANDLE_CAPSULE)?;
    let batch = readings_from_script(readings)?;
    stream(handle, batch);
    Ok(())
}

#[allow(unsafe_code)]
fn capsule_value<T: Copy>(capsule: &Bound<'_, PyCapsule>, expected: &CStr) -> PyResult<T> {
    if capsule.name()? != Some(expected) {
        return Err(PyTypeError::new_err(format!(
            "expected a {} capsule",
            expected.to_string_lossy()
        )));
    }
    // The payload was stored by wrap_output_handle/wrap_output_stream with
    // this exact type; the name check above guards the cast.
    let value = unsafe { *capsule.pointer().cast::<T>() };
    Ok(value)
}

/// Reverse marshalling: script reading list back to a native batch.
fn readings_from_script(readings: &Bound<'_, PyList>) -> PyResult<ReadingSet> {
    let mut batch = Vec::with_capacity(readings.len());
    for item in readings.iter() {
        let record = item.downcast::<PyDict>()?;
        let asset: String = record
            .get_item("asset")?
            .ok_or_else(|| PyKeyError::new_err("asset"))?
            .extract()?;
        let timestamp: String = record
            .get_item("timestamp")?
            .ok_or_else(|| PyKeyError::new_err("timestamp"))?
            .extract()?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|err| PyValueError::new_err(format!("bad timestamp '{timestamp}': {err}")))?
            .with_timezone(&Utc);
        let mut reading = Reading::new(asset, timestamp);
        if let Some(values) = record.get_item("readings")? {
            let values = values.downcast_into::<PyDict>()?;
            for (name, value) in values.iter() {
                let name: String = name.extract()?;
                reading.values.insert(name, datapoint_from_py(&value)?);
            }
        }
        batch.push(reading);
    }
    Ok(ReadingSet::from(batch))
}

fn datapoint_from_py(value: &Bound<'_, PyAny>) -> PyResult<DatapointValue> {
    // bool first: Python bools extract as integers too.
    if let Ok(flag) = value.downcast::<PyBool>() {
        return Ok(DatapointValue::Bool(flag.is_true()));
    }
    if let Ok(int) = value.extract::<i64>() {
        return Ok(DatapointValue::Integer(int));
    }
    if let Ok(float) = value.extract::<f64>() {
        return Ok(DatapointValue::Float(float));
    }
    if let Ok(array) = value.extract::<Vec<f64>>() {
        return Ok(DatapointValue::FloatArray(array));
    }
    if let Ok(text) = value.extract::<String>() {
        return Ok(DatapointValue::Text(text));
    }
    Err(PyTypeError::new_err(format!(
        "unsupported datapoint value: {value}"
    )))
}
