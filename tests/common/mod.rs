//! Common test utilities for pybridge integration tests.
//!
//! The centerpiece is [`StubRuntime`], a scriptable embedded runtime that
//! records everything observable about bridge behavior: bootstrap, lock
//! hold/release pairs, search-path and argv setup, imports, callable
//! lookups, marshalling and calls. Script functions are plain Rust closures
//! over a [`ModuleState`] that stands in for interpreter-side module
//! globals.

#![allow(dead_code)] // Utilities may not all be used by every test binary

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use pybridge::{
    OutputHandle, OutputStream, PluginInfo, Reading, ReadingSet, RuntimeError, ScriptRuntime,
    ScriptSession,
};

/// Everything observable the stub runtime did, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Bootstrap,
    LockAcquired,
    LockReleased,
    PathAppended(PathBuf),
    ArgvSet(Vec<String>),
    Imported(String),
    Lookup(String),
    /// One reading appended to a script list; carries the list length after
    /// the append.
    Marshalled(usize),
    Called(String),
}

/// Script-side value representation for the stub.
#[derive(Debug, Clone)]
pub enum StubValue {
    None,
    Callable(String),
    Text(String),
    OutHandle(OutputHandle),
    OutStream(OutputStream),
    Readings(Vec<Reading>),
    Handle(i64),
    Info(PluginInfo),
}

/// Opaque module token handed back from `import_module`.
#[derive(Debug, Clone)]
pub struct StubModule(pub String);

/// Stand-in for the script module's global state.
#[derive(Default)]
pub struct ModuleState {
    pub counter: i64,
    pub config: Option<String>,
    pub binding: Option<(OutputHandle, OutputStream)>,
    pub ingested: Vec<Vec<Reading>>,
    pub shutdown_calls: usize,
    pub notes: Vec<String>,
}

/// A simulated script function: mutates module state, returns a value or a
/// drained-error message.
pub type ScriptFn =
    Box<dyn FnMut(&mut ModuleState, &[StubValue]) -> Result<StubValue, String> + Send>;

#[derive(Default)]
struct StubState {
    functions: HashMap<String, ScriptFn>,
    module: ModuleState,
    import_failure: Option<String>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<StubState>,
    events: Mutex<Vec<Event>>,
    locked: AtomicBool,
}

impl Inner {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// A stub embedded runtime. Clone it before handing it to a bridge to keep
/// an observation handle.
#[derive(Clone, Default)]
pub struct StubRuntime {
    inner: Arc<Inner>,
}

impl StubRuntime {
    /// An empty runtime with no script functions at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime whose module implements the full filter-plugin contract:
    /// `plugin_init` stores config and output binding and returns a handle,
    /// `plugin_ingest` bumps a counter and records the batch,
    /// `plugin_reconfigure` swaps the config, `plugin_shutdown` counts.
    pub fn filter_plugin() -> Self {
        let stub = Self::new();
        stub.with_function("plugin_info", |_state, _args| {
            Ok(StubValue::Info(sample_info()))
        });
        stub.with_function("plugin_init", |state, args| {
            let config = match args.first() {
                Some(StubValue::Text(text)) => text.clone(),
                other => return Err(format!("plugin_init: config was {other:?}")),
            };
            let binding = match (args.get(1), args.get(2)) {
                (Some(StubValue::OutHandle(handle)), Some(StubValue::OutStream(stream))) => {
                    (*handle, *stream)
                }
                other => return Err(format!("plugin_init: bad output binding {other:?}")),
            };
            state.config = Some(config);
            state.binding = Some(binding);
            Ok(StubValue::Handle(1))
        });
        stub.with_function("plugin_ingest", |state, args| {
            let readings = match args.get(1) {
                Some(StubValue::Readings(readings)) => readings.clone(),
                other => return Err(format!("plugin_ingest: batch was {other:?}")),
            };
            // Deliberate read-modify-write window: only execution-lock
            // serialization keeps this increment from losing updates.
            let seen = state.counter;
            std::thread::yield_now();
            state.counter = seen + 1;
            state.ingested.push(readings);
            Ok(StubValue::None)
        });
        stub.with_function("plugin_reconfigure", |state, args| {
            match args.get(1) {
                Some(StubValue::Text(text)) => state.config = Some(text.clone()),
                other => return Err(format!("plugin_reconfigure: config was {other:?}")),
            }
            state.notes.push("reconfigured".into());
            Ok(StubValue::None)
        });
        stub.with_function("plugin_shutdown", |state, _args| {
            state.shutdown_calls += 1;
            Ok(StubValue::None)
        });
        stub
    }

    /// Registers (or replaces) a script function.
    pub fn with_function(
        &self,
        name: &str,
        func: impl FnMut(&mut ModuleState, &[StubValue]) -> Result<StubValue, String> + Send + 'static,
    ) -> &Self {
        self.inner
            .state
            .lock()
            .unwrap()
            .functions
            .insert(name.to_string(), Box::new(func));
        self
    }

    /// Removes a script function, simulating a module without it.
    pub fn without_function(&self, name: &str) -> &Self {
        self.inner.state.lock().unwrap().functions.remove(name);
        self
    }

    /// Makes the next `import_module` fail with `message` as the drained
    /// script error.
    pub fn with_import_failure(&self, message: &str) -> &Self {
        self.inner.state.lock().unwrap().import_failure = Some(message.to_string());
        self
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.inner.events.lock().unwrap().clear();
    }

    /// Reads the simulated module globals.
    pub fn module_state<T>(&self, read: impl FnOnce(&ModuleState) -> T) -> T {
        read(&self.inner.state.lock().unwrap().module)
    }

    /// Asserts the lock trace is a sequence of non-overlapping
    /// acquire/release pairs.
    pub fn assert_lock_pairs_balanced(&self) {
        let mut depth = 0_i64;
        for event in self.events() {
            match event {
                Event::LockAcquired => {
                    depth += 1;
                    assert_eq!(depth, 1, "execution lock acquired while already held");
                }
                Event::LockReleased => {
                    depth -= 1;
                    assert_eq!(depth, 0, "execution lock released while not held");
                }
                _ => {}
            }
        }
        assert_eq!(depth, 0, "execution lock left held at end of trace");
    }
}

impl ScriptRuntime for StubRuntime {
    type Module = StubModule;
    type Object = StubValue;
    type Session<'a>
        = StubSession<'a>
    where
        Self: 'a;

    fn bootstrap(&self) -> Result<(), RuntimeError> {
        self.inner.push(Event::Bootstrap);
        Ok(())
    }

    fn with_lock<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&mut Self::Session<'_>) -> T,
    {
        let guard = self.inner.state.lock().unwrap();
        assert!(
            !self.inner.locked.swap(true, Ordering::SeqCst),
            "execution lock entered twice"
        );
        self.inner.push(Event::LockAcquired);
        let mut session = StubSession {
            state: guard,
            events: &self.inner.events,
        };
        let out = f(&mut session);
        self.inner.push(Event::LockReleased);
        self.inner.locked.store(false, Ordering::SeqCst);
        drop(session);
        out
    }
}

/// Stub session; exists only while the state mutex (the stub's execution
/// lock) is held.
pub struct StubSession<'a> {
    state: MutexGuard<'a, StubState>,
    events: &'a Mutex<Vec<Event>>,
}

impl StubSession<'_> {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl ScriptSession for StubSession<'_> {
    type Module = StubModule;
    type Object = StubValue;

    fn append_search_path(&mut self, dir: &Path) -> Result<(), RuntimeError> {
        self.push(Event::PathAppended(dir.to_path_buf()));
        Ok(())
    }

    fn set_argv(&mut self, argv: &[&str]) -> Result<(), RuntimeError> {
        self.push(Event::ArgvSet(argv.iter().map(|s| s.to_string()).collect()));
        Ok(())
    }

    fn import_module(&mut self, name: &str) -> Result<Self::Module, RuntimeError> {
        if let Some(message) = self.state.import_failure.clone() {
            return Err(RuntimeError::ImportFailed {
                module: name.to_string(),
                detail: Some(message),
            });
        }
        self.push(Event::Imported(name.to_string()));
        Ok(StubModule(name.to_string()))
    }

    fn callable(
        &mut self,
        _module: &Self::Module,
        name: &str,
    ) -> Result<Self::Object, RuntimeError> {
        self.push(Event::Lookup(name.to_string()));
        if self.state.functions.contains_key(name) {
            Ok(StubValue::Callable(name.to_string()))
        } else {
            Err(RuntimeError::MissingCallable {
                name: name.to_string(),
                detail: None,
            })
        }
    }

    fn call(
        &mut self,
        callable: &Self::Object,
        args: &[&Self::Object],
    ) -> Result<Self::Object, RuntimeError> {
        let StubValue::Callable(name) = callable else {
            return Err(RuntimeError::CallFailed {
                detail: Some(format!("not a callable: {callable:?}")),
            });
        };
        self.push(Event::Called(name.clone()));
        let Some(mut func) = self.state.functions.remove(name) else {
            return Err(RuntimeError::MissingCallable {
                name: name.clone(),
                detail: None,
            });
        };
        let args: Vec<StubValue> = args.iter().map(|value| (*value).clone()).collect();
        let result = func(&mut self.state.module, &args);
        self.state.functions.insert(name.clone(), func);
        result
            .map_err(|message| RuntimeError::CallFailed {
                detail: Some(message),
            })
    }

    fn is_unset(&mut self, value: &Self::Object) -> bool {
        matches!(value, StubValue::None)
    }

    fn describe(&mut self, value: &Self::Object) -> String {
        format!("{value:?}")
    }

    fn text(&mut self, value: &str) -> Result<Self::Object, RuntimeError> {
        Ok(StubValue::Text(value.to_string()))
    }

    fn wrap_output_handle(&mut self, handle: OutputHandle) -> Result<Self::Object, RuntimeError> {
        Ok(StubValue::OutHandle(handle))
    }

    fn wrap_output_stream(&mut self, stream: OutputStream) -> Result<Self::Object, RuntimeError> {
        Ok(StubValue::OutStream(stream))
    }

    fn empty_reading_list(&mut self) -> Result<Self::Object, RuntimeError> {
        Ok(StubValue::Readings(Vec::new()))
    }

    fn append_reading(
        &mut self,
        list: &mut Self::Object,
        reading: &Reading,
    ) -> Result<(), RuntimeError> {
        let StubValue::Readings(readings) = list else {
            return Err(RuntimeError::Marshal(format!("not a reading list: {list:?}")));
        };
        readings.push(reading.clone());
        let len = readings.len();
        self.push(Event::Marshalled(len));
        Ok(())
    }

    fn plugin_info(&mut self, value: &Self::Object) -> Result<PluginInfo, RuntimeError> {
        match value {
            StubValue::Info(info) => Ok(info.clone()),
            other => Err(RuntimeError::Marshal(format!("not a plugin info: {other:?}"))),
        }
    }
}

/// The info block the default stub module reports.
pub fn sample_info() -> PluginInfo {
    PluginInfo {
        name: "scale".into(),
        version: "1.0.0".into(),
        mode: "none".into(),
        plugin_type: "filter".into(),
        interface: "1.0".into(),
        config: serde_json::json!({"enable": {"type": "boolean", "default": "false"}}),
    }
}

/// A no-op output stream for init calls that never forward.
pub fn discard_stream(_handle: OutputHandle, _batch: ReadingSet) {}

/// A 3-reading batch with distinct assets, in a known order.
pub fn three_reading_batch() -> ReadingSet {
    use chrono::TimeZone;
    use pybridge::DatapointValue;

    let base = chrono::Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 0).unwrap();
    ReadingSet::from(vec![
        Reading::new("first", base).with_value("value", DatapointValue::Integer(1)),
        Reading::new("second", base).with_value("value", DatapointValue::Integer(2)),
        Reading::new("third", base).with_value("value", DatapointValue::Integer(3)),
    ])
}
