//! The builder core.
//!
//! A [`Builder`] owns one embedded Lua evaluator, one container
//! configuration, and one executor handle. Scripts are evaluated with every
//! verb registered as a global; committing verbs drive the executor's commit
//! protocol, and the post-evaluation finalize step captures configuration
//! mutations the script made without a committing verb.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use mlua::prelude::*;
use mlua::{Function, Lua, Value};

use luabox_core::{BuildContext, ContainerConfig, Error, PullCoordinator, Result, Signal};

use crate::executor::{self, Executor};
use crate::lua::{runtime, values};
use crate::state::Engine;

/// Construction-time options for a [`Builder`].
#[derive(Clone)]
pub struct BuildConfig {
    /// Script file evaluated by [`Builder::run`]; also names script chunks
    /// in error messages.
    pub file_name: String,
    /// Whether the build is attached to a terminal. Off disables in-place
    /// progress rendering during pulls.
    pub tty: bool,
    /// Verbs to leave unregistered, e.g. `run` when embedding untrusted
    /// scripts.
    pub omit_verbs: HashSet<String>,
    /// Cancellation context, propagated to the executor.
    pub context: BuildContext,
    /// Pull coordinator shared with other builders; defaults to the
    /// process-wide instance.
    pub pulls: Arc<PullCoordinator>,
    /// Executor backend name.
    pub backend: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            file_name: String::new(),
            tty: true,
            omit_verbs: HashSet::new(),
            context: BuildContext::new(),
            pulls: PullCoordinator::global(),
            backend: "docker".to_string(),
        }
    }
}

/// The outcome of one evaluation.
///
/// `value` is the script's explicit result when it produced one, the final
/// image id otherwise. `error` is set on script or executor failure.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub file_name: String,
    pub value: Option<Value>,
    pub error: Option<Arc<Error>>,
}

impl BuildResult {
    /// The canonical string rendering of `value`, when present.
    pub fn value_str(&self) -> Option<String> {
        self.value.as_ref().map(values::render)
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// The image build engine.
pub struct Builder {
    lua: Lua,
    engine: Arc<Engine>,
    file_name: String,
    runner: Arc<Signal>,
    result: Mutex<BuildResult>,
}

impl Builder {
    /// Construct a builder with the backend named by `config.backend`.
    pub fn new(config: BuildConfig) -> Result<Self> {
        let executor =
            executor::new_executor(&config.backend, config.context.clone(), config.tty)?;
        Self::with_executor(config, executor)
    }

    /// Construct a builder around a caller-supplied executor.
    ///
    /// This is the embedding and testing entry point; see
    /// [`crate::testutil::RecordingExecutor`].
    pub fn with_executor(config: BuildConfig, executor: Box<dyn Executor>) -> Result<Self> {
        let engine = Arc::new(Engine::new(
            executor,
            Arc::clone(&config.pulls),
            config.context.clone(),
        ));
        let lua = runtime::create_runtime(&engine, &config.omit_verbs)?;
        Ok(Self {
            lua,
            engine,
            file_name: config.file_name,
            runner: Arc::new(Signal::new()),
            result: Mutex::new(BuildResult::default()),
        })
    }

    /// Evaluate the configured script file.
    ///
    /// Closes the completion signal on every exit path, exactly once;
    /// [`Builder::wait`] unblocks when it does.
    pub fn run(&self) -> BuildResult {
        struct CloseOnExit(Arc<Signal>);
        impl Drop for CloseOnExit {
            fn drop(&mut self) {
                self.0.close();
            }
        }
        let _guard = CloseOnExit(Arc::clone(&self.runner));

        let script = match std::fs::read_to_string(&self.file_name) {
            Ok(script) => script,
            Err(e) => {
                return self.store(BuildResult {
                    file_name: self.file_name.clone(),
                    value: None,
                    error: Some(Arc::new(e.into())),
                })
            }
        };
        self.run_script(&script)
    }

    /// Evaluate an in-memory script. Does not touch the completion signal.
    pub fn run_script(&self, script: &str) -> BuildResult {
        self.engine.state.lock().unwrap().last_value = None;
        let evaluated = self
            .lua
            .load(script)
            .set_name(self.chunk_name())
            .eval::<Value>();
        self.finish(evaluated)
    }

    /// Evaluate a previously compiled chunk, for REPL-style use.
    ///
    /// The evaluator's stack retention hint is passed back unchanged.
    pub fn run_code(&self, chunk: &Function, stack_keep: usize) -> (BuildResult, usize) {
        self.engine.state.lock().unwrap().last_value = None;
        let evaluated = chunk.call::<Value>(());
        (self.finish(evaluated), stack_keep)
    }

    /// The latest recorded result. Undefined before any run.
    pub fn result(&self) -> BuildResult {
        self.result.lock().unwrap().clone()
    }

    /// Block until [`Builder::run`] has closed the completion signal, then
    /// return the recorded result.
    pub fn wait(&self) -> BuildResult {
        self.runner.wait();
        self.result()
    }

    /// The completion signal closed by [`Builder::run`].
    pub fn completion(&self) -> Arc<Signal> {
        Arc::clone(&self.runner)
    }

    /// Tag the current image with `name`.
    pub fn tag(&self, name: &str) -> Result<()> {
        self.engine.executor.lock().unwrap().tag(name)
    }

    /// The latest committed image id; empty before a base image is selected.
    pub fn image_id(&self) -> String {
        self.engine
            .executor
            .lock()
            .unwrap()
            .image_id()
            .unwrap_or_default()
    }

    /// Snapshot of the current container configuration.
    pub fn container_config(&self) -> ContainerConfig {
        self.engine.config()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The embedded evaluator, e.g. for compiling chunks to feed
    /// [`Builder::run_code`].
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Swap the cancellation context, propagating it to the executor.
    pub fn set_context(&self, context: BuildContext) {
        self.engine.state.lock().unwrap().context = context.clone();
        self.engine.executor.lock().unwrap().set_context(context);
    }

    /// Finalize the evaluator and release its resources.
    ///
    /// Dropping the builder without closing leaks the evaluator: the verb
    /// closures and the state they capture hold each other alive.
    pub fn close(self) -> Result<()> {
        {
            let mut state = self.engine.state.lock().unwrap();
            state.after = None;
            state.last_value = None;
        }
        // Shutdown collection is best-effort.
        let _ = self.lua.gc_collect();
        Ok(())
    }

    fn chunk_name(&self) -> String {
        if self.file_name.is_empty() {
            "script".to_string()
        } else {
            self.file_name.clone()
        }
    }

    /// Shared tail of every evaluation: pick the script's explicit value if
    /// it produced one (chunk return value, else the last value recorded by
    /// a wrapped verb), otherwise finalize the configuration into an image
    /// and use its id.
    fn finish(&self, evaluated: LuaResult<Value>) -> BuildResult {
        let mut result = BuildResult {
            file_name: self.file_name.clone(),
            value: None,
            error: None,
        };

        match evaluated {
            Err(e) => result.error = Some(Arc::new(from_lua_error(e))),
            Ok(value) => {
                let explicit = if matches!(value, Value::Nil) {
                    self.engine.state.lock().unwrap().last_value.take()
                } else {
                    Some(value)
                };
                match explicit {
                    Some(value) => result.value = Some(value),
                    None => match self.finalize() {
                        Ok(image) => match self.lua.create_string(&image) {
                            Ok(s) => result.value = Some(Value::String(s)),
                            Err(e) => result.error = Some(Arc::new(from_lua_error(e))),
                        },
                        Err(e) => result.error = Some(Arc::new(e)),
                    },
                }
            }
        }

        self.store(result)
    }

    /// Finalize the configuration into an image (covering scripts that
    /// mutated config without a committing verb) and invoke the `after`
    /// hook.
    fn finalize(&self) -> Result<String> {
        let config = self.engine.config();
        self.engine.executor.lock().unwrap().make_image(&config)?;

        let after = self.engine.state.lock().unwrap().after.clone();
        if let Some(hook) = after {
            hook.call::<Value>(()).map_err(from_lua_error)?;
        }

        Ok(self.image_id())
    }

    fn store(&self, result: BuildResult) -> BuildResult {
        *self.result.lock().unwrap() = result.clone();
        result
    }
}

/// Map an evaluator error to the engine's error vocabulary.
///
/// Errors our own verbs raised (cancellation, executor failures) travel
/// through Lua as external errors; unwrap them so they surface unchanged
/// instead of being flattened into a script error.
fn from_lua_error(err: LuaError) -> Error {
    fn unwrap_external(err: &LuaError) -> Option<Error> {
        match err {
            LuaError::ExternalError(inner) => inner.downcast_ref::<Error>().and_then(reconstruct),
            LuaError::CallbackError { cause, .. } => unwrap_external(cause),
            LuaError::WithContext { cause, .. } => unwrap_external(cause),
            _ => None,
        }
    }

    fn reconstruct(err: &Error) -> Option<Error> {
        match err {
            Error::Cancelled => Some(Error::Cancelled),
            Error::DeadlineExceeded => Some(Error::DeadlineExceeded),
            Error::Executor(message) => Some(Error::Executor(message.clone())),
            Error::UnknownBackend(name) => Some(Error::UnknownBackend(name.clone())),
            _ => None,
        }
    }

    unwrap_external(&err).unwrap_or_else(|| Error::Script(err.to_string()))
}
