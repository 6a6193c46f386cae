//! Committing verbs: each successful invocation yields a new image layer.

use std::path::Path;
use std::sync::Arc;

use mlua::{Lua, Value};
use mlua::prelude::*;
use tracing::debug;

use luabox_core::Fingerprint;

use crate::archive;
use crate::executor::CommitHook;
use crate::lua::values;
use crate::state::Engine;

/// `from(ref)`: select the base image, pulling it when absent locally.
///
/// Pulls are single-flight per reference across every builder sharing the
/// pull coordinator. Enables tty and stdout/stderr attachment for the runs
/// that follow.
pub(crate) fn from(
    _lua: &Lua,
    engine: &Arc<Engine>,
    _fingerprint: &Fingerprint,
    args: &[Value],
) -> LuaResult<Value> {
    let reference = values::expect_string("from", &args[0])?;

    {
        let mut state = engine.state.lock().unwrap();
        state.config.tty = true;
        state.config.attach_stdout = true;
        state.config.attach_stderr = true;
    }

    let present = engine
        .executor
        .lock()
        .unwrap()
        .image_present(&reference)
        .map_err(LuaError::external)?;
    if !present {
        engine
            .pulls
            .coordinate(&reference, || {
                engine.executor.lock().unwrap().pull(&reference)
            })
            .map_err(LuaError::external)?;
    }

    let config = engine.config();
    let id = engine
        .executor
        .lock()
        .unwrap()
        .use_image(&reference, &config)
        .map_err(LuaError::external)?;
    debug!(image = %id, reference = %reference, "base image selected");

    Ok(Value::Nil)
}

/// `run(cmd...)`: execute a shell command in a container derived from the
/// current image and commit the result.
///
/// Temporarily overrides entrypoint/cmd (and working_dir when an `inside`
/// block is active); all three are restored whether or not the command
/// succeeds.
pub(crate) fn run(
    lua: &Lua,
    engine: &Arc<Engine>,
    fingerprint: &Fingerprint,
    args: &[Value],
) -> LuaResult<Value> {
    {
        let executor = engine.executor.lock().unwrap();
        if executor.image_id().is_none() {
            return Ok(Value::String(
                lua.create_string("`from` must precede any `run` statements")?,
            ));
        }
    }

    let command = values::render_args(args);

    let (config, saved) = {
        let mut state = engine.state.lock().unwrap();
        let saved = (
            state.config.entrypoint.clone(),
            state.config.cmd.clone(),
            state.config.working_dir.clone(),
        );
        state.config.entrypoint = vec!["/bin/sh".to_string(), "-c".to_string()];
        state.config.cmd = command;
        if !state.config.inside_dir.is_empty() {
            state.config.working_dir = state.config.inside_dir.clone();
        }
        (state.config.clone(), saved)
    };

    let result = engine
        .executor
        .lock()
        .unwrap()
        .commit(&config, fingerprint, Some(CommitHook::Run));

    let restored = {
        let mut state = engine.state.lock().unwrap();
        state.config.entrypoint = saved.0;
        state.config.cmd = saved.1;
        state.config.working_dir = saved.2;
        state.config.clone()
    };

    result.map_err(LuaError::external)?;
    // The override was transient; the committed layer counts as clean
    // against the restored configuration.
    engine.executor.lock().unwrap().sync_config(&restored);
    Ok(Value::Nil)
}

/// `copy(source, target)`: package a local file into a tar stream and commit
/// a layer with it copied into the image.
///
/// `source` resolves relative to the process working directory. Directories
/// are not supported yet; they print an advisory and commit an empty copy.
pub(crate) fn copy(
    _lua: &Lua,
    engine: &Arc<Engine>,
    fingerprint: &Fingerprint,
    args: &[Value],
) -> LuaResult<Value> {
    let source = values::expect_string("copy", &args[0])?;
    let target = values::expect_string("copy", &args[1])?;

    println!("+++ Copying: {:?} to {:?}", source, target);

    let payload = archive::package(Path::new(&source), &target).map_err(LuaError::external)?;

    let (config, dest) = {
        let state = engine.state.lock().unwrap();
        let dir = state.config.effective_dir();
        let dest = if dir.is_empty() { "/".to_string() } else { dir.to_string() };
        (state.config.clone(), dest)
    };

    engine
        .executor
        .lock()
        .unwrap()
        .commit(
            &config,
            fingerprint,
            Some(CommitHook::CopyInto { dest, archive: payload }),
        )
        .map_err(LuaError::external)?;

    Ok(Value::Nil)
}

/// `env(map)`: append `KEY=VALUE` pairs to the environment and commit a
/// configuration-only layer.
///
/// Lua tables carry no insertion order; keys are enumerated sorted.
pub(crate) fn env(
    _lua: &Lua,
    engine: &Arc<Engine>,
    fingerprint: &Fingerprint,
    args: &[Value],
) -> LuaResult<Value> {
    let table = values::expect_table("env", &args[0])?;
    let pairs = values::table_pairs(&table)?;

    let config = {
        let mut state = engine.state.lock().unwrap();
        for (key, value) in &pairs {
            state.config.push_env(key, value);
        }
        state.config.clone()
    };

    engine
        .executor
        .lock()
        .unwrap()
        .commit(&config, fingerprint, None)
        .map_err(LuaError::external)?;

    Ok(Value::Nil)
}

/// `debug()`: dump the current container configuration and image id.
///
/// Runs even on a cache hit; the step wrapper special-cases it.
pub(crate) fn debug(
    _lua: &Lua,
    engine: &Arc<Engine>,
    _fingerprint: &Fingerprint,
    _args: &[Value],
) -> LuaResult<Value> {
    let config = engine.config();
    let image = engine.executor.lock().unwrap().image_id();

    let json = serde_json::to_string_pretty(&config).map_err(LuaError::external)?;
    println!("{}", json);
    println!("image: {}", image.unwrap_or_default());

    Ok(Value::Nil)
}
