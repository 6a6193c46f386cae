//! Runtime construction and the per-step dispatch wrapper.
//!
//! Verbs are registered as host callables on the Lua globals. Committing
//! verbs pass through [`dispatch`], which carries the cross-cutting step
//! logic: cancellation probe, argument rendering, fingerprinting, step
//! logging, the `BOX_DEBUG` config dump, and the cache probe. Helper verbs
//! (pure configuration setters and scoped blocks) dispatch directly.

use std::collections::HashSet;
use std::sync::Arc;

use mlua::{Lua, Value, Variadic};
use mlua::prelude::*;
use tracing::{debug, info};

use luabox_core::{Error, Fingerprint, Result};

use crate::lua::values;
use crate::state::Engine;
use crate::verbs::{self, VerbDef};

/// Environment variable enabling the per-step config dump.
const DEBUG_ENV: &str = "BOX_DEBUG";

/// Create a Lua runtime with every verb registered, minus the omit set.
pub(crate) fn create_runtime(engine: &Arc<Engine>, omit: &HashSet<String>) -> Result<Lua> {
    let lua = Lua::new();
    register_verbs(&lua, engine, omit).map_err(|e| Error::Script(e.to_string()))?;
    Ok(lua)
}

fn register_verbs(lua: &Lua, engine: &Arc<Engine>, omit: &HashSet<String>) -> LuaResult<()> {
    let globals = lua.globals();

    for (name, def) in verbs::committing() {
        if omit.contains(name) {
            debug!(verb = name, "omitted from registration");
            continue;
        }
        let engine = Arc::clone(engine);
        let func = lua.create_function(move |lua, args: Variadic<Value>| {
            dispatch(lua, &engine, name, def, &args)
        })?;
        globals.set(name, func)?;
    }

    for (name, def) in verbs::helpers() {
        if omit.contains(name) {
            debug!(verb = name, "omitted from registration");
            continue;
        }
        let engine = Arc::clone(engine);
        let func = lua.create_function(move |lua, args: Variadic<Value>| {
            def.arity.check(name, &args)?;
            (def.handler)(lua, &engine, &args)
        })?;
        globals.set(name, func)?;
    }

    Ok(())
}

/// The step wrapper shared by every committing verb.
fn dispatch(
    lua: &Lua,
    engine: &Arc<Engine>,
    name: &'static str,
    def: VerbDef,
    args: &[Value],
) -> LuaResult<Value> {
    {
        let state = engine.state.lock().unwrap();
        state.context.check().map_err(LuaError::external)?;
    }

    def.arity.check(name, args)?;

    let rendered = values::render_args(args);
    let fingerprint = Fingerprint::compute(name, &rendered);
    info!(verb = name, args = %rendered.join(", "), "build step");

    let config = engine.config();
    if debug_enabled() {
        if let Ok(json) = serde_json::to_string_pretty(&config) {
            println!("{}", json);
        }
    }

    let cached = engine
        .executor
        .lock()
        .unwrap()
        .check_cache(&fingerprint, &config)
        .map_err(LuaError::external)?;
    if skip_cached(cached, name) {
        debug!(verb = name, fingerprint = %fingerprint, "cache hit, skipping");
        return Ok(Value::Nil);
    }

    let value = (def.handler)(lua, engine, &fingerprint, args)?;

    // Lua discards statement-position results; keep the last one for the
    // build result.
    if !matches!(value, Value::Nil) {
        engine.state.lock().unwrap().last_value = Some(value.clone());
    }

    Ok(value)
}

fn debug_enabled() -> bool {
    std::env::var_os(DEBUG_ENV).map_or(false, |v| !v.is_empty())
}

/// A cache hit skips the handler, except for `debug`: stepping past it on
/// successive runs would make it useless.
fn skip_cached(cached: bool, verb: &str) -> bool {
    cached && verb != "debug"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_skips_ordinary_verbs() {
        assert!(skip_cached(true, "run"));
        assert!(skip_cached(true, "env"));
    }

    #[test]
    fn cache_hit_never_skips_debug() {
        assert!(!skip_cached(true, "debug"));
    }

    #[test]
    fn cache_miss_never_skips() {
        assert!(!skip_cached(false, "run"));
        assert!(!skip_cached(false, "debug"));
    }
}
