//! Helper verbs: configuration setters and scoped blocks.
//!
//! None of these commit a layer on their own; their mutations are captured
//! by the next committing verb.

use std::sync::Arc;

use mlua::{Lua, Value};
use mlua::prelude::*;

use crate::lua::values;
use crate::state::Engine;

/// `cmd(args...)`: set the command for the next layer. With no arguments the
/// command is cleared.
pub(crate) fn cmd(_lua: &Lua, engine: &Arc<Engine>, args: &[Value]) -> LuaResult<Value> {
    engine.state.lock().unwrap().config.cmd = values::render_args(args);
    Ok(Value::Nil)
}

/// `entrypoint(args...)`: set the entrypoint for the next layer. With no
/// arguments the entrypoint is cleared.
pub(crate) fn entrypoint(_lua: &Lua, engine: &Arc<Engine>, args: &[Value]) -> LuaResult<Value> {
    engine.state.lock().unwrap().config.entrypoint = values::render_args(args);
    Ok(Value::Nil)
}

/// `with_user(name) { ... }`: run the block with `user` set, then clear it.
///
/// The user is cleared whether the block succeeds or raises; the block's
/// value is returned.
pub(crate) fn with_user(_lua: &Lua, engine: &Arc<Engine>, args: &[Value]) -> LuaResult<Value> {
    let name = values::expect_string("with_user", &args[0])?;
    let block = values::expect_block("with_user", &args[1])?;

    engine.state.lock().unwrap().config.user = name.clone();
    let result = block.call::<Value>(name);
    engine.state.lock().unwrap().config.user = String::new();

    result
}

/// `inside(dir) { ... }`: run the block with the working directory overridden,
/// then clear the override.
pub(crate) fn inside(_lua: &Lua, engine: &Arc<Engine>, args: &[Value]) -> LuaResult<Value> {
    let dir = values::expect_string("inside", &args[0])?;
    let block = values::expect_block("inside", &args[1])?;

    engine.state.lock().unwrap().config.inside_dir = dir.clone();
    let result = block.call::<Value>(dir);
    engine.state.lock().unwrap().config.inside_dir = String::new();

    result
}

/// `after { ... }`: register a hook the builder invokes after the final
/// image is made. At most one hook is kept; later registrations replace it.
pub(crate) fn after(_lua: &Lua, engine: &Arc<Engine>, args: &[Value]) -> LuaResult<Value> {
    let block = values::expect_block("after", &args[0])?;
    engine.state.lock().unwrap().after = Some(block);
    Ok(Value::Nil)
}
