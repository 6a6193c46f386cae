//! Conversions between Lua values and the canonical forms used by the engine.
//!
//! Every verb argument has a canonical string rendering; the step wrapper
//! feeds these renderings into the cache fingerprint, so they must be
//! deterministic. Tables render with sorted keys for that reason.

use mlua::{Function, Table, Value};
use mlua::prelude::*;

/// Render a Lua value in its canonical string form.
pub fn render(value: &Value) -> String {
    match value {
        Value::Nil => String::new(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => String::from_utf8_lossy(&s.as_bytes()).into_owned(),
        Value::Table(t) => render_table(t),
        other => format!("<{}>", other.type_name()),
    }
}

/// Render each argument of a verb invocation.
pub fn render_args(args: &[Value]) -> Vec<String> {
    args.iter().map(render).collect()
}

fn render_table(table: &Table) -> String {
    let len = table.raw_len();
    if len > 0 {
        // Array part: render positionally.
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            let item: Value = table.raw_get(i).unwrap_or(Value::Nil);
            items.push(render(&item));
        }
        return format!("[{}]", items.join(", "));
    }

    // Map: sorted keys keep the rendering deterministic.
    let mut entries = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        if let Ok((key, value)) = pair {
            entries.push(format!("{}={}", render(&key), render(&value)));
        }
    }
    entries.sort();
    format!("{{{}}}", entries.join(", "))
}

/// Coerce a verb argument to a string, rejecting values with no sensible
/// string form.
pub(crate) fn expect_string(verb: &str, value: &Value) -> LuaResult<String> {
    match value {
        Value::String(_) | Value::Integer(_) | Value::Number(_) => Ok(render(value)),
        other => Err(LuaError::RuntimeError(format!(
            "{}: expected a string argument, got {}",
            verb,
            other.type_name()
        ))),
    }
}

/// Extract the trailing block of a scoped verb.
pub(crate) fn expect_block(verb: &str, value: &Value) -> LuaResult<Function> {
    match value {
        Value::Function(f) => Ok(f.clone()),
        other => Err(LuaError::RuntimeError(format!(
            "{}: expected a block (function), got {}",
            verb,
            other.type_name()
        ))),
    }
}

/// Extract a table argument.
pub(crate) fn expect_table(verb: &str, value: &Value) -> LuaResult<Table> {
    match value {
        Value::Table(t) => Ok(t.clone()),
        other => Err(LuaError::RuntimeError(format!(
            "{}: expected a table argument, got {}",
            verb,
            other.type_name()
        ))),
    }
}

/// Enumerate a table's entries as rendered key/value pairs in sorted key
/// order.
///
/// Lua tables carry no insertion order, so sorting is the deterministic
/// enumeration the engine documents; callers that care about a specific
/// runtime ordering pass keys that sort accordingly.
pub fn table_pairs(table: &Table) -> LuaResult<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for pair in table.clone().pairs::<String, Value>() {
        let (key, value) = pair?;
        entries.push((key, render(&value)));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}
