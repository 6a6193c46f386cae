//! The verb registry: the DSL surface of the build engine.
//!
//! Two jump tables feed registration. Committing verbs produce a new image
//! layer on success and pass through the step wrapper (cancellation, cache
//! probe, fingerprinting); helpers mutate configuration or introduce scoped
//! blocks and dispatch directly. Callers can suppress verbs by name through
//! `BuildConfig::omit_verbs` when embedding.

mod commit;
mod helpers;

use std::sync::Arc;

use mlua::{Lua, Value};
use mlua::prelude::*;

use luabox_core::Fingerprint;

use crate::state::Engine;

/// Argument count specification for a verb.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Arity {
    /// Leading required arguments.
    pub required: usize,
    /// Extra trailing arguments allowed.
    pub variadic: bool,
    /// A trailing block (Lua function) is required.
    pub block: bool,
}

impl Arity {
    pub const fn exactly(required: usize) -> Self {
        Self { required, variadic: false, block: false }
    }

    pub const fn at_least(required: usize) -> Self {
        Self { required, variadic: true, block: false }
    }

    /// Any number of arguments, including none.
    pub const fn any() -> Self {
        Self { required: 0, variadic: true, block: false }
    }

    pub const fn with_block(required: usize) -> Self {
        Self { required, variadic: false, block: true }
    }

    pub fn check(&self, verb: &str, args: &[Value]) -> LuaResult<()> {
        let expected = self.required + self.block as usize;
        let ok = if self.variadic {
            args.len() >= expected
        } else {
            args.len() == expected
        };
        if !ok {
            return Err(LuaError::RuntimeError(format!(
                "{}: expected {}{} argument(s){}, got {}",
                verb,
                if self.variadic { "at least " } else { "" },
                self.required,
                if self.block { " plus a block" } else { "" },
                args.len()
            )));
        }
        Ok(())
    }
}

pub(crate) type VerbHandler =
    fn(&Lua, &Arc<Engine>, &Fingerprint, &[Value]) -> LuaResult<Value>;
pub(crate) type HelperHandler = fn(&Lua, &Arc<Engine>, &[Value]) -> LuaResult<Value>;

/// A committing verb: routed through the step wrapper.
#[derive(Clone, Copy)]
pub(crate) struct VerbDef {
    pub arity: Arity,
    pub handler: VerbHandler,
}

/// A helper function: registered directly.
#[derive(Clone, Copy)]
pub(crate) struct HelperDef {
    pub arity: Arity,
    pub handler: HelperHandler,
}

/// Verbs whose execution yields a new layer.
pub(crate) fn committing() -> [(&'static str, VerbDef); 5] {
    [
        ("copy", VerbDef { arity: Arity::exactly(2), handler: commit::copy }),
        ("debug", VerbDef { arity: Arity::exactly(0), handler: commit::debug }),
        ("env", VerbDef { arity: Arity::exactly(1), handler: commit::env }),
        ("from", VerbDef { arity: Arity::exactly(1), handler: commit::from }),
        ("run", VerbDef { arity: Arity::at_least(1), handler: commit::run }),
    ]
}

/// Configuration setters and scoped blocks.
pub(crate) fn helpers() -> [(&'static str, HelperDef); 5] {
    [
        ("after", HelperDef { arity: Arity::with_block(0), handler: helpers::after }),
        ("cmd", HelperDef { arity: Arity::any(), handler: helpers::cmd }),
        ("entrypoint", HelperDef { arity: Arity::any(), handler: helpers::entrypoint }),
        ("inside", HelperDef { arity: Arity::with_block(1), handler: helpers::inside }),
        ("with_user", HelperDef { arity: Arity::with_block(1), handler: helpers::with_user }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_arity_bounds() {
        let arity = Arity::exactly(2);
        let lua = Lua::new();
        let s = Value::String(lua.create_string("x").unwrap());
        assert!(arity.check("copy", &[s.clone()]).is_err());
        assert!(arity.check("copy", &[s.clone(), s.clone()]).is_ok());
        assert!(arity.check("copy", &[s.clone(), s.clone(), s]).is_err());
    }

    #[test]
    fn variadic_arity_accepts_extras() {
        let arity = Arity::at_least(1);
        let lua = Lua::new();
        let s = Value::String(lua.create_string("x").unwrap());
        assert!(arity.check("run", &[]).is_err());
        assert!(arity.check("run", &[s.clone()]).is_ok());
        assert!(arity.check("run", &[s.clone(), s]).is_ok());
    }

    #[test]
    fn any_arity_accepts_zero_arguments() {
        let arity = Arity::any();
        let lua = Lua::new();
        let s = Value::String(lua.create_string("x").unwrap());
        assert!(arity.check("cmd", &[]).is_ok());
        assert!(arity.check("cmd", &[s.clone()]).is_ok());
        assert!(arity.check("cmd", &[s.clone(), s]).is_ok());
    }

    #[test]
    fn block_counts_toward_arity() {
        let arity = Arity::with_block(1);
        let lua = Lua::new();
        let s = Value::String(lua.create_string("x").unwrap());
        let f = Value::Function(lua.create_function(|_, ()| Ok(())).unwrap());
        assert!(arity.check("inside", &[s.clone()]).is_err());
        assert!(arity.check("inside", &[s, f]).is_ok());
    }
}
