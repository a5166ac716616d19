//! Atomic server-side procedures.
//!
//! A composite operation (check-then-act) must never be split into several
//! round-trips. Each [`Procedure`] is written twice: as a Lua script that the
//! Redis backend runs with `EVALSHA`, and as a native function that the
//! in-memory backend runs while holding its state lock. Both renditions see
//! the same `KEYS`/`ARGV` and must return the same [`ScriptValue`].

use std::fmt;

use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryState;

/// Native rendition of a procedure, run by [`crate::InMemoryStore`].
pub type NativeProcedure =
    fn(&mut MemoryState, keys: &[String], args: &[String]) -> StoreResult<ScriptValue>;

/// Reply of a procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    Nil,
    Int(i64),
    Bytes(Vec<u8>),
    /// Any other reply shape, kept only for diagnostics.
    Other(String),
}

impl ScriptValue {
    /// Interpret the reply as an integer status, failing with a protocol error otherwise.
    pub fn into_int(self, procedure: &str) -> StoreResult<i64> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(StoreError::protocol(format!(
                "procedure '{procedure}' returned {other:?}, expected an integer"
            ))),
        }
    }
}

/// A named atomic procedure.
#[derive(Clone, Copy)]
pub struct Procedure {
    name: &'static str,
    lua: &'static str,
    native: NativeProcedure,
}

impl Procedure {
    pub const fn new(name: &'static str, lua: &'static str, native: NativeProcedure) -> Self {
        Self { name, lua, native }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lua(&self) -> &'static str {
        self.lua
    }

    pub(crate) fn native(&self) -> NativeProcedure {
        self.native
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure").field("name", &self.name).finish()
    }
}

/// Fetch `KEYS[index]` or fail the procedure.
pub fn key_at<'a>(procedure: &str, keys: &'a [String], index: usize) -> StoreResult<&'a str> {
    keys.get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::script(procedure, format!("missing KEYS[{}]", index + 1)))
}

/// Fetch `ARGV[index]` or fail the procedure.
pub fn arg_at<'a>(procedure: &str, args: &'a [String], index: usize) -> StoreResult<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::script(procedure, format!("missing ARGV[{}]", index + 1)))
}
