//! scriptcache — compiled-artifact caching for embedded scripts.
//!
//! Scripts carry their own compiled form in a trailing comment, guarded by
//! digests of both the source and the compiled block. Loading validates the
//! trailer and recompiles (and rewrites) only what changed. Compiled units
//! are scripts, functions, or macros with call signatures that adapt
//! variable-arity arguments and coerce return values.

pub mod cache;
pub mod cli;
pub mod core;
pub mod engine;
