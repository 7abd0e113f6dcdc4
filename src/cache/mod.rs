//! Compiled-artifact cache — digests, codec, trailer, stores, loader.

pub mod codec;
pub mod digest;
pub mod loader;
pub mod store;
pub mod trailer;
