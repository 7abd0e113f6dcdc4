//! Core model — types, signatures, scopes, frozen captures, executables.

pub mod config;
pub mod error;
pub mod executable;
pub mod frozen;
pub mod header;
pub mod scope;
pub mod signature;
pub mod types;
