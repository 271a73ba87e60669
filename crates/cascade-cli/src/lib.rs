//! Command implementations behind the `cascade` binary.
//!
//! Split out as a library so the command flows can be exercised against an
//! in-memory coordinator; `main.rs` owns only argument parsing and process
//! exit.

pub mod commands;
pub mod error;
