//! Infrastructure layer
//!
//! Handles all I/O operations: external processes, the process environment,
//! device probing and the filesystem.

pub mod device;
pub mod dirs;
pub mod environment;
pub mod filesystem;
pub mod mass_storage;
pub mod process;
pub mod run_log;
pub mod toolchain;
