//! icesugar-flash - build and flash iCESugar-nano FPGA designs
//!
//! Drives yosys, nextpnr-ice40 and icepack to turn Verilog into a bitstream,
//! then programs the board with icesprog, falling back to the iCELink
//! mass-storage drive. Every external step is retried, bounded by a timeout
//! and cancellable.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line parsing, logging setup and output formatting
//! - [`core`] - Retry engine, cancellation, build pipeline, delivery and the run driver
//! - [`infra`] - Processes, toolchain lookup, environment, devices and filesystem
//! - [`config`] - Defaults and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
