//! Core business logic module
//!
//! Orchestration of builds and deliveries. External tools, the filesystem and
//! devices are reached through [`crate::infra`].
//!
//! # Submodules
//!
//! - [`cancel`] - Per-run cancellation token and signal listener
//! - [`retry`] - Retry with exponential backoff
//! - [`request`] - Build request and path derivation
//! - [`pipeline`] - Synthesis, place-and-route and packing
//! - [`flash`] - Bitstream delivery with mass-storage fallback
//! - [`driver`] - Sequencing of one run and environment restore
//! - [`global_config`] - Global configuration management
//! - [`doctor`] - Toolchain and device report

pub mod cancel;
pub mod doctor;
pub mod driver;
pub mod flash;
pub mod global_config;
pub mod pipeline;
pub mod request;
pub mod retry;
