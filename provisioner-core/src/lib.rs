//! # provisioner-core
//!
//! cli/env configuration, tracing setup and metrics for the provisioner binary
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
pub use anyhow;
pub use tokio;
pub use tracing;

pub mod config;
pub mod env;
pub mod metrics;
pub mod prelude;
