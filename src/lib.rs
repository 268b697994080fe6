//! Isobox library exports for testing.
//!
//! The binary in `main.rs` is a thin clap layer over these modules.

pub mod build;
pub mod cache;
pub mod common;
pub mod config;
pub mod environment;
pub mod error;
pub mod pkg;
pub mod privileged;
pub mod process;
pub mod timing;
