//! Shared utilities across isobox modules.

pub mod files;

pub use files::{copy_preserving_mode, scratch_dir, write_file_mode, write_file_with_dirs};
