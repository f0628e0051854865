//! # armada-diff
//!
//! Unified multi-file diff handling for changeset specs.
//!
//! - [`parse`] splits diff text into per-file hunks and computes line stats
//! - [`apply`] reconstitutes new file content from an original plus hunks
//! - [`hash`] produces stable content hashes used to detect diff changes
//! - [`unified`] renders a unified diff between two texts

pub mod apply;
pub mod error;
pub mod hash;
pub mod parse;
pub mod unified;

pub use apply::{apply_file_diff, apply_patch, preview_files};
pub use error::DiffError;
pub use hash::diff_hash;
pub use parse::{parse_multi_file_diff, DiffStat, FileDiff, Hunk};
pub use unified::unified_diff;
