//! Filesystem primitives shared by local targets and backups.

pub mod replace;
pub mod tree_hash;

pub use replace::{copy_tree, remove_path, replace_path};
pub use tree_hash::{TreeSummary, hash_tree, summarize_tree};
