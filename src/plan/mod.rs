//! Planning: turns an export tree into an ordered task list without touching
//! the filesystem.

pub mod attachments;
pub mod metadata;
pub mod naming;
pub mod rules;
pub mod scanner;

pub use scanner::{ScanContext, ScanOutcome, scan_directory, scan_directory_with};
