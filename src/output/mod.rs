//! Output module for reporting job results
//!
//! This module handles:
//! - Markdown summaries of finished jobs
//! - Printing the failed-item ledger and stored-item statistics

mod markdown;
pub mod stats;

pub use markdown::{format_markdown_summary, write_markdown_summary};
pub use stats::{load_statistics, print_statistics, LedgerStatistics};

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while producing output
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type OutputResult<T> = Result<T, OutputError>;
