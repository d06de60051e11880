// SPDX-License-Identifier: MIT OR Apache-2.0
//! Application error type.

use coral_graph::GraphError;

/// Error type for the coral application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Engine error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RON encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] ron::Error),

    /// RON decoding error
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] ron::error::SpannedError),

    /// Settings written by a newer version
    #[error("Settings version {found} is newer than supported version {supported}")]
    SettingsVersion {
        /// Version in the file
        found: u32,
        /// Highest version this build reads
        supported: u32,
    },

    /// Malformed coralIO data
    #[error("coralIO line {line}: {message}")]
    CoralIo {
        /// One-based line number
        line: usize,
        /// What was wrong
        message: String,
    },
}

/// Result alias for application operations
pub type Result<T> = std::result::Result<T, AppError>;
