//! # Error Types
//!
//! This module provides the error types used throughout the tspipe library.
//! It defines a central error type `TsPipeError` that encapsulates all
//! failure conditions surfaced by the pipeline API.
//!
//! Recoverable stream conditions (a PSI section with a bad checksum, a
//! double leave on a PID) are logged and swallowed at the point of
//! occurrence rather than returned — the offending packet or section is
//! simply dropped. `TsPipeError` covers the conditions a caller can
//! actually act on: bad configuration, invalid input data, I/O.
//!
//! ## Example Usage
//!
//! ```rust
//! use tspipe::error::{Result, TsPipeError};
//!
//! fn validate_pid(pid: u16) -> Result<()> {
//!     if pid >= 8192 {
//!         return Err(TsPipeError::Config(format!("pid {} out of range", pid)));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Primary error type for the tspipe library
#[derive(Error, Debug)]
pub enum TsPipeError {
    /// I/O errors that occur during file or network operations
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors in module configuration (missing or out-of-range options)
    #[error("config error: {0}")]
    Config(String),

    /// Errors for invalid or malformed stream data
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// A specialized Result type for tspipe operations.
///
/// This type is used throughout the tspipe library to handle operations
/// that can produce a `TsPipeError`.
pub type Result<T> = std::result::Result<T, TsPipeError>;
