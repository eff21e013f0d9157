//! # Utility Functions and Types
//!
//! This module provides common utility functions and types used throughout
//! the tspipe library.
//!
//! ## CRC Calculation
//!
//! The crc module provides the MPEG-2 CRC32 used by PSI table validation
//! and rewriting:
//!
//! ```rust
//! use tspipe::utils::Crc32Mpeg2;
//!
//! # fn main() {
//! let crc = Crc32Mpeg2::new();
//! // the catalog check value for CRC-32/MPEG-2
//! assert_eq!(crc.calculate(b"123456789"), 0x0376E6E7);
//! # }
//! ```

/// CRC calculation implementations
pub mod crc;

// Re-export commonly used types
pub use crc::Crc32Mpeg2;
