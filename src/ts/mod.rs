//! # MPEG Transport Stream primitives
//!
//! Low-level building blocks shared by every module in the pipeline:
//!
//! - **Packet accessors**: in-place readers/writers for the 188-byte TS
//!   packet header fields the pipeline touches (PID, continuity counter,
//!   payload flags).
//! - **PSI handling**: section assembly from packets and packetization of
//!   rewritten sections, with checksum-based change detection.
//! - **Table field access**: byte-level readers/patchers for the PAT, PMT,
//!   SDT and EIT fields the channel rewriter needs.
//!
//! ## Example
//!
//! ```rust
//! use tspipe::ts::{packet, psi::PsiPacket};
//!
//! let mut pat = PsiPacket::new(0);
//! # let ts = {
//! #     let mut p = PsiPacket::new(0);
//! #     p.set_section(&[0x00, 0xB0, 0x0D, 0, 1, 0xC1, 0, 0, 0, 1, 0xE1, 0, 0, 0, 0, 0]);
//! #     let mut v = Vec::new();
//! #     p.demux(|t| v = t.to_vec());
//! #     v
//! # };
//! if packet::get_pid(&ts) == 0 && pat.mux(&ts) {
//!     let section = pat.pop_section().unwrap();
//!     assert_eq!(section[0], 0x00); // PAT table_id
//! }
//! ```

/// In-place TS packet header accessors
pub mod packet;

/// PSI section assembly and packetization
pub mod psi;

/// Byte-level PSI table field access
pub mod tables;

/// Core TS types and constants
pub mod types;

// Re-export commonly used types and constants
pub use psi::PsiPacket;
pub use types::{TsType, NULL_PID, TS_MAX_PIDS, TS_PACKET_SIZE};
