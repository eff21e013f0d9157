//! PSI section assembly and packetization.
//!
//! A [`PsiPacket`] sits between the raw TS packet stream and the table
//! handlers. Fed inbound packets with [`PsiPacket::mux`], it reassembles
//! complete sections (honoring pointer fields, continuation packets and
//! stuffing); loaded with an outbound section, [`PsiPacket::demux`] splits
//! it back into 188-byte packets with a running continuity counter.
//!
//! The `crc32` field latches the checksum of the last accepted section so a
//! handler can cheaply detect "same table again" versus "table changed".

use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};
use log::error;

use super::packet;
use super::types::{CRC32_SIZE, PSI_HEADER_SIZE, PSI_MAX_SIZE, TS_PACKET_SIZE};
use crate::utils::Crc32Mpeg2;

/// One PSI table endpoint: section assembler, section buffer and
/// packetizer state for a single PID.
pub struct PsiPacket {
    /// PID this table travels on
    pub pid: u16,
    /// Continuity counter used (and advanced) by [`PsiPacket::demux`]
    pub cc: u8,
    /// Latched CRC32 of the last accepted section; 0 until first arrival
    pub crc32: u32,
    /// Outbound section staging: handlers build or load the section to
    /// emit here, independent of any inbound assembly in flight
    pub buffer: [u8; PSI_MAX_SIZE],
    /// Number of valid bytes in `buffer`
    pub buffer_size: usize,

    assembly: [u8; PSI_MAX_SIZE],
    skip: usize,
    completed: VecDeque<Vec<u8>>,
}

impl PsiPacket {
    /// Creates an empty table endpoint for the given PID.
    pub fn new(pid: u16) -> Self {
        Self {
            pid,
            cc: 0,
            crc32: 0,
            buffer: [0; PSI_MAX_SIZE],
            buffer_size: 0,
            assembly: [0; PSI_MAX_SIZE],
            skip: 0,
            completed: VecDeque::new(),
        }
    }

    /// Feeds one inbound TS packet into section assembly.
    ///
    /// Returns `true` when at least one complete section became available;
    /// drain them with [`PsiPacket::pop_section`]. A payload may close the
    /// in-flight section and open the next one; both are handled. Oversized
    /// sections and truncated continuations reset assembly and are dropped.
    pub fn mux(&mut self, ts: &[u8]) -> bool {
        let before = self.completed.len();

        let offset = match packet::payload_offset(ts) {
            Some(offset) => offset,
            None => return false,
        };
        let payload = &ts[offset..TS_PACKET_SIZE];

        if packet::is_payload_unit_start(ts) {
            let pointer = payload[0] as usize;
            if 1 + pointer > payload.len() {
                self.skip = 0;
                return false;
            }
            let (tail, body) = payload[1..].split_at(pointer);

            if self.skip > 0 {
                self.feed(tail);
                if self.skip != 0 {
                    // previous section was cut short by this unit start
                    self.skip = 0;
                }
            }

            let mut rest = body;
            while !rest.is_empty() && rest[0] != 0xFF {
                let consumed = self.feed(rest);
                rest = &rest[consumed..];
            }
        } else {
            if self.skip == 0 {
                return false;
            }
            self.feed(payload);
        }

        self.completed.len() > before
    }

    /// Takes the oldest fully assembled section, if any.
    pub fn pop_section(&mut self) -> Option<Vec<u8>> {
        self.completed.pop_front()
    }

    fn feed(&mut self, data: &[u8]) -> usize {
        let mut consumed = 0;

        while self.skip < PSI_HEADER_SIZE {
            if consumed == data.len() {
                return consumed;
            }
            self.assembly[self.skip] = data[consumed];
            self.skip += 1;
            consumed += 1;
        }

        let total = PSI_HEADER_SIZE + section_length(&self.assembly);
        if total > PSI_MAX_SIZE {
            error!("[psi] section on pid {} exceeds {} bytes, dropped", self.pid, PSI_MAX_SIZE);
            self.skip = 0;
            return data.len();
        }

        let take = (total - self.skip).min(data.len() - consumed);
        self.assembly[self.skip..self.skip + take]
            .copy_from_slice(&data[consumed..consumed + take]);
        self.skip += take;
        consumed += take;

        if self.skip == total {
            self.completed.push_back(self.assembly[..total].to_vec());
            self.skip = 0;
        }
        consumed
    }

    /// Loads an externally produced section into the buffer.
    pub fn set_section(&mut self, section: &[u8]) {
        assert!(section.len() <= PSI_MAX_SIZE, "section exceeds PSI buffer");
        self.buffer[..section.len()].copy_from_slice(section);
        self.buffer_size = section.len();
    }

    /// Emits `buffer[..buffer_size]` as consecutive TS packets.
    ///
    /// The first packet carries the payload_unit_start flag and a zero
    /// pointer field; the continuity counter advances mod 16 per packet and
    /// retains its final value in `self.cc`. The last packet is padded with
    /// 0xFF stuffing.
    pub fn demux(&mut self, mut send: impl FnMut(&[u8])) {
        if self.buffer_size == 0 {
            return;
        }

        let mut sent = 0;
        let mut first = true;
        while sent < self.buffer_size {
            self.cc = (self.cc + 1) & 0x0F;

            let pusi = if first { 0x40 } else { 0x00 };
            let mut pkt = BytesMut::with_capacity(TS_PACKET_SIZE);
            pkt.put_u8(0x47);
            pkt.put_u8(pusi | ((self.pid >> 8) as u8 & 0x1F));
            pkt.put_u8((self.pid & 0xFF) as u8);
            pkt.put_u8(0x10 | self.cc);
            if first {
                pkt.put_u8(0); // pointer field
                first = false;
            }

            let take = (TS_PACKET_SIZE - pkt.len()).min(self.buffer_size - sent);
            pkt.put_slice(&self.buffer[sent..sent + take]);
            sent += take;

            while pkt.len() < TS_PACKET_SIZE {
                pkt.put_u8(0xFF);
            }
            send(&pkt);
        }
    }

    /// Back-patches `section_length` from `buffer_size` and recomputes the
    /// trailing CRC32.
    pub fn finalize(&mut self, crc: &Crc32Mpeg2) {
        let length = self.buffer_size - PSI_HEADER_SIZE;
        self.buffer[1] = (self.buffer[1] & 0xF0) | ((length >> 8) as u8 & 0x0F);
        self.buffer[2] = (length & 0xFF) as u8;

        let checksum = crc.calculate(&self.buffer[..self.buffer_size - CRC32_SIZE]);
        self.buffer[self.buffer_size - CRC32_SIZE..self.buffer_size]
            .copy_from_slice(&checksum.to_be_bytes());
    }
}

/// Reads the 12-bit `section_length` field of a section header.
pub fn section_length(section: &[u8]) -> usize {
    (((section[1] & 0x0F) as usize) << 8) | section[2] as usize
}

/// Reads the CRC32 trailer of a complete section.
pub fn section_crc32(section: &[u8]) -> u32 {
    let tail = &section[section.len() - CRC32_SIZE..];
    u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]])
}

/// Computes what the CRC32 trailer of a complete section should be.
pub fn calc_crc32(section: &[u8], crc: &Crc32Mpeg2) -> u32 {
    crc.calculate(&section[..section.len() - CRC32_SIZE])
}
