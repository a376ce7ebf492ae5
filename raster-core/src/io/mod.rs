// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Composable byte- and bit-level I/O shared by every codec crate.
//!
//! A `Reader` consumes a `&[u8]` in memory ([`ByteReader`]). Bit readers sit on top of a byte
//! source and expose peek/consume/align primitives in either MSB-first order (JPEG,
//! [`BitReaderMsb`]) or LSB-first order (DEFLATE/GIF LZW, [`BitReaderLsb`]).

mod bit_lsb;
mod bit_msb;
mod byte_reader;
mod source;

pub use bit_lsb::BitReaderLsb;
pub use bit_msb::{BitReaderMsb, MarkerEvent};
pub use byte_reader::ByteReader;
pub use source::buffer_entire_source;

use crate::errors::Result;

/// Byte-oriented reads shared by every in-memory reader in this workspace.
pub trait ReadBytes {
    fn read_u8(&mut self) -> Result<u8>;

    fn read_u16_be(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    /// Reads exactly `buf.len()` bytes or returns a `Truncated` error. This is the
    /// `ReadExactly` semantics required by §4.1: short reads are never silently accepted.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Skips `count` bytes or returns a `Truncated` error.
    fn skip(&mut self, count: usize) -> Result<()>;

    /// Current byte offset from the start of the source.
    fn pos(&self) -> usize;

    /// Number of bytes remaining in the source, if known.
    fn remaining(&self) -> usize;
}
