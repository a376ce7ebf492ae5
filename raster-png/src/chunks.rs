// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Length-prefixed, CRC32-checked chunk framing, shared by the decoder and encoder.

use raster_core::errors::{integrity_error, Result};
use raster_core::io::{ByteReader, ReadBytes};

pub const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub struct Chunk<'a> {
    pub kind: [u8; 4],
    pub data: &'a [u8],
}

/// Reads one length-prefixed chunk, verifying its trailing CRC32 over type + data.
pub fn read_chunk<'a>(r: &mut ByteReader<'a>) -> Result<Chunk<'a>> {
    let len = r.read_u32_be()? as usize;
    let kind_bytes = r.read_slice(4)?;
    let data = r.read_slice(len)?;
    let crc_read = r.read_u32_be()?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind_bytes);
    hasher.update(data);
    if hasher.finalize() != crc_read {
        return integrity_error("PNG chunk CRC32 mismatch");
    }

    let mut kind = [0u8; 4];
    kind.copy_from_slice(kind_bytes);
    Ok(Chunk { kind, data })
}

/// Appends one length-prefixed, CRC32-checked chunk to `out`.
pub fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_chunk_with_valid_crc() {
        let mut bytes = Vec::new();
        write_chunk(&mut bytes, b"tEXt", b"hello");

        let mut r = ByteReader::new(&bytes);
        let chunk = read_chunk(&mut r).unwrap();
        assert_eq!(&chunk.kind, b"tEXt");
        assert_eq!(chunk.data, b"hello");
    }

    #[test]
    fn corrupted_data_fails_crc_check() {
        let mut bytes = Vec::new();
        write_chunk(&mut bytes, b"tEXt", b"hello");
        let last_data_byte = 8 + 4 + 4; // length + kind + first 4 data bytes
        bytes[last_data_byte] ^= 0xFF;

        let mut r = ByteReader::new(&bytes);
        assert!(read_chunk(&mut r).is_err());
    }
}
