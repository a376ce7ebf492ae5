// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Buffers a non-seekable `std::io::Read` source into a growable buffer with `ReadExactly`
//! semantics, per §4.1/§9: "when seek is absent, buffer the whole source into a pooled byte
//! buffer before format sniffing and then feed a byte-array decoder path."

use crate::errors::Result;
use crate::pool::BufferPool;

/// Reads `source` to exhaustion, looping short reads until EOF. This is the non-seekable
/// on-ramp used by every codec's `decode_stream` entry point: the bytes collected here are
/// handed to the same [`super::ByteReader`]-based parser used by the byte-array entry point,
/// which is what makes the chunked-source equivalence property hold regardless of how many
/// bytes a single `read` call returns.
pub fn buffer_entire_source<R: std::io::Read>(mut source: R) -> Result<Vec<u8>> {
    let pool = BufferPool::new();
    let mut out = pool.checkout(0);
    let mut chunk = [0u8; 4096];

    loop {
        let n = source.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChunkedReader<'a> {
        data: &'a [u8],
        pos: usize,
        max_read: usize,
    }

    impl<'a> std::io::Read for ChunkedReader<'a> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = (self.data.len() - self.pos).min(buf.len()).min(self.max_read);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn buffering_is_independent_of_read_chunk_size() {
        let data: Vec<u8> = (0..257).map(|i| i as u8).collect();

        for max_read in [1, 3, 5, 7, 11] {
            let reader = ChunkedReader { data: &data, pos: 0, max_read };
            let collected = buffer_entire_source(reader).unwrap();
            assert_eq!(collected, data);
        }
    }
}
