use std::io::{self, Write};

use lzfse_rust::LzfseRingDecoder;

use crate::error::DecodeError;

/// Upper bound on the output of a decompressor, relative to the bitmap's minimum size
const MAX_EXPANSION: usize = 4;

/// Inflate a zlib stream
pub fn inflate_zlib(body: &[u8], min_len: usize) -> Result<Vec<u8>, DecodeError> {
    let limit = min_len.saturating_mul(MAX_EXPANSION);

    miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(body, limit)
        .map_err(|err| DecodeError::corrupt(format!("zlib stream: {:?}", err.status)))
}

/// Decode an LZFSE stream; LZVN payloads use the same block framing
pub fn decode_lzfse(body: &[u8], min_len: usize) -> Result<Vec<u8>, DecodeError> {
    let mut src = body;
    let mut dst = BoundedWriter {
        out: Vec::new(),
        limit: min_len.saturating_mul(MAX_EXPANSION),
        exceeded: false,
    };

    match LzfseRingDecoder::default().decode(&mut src, &mut dst) {
        Ok(_) => Ok(dst.out),
        Err(_) if dst.exceeded => Err(DecodeError::corrupt(format!(
            "LZFSE stream expands past {} bytes, expected about {min_len}",
            dst.limit
        ))),
        Err(err) => Err(DecodeError::corrupt(format!("LZFSE stream: {err}"))),
    }
}

/// Collects decoder output, failing as soon as it grows past `limit`
struct BoundedWriter {
    out: Vec<u8>,
    limit: usize,
    exceeded: bool,
}

impl Write for BoundedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.out.len() + buf.len() > self.limit {
            self.exceeded = true;
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "decompressed output is too large",
            ));
        }

        self.out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
