use crate::error::DecodeError;

/// Expand a CoreUI run-length payload
///
/// The stream is a sequence of packets, each starting with a header byte `h`:
/// - `h < 0x80`: `h + 1` literal pixels follow
/// - `h >= 0x80`: one pixel follows, repeated `h - 0x7F` times
///
/// Pixels are `bpp` bytes wide. Decoding stops once `expected_len` bytes have
/// been produced.
pub fn expand(input: &[u8], bpp: usize, expected_len: usize) -> Result<Vec<u8>, DecodeError> {
    // A packet of at most 5 bytes expands to 128 pixels
    let mut out = Vec::with_capacity(expected_len.min(input.len().saturating_mul(128)));
    let mut pos = 0;

    while out.len() < expected_len {
        let Some(&header) = input.get(pos) else {
            return Err(DecodeError::corrupt(format!(
                "run-length data ends after {} of {expected_len} bytes",
                out.len()
            )));
        };
        pos += 1;

        let (count, literal) = if header < 0x80 {
            (usize::from(header) + 1, true)
        } else {
            (usize::from(header) - 0x7F, false)
        };

        let take = if literal { count * bpp } else { bpp };
        let chunk = input
            .get(pos..pos + take)
            .ok_or_else(|| DecodeError::corrupt("run-length packet is truncated"))?;
        pos += take;

        if out.len() + count * bpp > expected_len {
            return Err(DecodeError::corrupt(
                "run-length data overflows the bitmap",
            ));
        }

        if literal {
            out.extend_from_slice(chunk);
        } else {
            for _ in 0..count {
                out.extend_from_slice(chunk);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_and_runs() {
        // 2 literal 2-byte pixels, then a run of 3
        let input = [0x01, 1, 2, 3, 4, 0x82, 9, 8];
        assert_eq!(
            expand(&input, 2, 10).unwrap(),
            [1, 2, 3, 4, 9, 8, 9, 8, 9, 8]
        );
    }

    #[test]
    fn longest_run() {
        let input = [0xFF, 7];
        assert_eq!(expand(&input, 1, 128).unwrap(), vec![7; 128]);
    }

    #[test]
    fn truncated_input() {
        assert!(expand(&[0x03, 1, 2], 1, 4).is_err());
        assert!(expand(&[0x80, 1], 1, 2).is_err());
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(expand(&[0x83, 1], 1, 2).is_err());
    }
}
