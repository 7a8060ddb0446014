/// Streaming UTF-8 decoder for PTY output.
///
/// A PTY read can end in the middle of a multi-byte character. The decoder
/// holds back such an incomplete tail and prepends it to the next chunk, so
/// each emitted string is valid UTF-8 and no character is split or lost.
/// Genuinely invalid bytes are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk. May return an empty string if the whole chunk is
    /// the start of a character still being received.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let split = bytes.len() - incomplete_tail_len(&bytes);
        self.pending = bytes[split..].to_vec();
        String::from_utf8_lossy(&bytes[..split]).into_owned()
    }

    /// Flush whatever is held back, replacing it if it never completed.
    pub fn finish(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Number of bytes currently held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Length of a trailing, not-yet-complete UTF-8 sequence.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = if byte & 0b1110_0000 == 0b1100_0000 {
            2
        } else if byte & 0b1111_0000 == 0b1110_0000 {
            3
        } else if byte & 0b1111_1000 == 0b1111_0000 {
            4
        } else {
            1
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(b"file.txt\n"), "file.txt\n");
        assert_eq!(dec.pending_len(), 0);
    }

    #[test]
    fn test_split_multibyte_char() {
        // U+2714 HEAVY CHECK MARK is E2 9C 94.
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(b"ok \xE2\x9C"), "ok ");
        assert_eq!(dec.pending_len(), 2);
        assert_eq!(dec.decode(b"\x94 done"), "\u{2714} done");
        assert_eq!(dec.pending_len(), 0);
    }

    #[test]
    fn test_split_four_byte_char_one_byte_at_a_time() {
        let emoji = "\u{1F600}".as_bytes();
        let mut dec = Utf8Decoder::new();
        let mut out = String::new();
        for b in emoji {
            out.push_str(&dec.decode(&[*b]));
        }
        assert_eq!(out, "\u{1F600}");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_finish_flushes_incomplete_tail() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(b"x\xE2"), "x");
        assert_eq!(dec.finish(), "\u{FFFD}");
        assert_eq!(dec.finish(), "");
    }
}
