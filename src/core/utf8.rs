//! Carries incomplete UTF-8 sequences from one render tick to the next.
//!
//! Segments hold raw bytes, so a multi-byte character can be split between
//! two relay reads and therefore between two ticks. Decoding each tick's
//! bytes on their own would turn both halves into U+FFFD.

/// A code point is at most 4 bytes
const MAX_PARTIAL: usize = 4;

#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    partial: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self {
            partial: Vec::with_capacity(MAX_PARTIAL),
        }
    }

    /// Decode `data`, holding back a trailing incomplete sequence
    ///
    /// Bytes that can never form a valid sequence become U+FFFD.
    pub fn push(&mut self, data: &[u8]) -> String {
        let mut combined = std::mem::take(&mut self.partial);
        combined.extend_from_slice(data);

        let valid_up_to = match std::str::from_utf8(&combined) {
            Ok(_) => return String::from_utf8_lossy(&combined).into_owned(),
            Err(e) => e.valid_up_to(),
        };

        let trailing = &combined[valid_up_to..];
        if is_incomplete_start(trailing) {
            self.partial.extend_from_slice(trailing);
            return String::from_utf8_lossy(&combined[..valid_up_to]).into_owned();
        }

        String::from_utf8_lossy(&combined).into_owned()
    }

    /// Drop anything held back, rendering it as U+FFFD
    pub fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.partial);
        String::from_utf8_lossy(&rest).into_owned()
    }

    /// Whether bytes of an incomplete sequence are held back
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

/// Whether `bytes` is the truncated start of an otherwise valid sequence
fn is_incomplete_start(bytes: &[u8]) -> bool {
    let Some(&lead) = bytes.first() else {
        return false;
    };
    let expected_len = match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => return false,
    };
    bytes.len() < expected_len && bytes[1..].iter().all(|&b| (0x80..=0xBF).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passthrough() {
        let mut acc = Utf8Accumulator::new();
        assert_eq!(acc.push(b"hello"), "hello");
        assert_eq!(acc.flush(), "");
    }

    #[test]
    fn test_split_three_byte_char() {
        let mut acc = Utf8Accumulator::new();
        // U+20AC = E2 82 AC
        assert_eq!(acc.push(b"abc\xE2\x82"), "abc");
        assert_eq!(acc.push(b"\xACdef"), "\u{20AC}def");
    }

    #[test]
    fn test_split_one_byte_at_a_time() {
        let mut acc = Utf8Accumulator::new();
        // U+1D573 = F0 9D 95 B3
        assert_eq!(acc.push(b"\xF0"), "");
        assert_eq!(acc.push(b"\x9D"), "");
        assert_eq!(acc.push(b"\x95"), "");
        assert_eq!(acc.push(b"\xB3"), "\u{1D573}");
    }

    #[test]
    fn test_invalid_byte_replaced() {
        let mut acc = Utf8Accumulator::new();
        assert_eq!(acc.push(b"ok\xFFok"), "ok\u{FFFD}ok");
    }

    #[test]
    fn test_flush_incomplete() {
        let mut acc = Utf8Accumulator::new();
        assert_eq!(acc.push(b"x\xC3"), "x");
        assert_eq!(acc.flush(), "\u{FFFD}");
        assert_eq!(acc.push(b"y"), "y");
    }
}
