//! SGR color decoder
//!
//! Turns the raw stdout byte stream of the child into tagged text segments.
//! Only `ESC [ [<intensity> ;] <color> m` is interpreted; cursor movement,
//! screen clearing and every other control sequence are out of scope.

use thiserror::Error;

/// Longest escape body accepted before the sequence is declared malformed
pub const MAX_SEQUENCE_LEN: usize = 10;

const ESC: u8 = 0x1B;
const SGR_TERMINATOR: u8 = b'm';

/// Symbolic color attached to a run of text
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StyleTag {
    /// No styling
    #[default]
    None,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl StyleTag {
    /// Tag name as shown to the UI layer, empty for [`StyleTag::None`]
    pub fn name(self) -> &'static str {
        match self {
            StyleTag::None => "",
            StyleTag::Black => "black",
            StyleTag::Red => "red",
            StyleTag::Green => "green",
            StyleTag::Yellow => "yellow",
            StyleTag::Blue => "blue",
            StyleTag::Magenta => "magenta",
            StyleTag::Cyan => "cyan",
            StyleTag::White => "white",
        }
    }

    /// Standard foreground color codes 30-37
    fn from_color_code(code: u16) -> Option<Self> {
        match code {
            30 => Some(StyleTag::Black),
            31 => Some(StyleTag::Red),
            32 => Some(StyleTag::Green),
            33 => Some(StyleTag::Yellow),
            34 => Some(StyleTag::Blue),
            35 => Some(StyleTag::Magenta),
            36 => Some(StyleTag::Cyan),
            37 => Some(StyleTag::White),
            _ => None,
        }
    }
}

/// Resolution of one SGR sequence body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sgr {
    Color(StyleTag),
    Reset,
    Undefined,
    /// Bright variants (`1;3x`) are not mapped to distinct colors
    Unsupported,
}

impl Sgr {
    /// Resolve the bytes between ESC and the terminating `m`
    pub fn parse(body: &[u8]) -> Sgr {
        let body = body.strip_prefix(b"[").unwrap_or(body);
        let Ok(text) = std::str::from_utf8(body) else {
            return Sgr::Undefined;
        };

        let (intensity, color) = text.split_once(';').unwrap_or(("0", text));
        let (Ok(intensity), Ok(color)) = (intensity.parse::<u16>(), color.parse::<u16>()) else {
            return Sgr::Undefined;
        };

        match (intensity, color) {
            (1, _) => Sgr::Unsupported,
            (0, 0) => Sgr::Reset,
            (0, code) => StyleTag::from_color_code(code)
                .map(Sgr::Color)
                .unwrap_or(Sgr::Undefined),
            _ => Sgr::Undefined,
        }
    }
}

/// Atomic unit of decoded output
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextSegment {
    pub text: Vec<u8>,
    pub tag: StyleTag,
}

impl TextSegment {
    pub fn new(text: impl Into<Vec<u8>>, tag: StyleTag) -> Self {
        Self {
            text: text.into(),
            tag,
        }
    }

    /// Empty segment closing one complete stderr message
    pub fn sentinel() -> Self {
        Self::default()
    }

    pub fn is_sentinel(&self) -> bool {
        self.text.is_empty() && self.tag == StyleTag::None
    }
}

/// An escape sequence ran past [`MAX_SEQUENCE_LEN`] bytes without a terminator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed escape sequence, no terminator within {MAX_SEQUENCE_LEN} bytes: {bytes:?}")]
pub struct MalformedSequence {
    /// The discarded sequence body
    pub bytes: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum DecoderState {
    #[default]
    Normal,
    InEscape,
}

/// Byte-at-a-time SGR decoder
///
/// The active tag persists across calls, so a sequence split across two
/// reads decodes the same as one delivered whole.
#[derive(Debug, Default)]
pub struct AnsiDecoder {
    state: DecoderState,
    sequence: Vec<u8>,
    current: StyleTag,
}

impl AnsiDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Normal,
            sequence: Vec::with_capacity(MAX_SEQUENCE_LEN + 1),
            current: StyleTag::None,
        }
    }

    /// Tag applied to the next emitted byte
    #[cfg(test)]
    pub fn current_tag(&self) -> StyleTag {
        self.current
    }

    /// Forget any partial sequence and the active tag
    pub fn reset(&mut self) {
        self.state = DecoderState::Normal;
        self.sequence.clear();
        self.current = StyleTag::None;
    }

    /// Feed a single byte
    ///
    /// On error the decoder is already back in the normal state with the
    /// malformed body discarded; the caller may keep feeding.
    pub fn feed(&mut self, byte: u8) -> Result<Option<TextSegment>, MalformedSequence> {
        match self.state {
            DecoderState::Normal => {
                if byte == ESC {
                    self.state = DecoderState::InEscape;
                    self.sequence.clear();
                    return Ok(None);
                }
                Ok(Some(TextSegment::new(vec![byte], self.current)))
            }
            DecoderState::InEscape => {
                if byte == SGR_TERMINATOR {
                    let sgr = Sgr::parse(&self.sequence);
                    self.apply(sgr);
                    self.sequence.clear();
                    self.state = DecoderState::Normal;
                    return Ok(None);
                }

                self.sequence.push(byte);
                if self.sequence.len() > MAX_SEQUENCE_LEN {
                    self.state = DecoderState::Normal;
                    let bytes = std::mem::take(&mut self.sequence);
                    return Err(MalformedSequence { bytes });
                }
                Ok(None)
            }
        }
    }

    /// Decode a chunk, appending produced segments to `out`
    ///
    /// Malformed sequences are logged and skipped.
    pub fn decode_into(&mut self, bytes: &[u8], out: &mut Vec<TextSegment>) {
        for &byte in bytes {
            match self.feed(byte) {
                Ok(Some(segment)) => out.push(segment),
                Ok(None) => {}
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }

    fn apply(&mut self, sgr: Sgr) {
        self.current = match sgr {
            Sgr::Color(tag) => tag,
            Sgr::Reset | Sgr::Undefined | Sgr::Unsupported => StyleTag::None,
        };
        tracing::trace!("{:?} sets style {:?}", sgr, self.current.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> (AnsiDecoder, Vec<TextSegment>) {
        let mut decoder = AnsiDecoder::new();
        let mut out = Vec::new();
        decoder.decode_into(bytes, &mut out);
        (decoder, out)
    }

    #[test]
    fn test_sgr_red_and_reset() {
        let (decoder, _) = decode(b"\x1b[31m");
        assert_eq!(decoder.current_tag(), StyleTag::Red);

        let (decoder, _) = decode(b"\x1b[36m\x1b[0m");
        assert_eq!(decoder.current_tag(), StyleTag::None);
    }

    #[test]
    fn test_sgr_table() {
        assert_eq!(Sgr::parse(b"[30"), Sgr::Color(StyleTag::Black));
        assert_eq!(Sgr::parse(b"[37"), Sgr::Color(StyleTag::White));
        assert_eq!(Sgr::parse(b"[0;34"), Sgr::Color(StyleTag::Blue));
        assert_eq!(Sgr::parse(b"[0"), Sgr::Reset);
        assert_eq!(Sgr::parse(b"[1;31"), Sgr::Unsupported);
        assert_eq!(Sgr::parse(b"[1;0"), Sgr::Unsupported);
        assert_eq!(Sgr::parse(b"[45"), Sgr::Undefined);
        assert_eq!(Sgr::parse(b"[4;31"), Sgr::Undefined);
        assert_eq!(Sgr::parse(b"["), Sgr::Undefined);
        assert_eq!(Sgr::parse(b"[31;40;1"), Sgr::Undefined);
    }

    #[test]
    fn test_bright_clears_style() {
        let (decoder, _) = decode(b"\x1b[32m\x1b[1;32m");
        assert_eq!(decoder.current_tag(), StyleTag::None);
    }

    #[test]
    fn test_colored_scenario() {
        let (_, segments) = decode(b"\x1b[31mHI\x1b[0mBYE\n");
        let expected = vec![
            TextSegment::new(*b"H", StyleTag::Red),
            TextSegment::new(*b"I", StyleTag::Red),
            TextSegment::new(*b"B", StyleTag::None),
            TextSegment::new(*b"Y", StyleTag::None),
            TextSegment::new(*b"E", StyleTag::None),
            TextSegment::new(*b"\n", StyleTag::None),
        ];
        assert_eq!(segments, expected);
    }

    #[test]
    fn test_plain_bytes_one_segment_each() {
        let input: Vec<u8> = (0u8..=255).filter(|&b| b != ESC).collect();
        let mut decoder = AnsiDecoder::new();
        let mut out = Vec::new();
        decoder.decode_into(b"\x1b[33m", &mut out);
        decoder.decode_into(&input, &mut out);

        assert_eq!(out.len(), input.len());
        assert!(out.iter().all(|s| s.tag == StyleTag::Yellow && s.text.len() == 1));
        let joined: Vec<u8> = out.into_iter().flat_map(|s| s.text).collect();
        assert_eq!(joined, input);
    }

    #[test]
    fn test_sequence_split_across_reads() {
        let mut decoder = AnsiDecoder::new();
        let mut out = Vec::new();
        decoder.decode_into(b"a\x1b[3", &mut out);
        decoder.decode_into(b"2mb", &mut out);

        assert_eq!(
            out,
            vec![
                TextSegment::new(*b"a", StyleTag::None),
                TextSegment::new(*b"b", StyleTag::Green),
            ]
        );
    }

    #[test]
    fn test_malformed_sequence_recovers() {
        let mut decoder = AnsiDecoder::new();
        for byte in b"\x1b[34m" {
            decoder.feed(*byte).unwrap();
        }

        assert_eq!(decoder.feed(ESC), Ok(None));
        for byte in b"[123456789" {
            assert_eq!(decoder.feed(*byte), Ok(None));
        }
        let err = decoder.feed(b'0').unwrap_err();
        assert_eq!(err.bytes, b"[1234567890".to_vec());

        // Back to normal, tag untouched by the discarded body
        assert_eq!(
            decoder.feed(b'x'),
            Ok(Some(TextSegment::new(*b"x", StyleTag::Blue)))
        );
    }

    #[test]
    fn test_sentinel() {
        assert!(TextSegment::sentinel().is_sentinel());
        assert!(!TextSegment::new(*b"", StyleTag::Red).is_sentinel());
        assert!(!TextSegment::new(*b"a", StyleTag::None).is_sentinel());
    }
}
