//! Dot-stuffing for DATA bodies.
//!
//! Any line of the body that begins with `.` gets a second `.` in front of
//! it. State carries across chunks, so a body may be fed in pieces of any
//! size. Lines are delimited by CRLF only; a bare LF does not start a line.

use bytes::{BufMut, BytesMut};

/// End-of-data marker, always sent after the last body.
pub const TERMINATOR: &[u8] = b"\r\n.\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    LineStart,
    AfterCr,
    Inside,
}

/// Incremental dot-stuffer.
#[derive(Debug, Clone)]
pub struct DotStuffer {
    position: Position,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DotStuffer {
    /// Creates a stuffer positioned at the start of a line.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            position: Position::LineStart,
        }
    }

    /// Appends the stuffed form of `chunk` to `out`.
    pub fn stuff(&mut self, chunk: &[u8], out: &mut BytesMut) {
        out.reserve(chunk.len() + 8);
        for &byte in chunk {
            if self.position == Position::LineStart && byte == b'.' {
                out.put_u8(b'.');
            }
            out.put_u8(byte);
            self.position = match (self.position, byte) {
                (_, b'\r') => Position::AfterCr,
                (Position::AfterCr, b'\n') => Position::LineStart,
                _ => Position::Inside,
            };
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stuff_all(input: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::new();
        DotStuffer::new().stuff(input, &mut out);
        out.to_vec()
    }

    #[test]
    fn leading_dot_on_first_line() {
        assert_eq!(stuff_all(b".hidden\r\n"), b"..hidden\r\n");
    }

    #[test]
    fn dot_after_crlf() {
        assert_eq!(stuff_all(b"a\r\n.\r\nb"), b"a\r\n..\r\nb");
    }

    #[test]
    fn dot_mid_line_untouched() {
        assert_eq!(stuff_all(b"a.b\r\n"), b"a.b\r\n");
    }

    #[test]
    fn bare_lf_is_not_a_line_break() {
        assert_eq!(stuff_all(b"a\n.b"), b"a\n.b");
    }

    #[test]
    fn state_spans_chunks() {
        let mut stuffer = DotStuffer::new();
        let mut out = BytesMut::new();
        stuffer.stuff(b"line\r", &mut out);
        stuffer.stuff(b"\n.dot", &mut out);
        assert_eq!(&out[..], b"line\r\n..dot");
    }

    proptest! {
        #[test]
        fn unstuffing_restores_input(body in proptest::collection::vec(
            prop_oneof![Just(b'.'), Just(b'\r'), Just(b'\n'), Just(b'x')], 0..64,
        ), split in 0usize..64) {
            let split = split.min(body.len());
            let mut stuffer = DotStuffer::new();
            let mut out = BytesMut::new();
            stuffer.stuff(&body[..split], &mut out);
            stuffer.stuff(&body[split..], &mut out);

            prop_assert_eq!(&out[..], &stuff_all(&body)[..]);

            // A receiver drops one dot from every line that starts with one.
            let mut restored = Vec::with_capacity(out.len());
            let mut at_line_start = true;
            let mut after_cr = false;
            for &byte in out.iter() {
                if at_line_start && byte == b'.' {
                    at_line_start = false;
                    continue;
                }
                restored.push(byte);
                at_line_start = after_cr && byte == b'\n';
                after_cr = byte == b'\r';
            }
            prop_assert_eq!(restored, body);
        }
    }
}
