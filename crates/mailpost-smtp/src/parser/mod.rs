//! SMTP reply decoder.
//!
//! [`ReplyDecoder`] is a byte-at-a-time state machine with no I/O of its
//! own. The connection feeds it bytes as they arrive and gets back one
//! [`Line`] per CRLF. A reply is the run of lines up to and including the
//! first line whose code is followed by a space instead of a dash:
//!
//! - Single: `250 OK\r\n`
//! - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
//!
//! Misbehaving servers are tolerated up to a point. Stray carriage returns,
//! blank lines and a malformed status prefix each count as one deviation;
//! the line is kept (marked broken) and decoding carries on. A garbled code
//! still occupies the first three columns, so a `-` in the fourth keeps the
//! reply open. A final-looking line followed by more lines with the same
//! code (a dropped continuation dash) is reopened with [`ReplyDecoder::resume`].
//! Once a reply accumulates more deviations than the configured tolerance
//! the decoder gives up with [`Error::ReplyThrashing`].

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Deviations absorbed per reply before the decoder gives up.
pub const DEFAULT_TOLERANCE: u32 = 5;

/// One decoded reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Status code accumulated from the leading digits.
    pub code: ReplyCode,
    /// Text after the four-character status prefix.
    pub text: String,
    /// True if the line did not follow the reply grammar.
    pub broken: bool,
    /// True if this line terminates the reply.
    pub last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Tens,
    Ones,
    Separator,
    Text,
    Cr,
}

/// Incremental reply decoder.
#[derive(Debug, Clone)]
pub struct ReplyDecoder {
    state: State,
    code: u16,
    continues: bool,
    broken: bool,
    text: Vec<u8>,
    deviations: u32,
    tolerance: u32,
    reply_done: bool,
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl ReplyDecoder {
    /// Creates a decoder that absorbs up to `tolerance` deviations per reply.
    #[must_use]
    pub const fn new(tolerance: u32) -> Self {
        Self {
            state: State::Start,
            code: 0,
            continues: false,
            broken: false,
            text: Vec::new(),
            deviations: 0,
            tolerance,
            reply_done: false,
        }
    }

    /// Discards any partial line and the deviation count.
    pub fn reset(&mut self) {
        self.start_line();
        self.deviations = 0;
        self.reply_done = false;
    }

    /// Reopens a reply whose final line is followed by `ahead`, bytes the
    /// server has already sent, when they start another line with the same
    /// code.
    ///
    /// The line is marked broken and no longer last, and one deviation is
    /// counted against the reply. Returns true if the reply was reopened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReplyThrashing`] once the deviation tolerance is exceeded.
    pub fn resume(&mut self, line: &mut Line, ahead: &[u8]) -> Result<bool> {
        if !line.last || ahead.is_empty() {
            return Ok(false);
        }
        let code = line.code.as_u16();
        let digits = [code / 100 % 10, code / 10 % 10, code % 10]
            .map(|d| b'0' + u8::try_from(d).unwrap_or_default());
        let n = ahead.len().min(digits.len());
        if ahead[..n] != digits[..n] {
            return Ok(false);
        }

        self.reply_done = false;
        self.deviate()?;
        line.last = false;
        line.broken = true;
        Ok(true)
    }

    /// Feeds one byte.
    ///
    /// Returns a [`Line`] when the byte completes one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReplyThrashing`] once the deviation tolerance is exceeded.
    pub fn push(&mut self, byte: u8) -> Result<Option<Line>> {
        if self.reply_done {
            self.reply_done = false;
            self.deviations = 0;
        }

        match self.state {
            State::Start => match byte {
                b'0'..=b'9' => {
                    self.code = u16::from(byte - b'0') * 100;
                    self.state = State::Tens;
                }
                // Blank line or stray CR ahead of the code.
                b'\r' | b'\n' => self.deviate()?,
                _ => {
                    self.garble()?;
                    self.state = State::Tens;
                }
            },
            State::Tens => match byte {
                b'0'..=b'9' => {
                    self.code += u16::from(byte - b'0') * 10;
                    self.state = State::Ones;
                }
                b'\r' | b'\n' => return self.cut_short(byte),
                _ => {
                    self.garble()?;
                    self.state = State::Ones;
                }
            },
            State::Ones => match byte {
                b'0'..=b'9' => {
                    self.code += u16::from(byte - b'0');
                    self.state = State::Separator;
                }
                b'\r' | b'\n' => return self.cut_short(byte),
                _ => {
                    self.garble()?;
                    self.state = State::Separator;
                }
            },
            State::Separator => match byte {
                b'-' => {
                    self.continues = true;
                    self.state = State::Text;
                }
                b' ' => self.state = State::Text,
                // Bare code, e.g. `250\r\n`.
                b'\r' => self.state = State::Cr,
                b'\n' => return Ok(Some(self.finish_line())),
                _ => {
                    self.garble()?;
                    self.text.push(byte);
                    self.state = State::Text;
                }
            },
            State::Text => match byte {
                b'\r' => self.state = State::Cr,
                b'\n' => return Ok(Some(self.finish_line())),
                _ => self.text.push(byte),
            },
            State::Cr => match byte {
                b'\n' => return Ok(Some(self.finish_line())),
                b'\r' => self.deviate()?,
                _ => {
                    // Bare CR inside the text.
                    self.deviate()?;
                    self.text.push(byte);
                    self.state = State::Text;
                }
            },
        }
        Ok(None)
    }

    /// Marks the line broken, counting one deviation per line.
    fn garble(&mut self) -> Result<()> {
        if !self.broken {
            self.broken = true;
            self.deviate()?;
        }
        Ok(())
    }

    /// Line ended inside the status code.
    fn cut_short(&mut self, byte: u8) -> Result<Option<Line>> {
        self.garble()?;
        if byte == b'\r' {
            self.state = State::Cr;
            Ok(None)
        } else {
            Ok(Some(self.finish_line()))
        }
    }

    fn deviate(&mut self) -> Result<()> {
        self.deviations += 1;
        if self.deviations > self.tolerance {
            let seen = self.deviations;
            self.reset();
            return Err(Error::ReplyThrashing(seen));
        }
        Ok(())
    }

    fn finish_line(&mut self) -> Line {
        let line = Line {
            code: ReplyCode::new(self.code),
            text: String::from_utf8_lossy(&self.text).into_owned(),
            broken: self.broken,
            last: !self.continues,
        };
        self.start_line();
        self.reply_done = line.last;
        line
    }

    fn start_line(&mut self) {
        self.state = State::Start;
        self.code = 0;
        self.continues = false;
        self.broken = false;
        self.text.clear();
    }
}

/// Folds the lines of one reply into a single [`Reply`].
///
/// The code comes from the final line; texts are joined with `\n`. Lines
/// that disagree on the code mark the reply broken.
#[must_use]
pub fn collapse(lines: &[Line]) -> Reply {
    let Some(last) = lines.last() else {
        return Reply::default();
    };
    let broken = lines
        .iter()
        .any(|line| line.broken || line.code != last.code);
    let text = lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if broken {
        Reply::broken(last.code, text)
    } else {
        Reply::new(last.code, text)
    }
}

/// Turns each line of one reply into its own [`Reply`].
#[must_use]
pub fn expand(lines: &[Line]) -> Vec<Reply> {
    lines
        .iter()
        .map(|line| {
            if line.broken {
                Reply::broken(line.code, line.text.clone())
            } else {
                Reply::new(line.code, line.text.clone())
            }
        })
        .collect()
}

/// Decodes the lines of the first complete reply in `input`.
///
/// Bytes after a final line are treated as already buffered: lines that
/// repeat its code are folded into the same reply.
///
/// # Errors
///
/// Returns [`Error::ConnectionClosed`] if `input` ends before the reply is
/// complete, or [`Error::ReplyThrashing`] on malformed input.
pub fn decode_lines(input: &[u8], tolerance: u32) -> Result<Vec<Line>> {
    let mut decoder = ReplyDecoder::new(tolerance);
    let mut lines = Vec::new();
    for (at, &byte) in input.iter().enumerate() {
        if let Some(mut line) = decoder.push(byte)? {
            decoder.resume(&mut line, &input[at + 1..])?;
            let last = line.last;
            lines.push(line);
            if last {
                return Ok(lines);
            }
        }
    }
    Err(Error::ConnectionClosed)
}

/// Decodes one reply from a complete buffer.
///
/// # Errors
///
/// See [`decode_lines`].
pub fn decode_reply(input: &[u8]) -> Result<Reply> {
    decode_lines(input, DEFAULT_TOLERANCE).map(|lines| collapse(&lines))
}

/// Decodes one reply from a complete buffer, one [`Reply`] per line.
///
/// # Errors
///
/// See [`decode_lines`].
pub fn decode_replies(input: &[u8]) -> Result<Vec<Reply>> {
    decode_lines(input, DEFAULT_TOLERANCE).map(|lines| expand(&lines))
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

    #[test]
    fn test_single_line_reply() {
        let reply = decode_reply(b"250 OK\r\n").unwrap();
        assert_eq!(reply.code().as_u16(), 250);
        assert_eq!(reply.text(), "OK");
        assert!(!reply.is_broken());
    }

    #[test]
    fn test_multi_line_replies() {
        let replies = decode_replies(b"250-EXT1\r\n250-EXT2\r\n250 DONE\r\n").unwrap();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].text(), "EXT1");
        assert_eq!(replies[1].text(), "EXT2");
        assert_eq!(replies[2].text(), "DONE");
        assert!(replies.iter().all(|r| r.code().as_u16() == 250));
    }

    #[test]
    fn test_multi_line_collapsed() {
        let reply = decode_reply(b"220-mx.example.com ESMTP\r\n220 ready\r\n").unwrap();
        assert_eq!(reply.code(), ReplyCode::SERVICE_READY);
        assert_eq!(reply.text(), "mx.example.com ESMTP\nready");
    }

    #[test]
    fn test_stops_after_final_line() {
        let lines = decode_lines(b"250 first\r\n354 second\r\n", DEFAULT_TOLERANCE).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "first");
    }

    #[test]
    fn test_missing_dash_folded_into_reply() {
        let lines = decode_lines(
            b"250-mx\r\n250 SIZE 100\r\n250-DSN\r\n250 HELP\r\n",
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        let texts: Vec<_> = lines.iter().map(|line| line.text.as_str()).collect();
        assert_eq!(texts, ["mx", "SIZE 100", "DSN", "HELP"]);
        assert!(lines[1].broken);
        assert!(!lines[1].last);
        assert!(!lines[2].broken);
        assert!(lines[3].last);
    }

    #[test]
    fn test_garbled_code_keeps_continuation() {
        let lines =
            decode_lines(b"250-mx\r\n2X0-JUNK\r\n250 HELP\r\n", DEFAULT_TOLERANCE).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].broken);
        assert_eq!(lines[1].code.as_u16(), 200);
        assert_eq!(lines[1].text, "JUNK");

        let reply = collapse(&lines);
        assert_eq!(reply.code(), ReplyCode::OK);
        assert!(reply.is_broken());
    }

    #[test]
    fn test_resume_counts_against_tolerance() {
        let mut decoder = ReplyDecoder::new(1);
        let mut lines = Vec::new();
        let input = b"250 a\r\n250 b\r\n250 c\r\n";
        let mut result = Ok(());
        for (at, &byte) in input.iter().enumerate() {
            match decoder.push(byte) {
                Ok(Some(mut line)) => {
                    if let Err(e) = decoder.resume(&mut line, &input[at + 1..]) {
                        result = Err(e);
                        break;
                    }
                    lines.push(line);
                }
                Ok(None) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        assert!(matches!(result, Err(Error::ReplyThrashing(2))));
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_bare_code() {
        let reply = decode_reply(b"354\r\n").unwrap();
        assert_eq!(reply.code(), ReplyCode::START_DATA);
        assert_eq!(reply.text(), "");
        assert!(!reply.is_broken());
    }

    #[test]
    fn test_bare_lf_terminates_line() {
        let reply = decode_reply(b"250 OK\n").unwrap();
        assert_eq!(reply.text(), "OK");
        assert!(!reply.is_broken());
    }

    #[test]
    fn test_four_bare_crs_tolerated() {
        let reply = decode_reply(b"250 OK\r\r\r\r\r\n").unwrap();
        assert_eq!(reply.code(), ReplyCode::OK);
        assert_eq!(reply.text(), "OK");
    }

    #[test]
    fn test_five_bare_crs_tolerated() {
        assert!(decode_reply(b"250 OK\r\r\r\r\r\r\n").is_ok());
    }

    #[test]
    fn test_sixth_bare_cr_thrashes() {
        let err = decode_reply(b"250 OK\r\r\r\r\r\r\r\n").unwrap_err();
        assert!(matches!(err, Error::ReplyThrashing(6)));
    }

    #[test]
    fn test_bare_cr_inside_text() {
        let reply = decode_reply(b"250 A\rB\r\n").unwrap();
        assert_eq!(reply.text(), "AB");
    }

    #[test]
    fn test_non_digit_code_is_broken() {
        let reply = decode_reply(b"2X0 odd\r\n").unwrap();
        assert!(reply.is_broken());
        assert_eq!(reply.code().as_u16(), 200);
        assert_eq!(reply.text(), "odd");
    }

    #[test]
    fn test_garbage_line_is_broken_abort() {
        let reply = decode_reply(b"hello\r\n").unwrap();
        assert!(reply.is_broken());
        assert_eq!(reply.code(), ReplyCode::ABORT);
        assert!(reply.is_failure());
    }

    #[test]
    fn test_unknown_separator_is_broken() {
        let reply = decode_reply(b"250+odd\r\n").unwrap();
        assert!(reply.is_broken());
        assert_eq!(reply.text(), "+odd");
    }

    #[test]
    fn test_leading_blank_lines_skipped() {
        let reply = decode_reply(b"\r\n\r\n250 OK\r\n").unwrap();
        assert_eq!(reply.code(), ReplyCode::OK);
    }

    #[test]
    fn test_mismatched_continuation_codes_broken() {
        let reply = decode_reply(b"250-a\r\n251 b\r\n").unwrap();
        assert!(reply.is_broken());
        assert_eq!(reply.code(), ReplyCode::FORWARD);
    }

    #[test]
    fn test_incomplete_reply_is_closed() {
        assert!(matches!(
            decode_reply(b"250-more\r\n250 trunc"),
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(decode_reply(b""), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_tolerance_resets_between_replies() {
        let mut decoder = ReplyDecoder::new(2);
        for &b in b"250 a\r\r\r\n" {
            decoder.push(b).unwrap();
        }
        let mut last = None;
        for &b in b"250 b\r\r\r\n" {
            if let Some(line) = decoder.push(b).unwrap() {
                last = Some(line);
            }
        }
        assert_eq!(last.unwrap().text, "b");
    }
}
