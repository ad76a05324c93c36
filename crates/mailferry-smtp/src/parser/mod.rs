//! Incremental SMTP reply framer.
//!
//! SMTP replies are line-oriented: every line matches
//! `^(\d{3})([ -])(.*)$`, where `-` marks a continuation line and a space
//! marks the final line of a reply group. The framer segments the incoming
//! byte stream into complete groups, carrying partial lines and partial
//! groups across feeds so that any split of the same bytes yields the same
//! sequence of replies.
//!
//! Line terminators are any of CR, LF, or CRLF. A single feed may yield
//! several complete groups (e.g. the server answered pipelined commands in
//! one segment), returned in wire order.

use crate::types::{Reply, ReplyCode};

/// Upper bound on a single reply line, to keep a misbehaving server from
/// growing the line buffer without limit.
const MAX_LINE_LENGTH: usize = 4096;

/// Stateful SMTP reply parser.
///
/// Feed it raw bytes as they arrive; it returns every reply group completed
/// by that feed. Malformed lines are logged and skipped rather than
/// aborting the stream.
#[derive(Debug, Default)]
pub struct ReplyParser {
    line: Vec<u8>,
    last_was_cr: bool,
    group: Option<PartialGroup>,
}

#[derive(Debug)]
struct PartialGroup {
    code: u16,
    lines: Vec<String>,
}

impl ReplyParser {
    /// Creates a new parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a segment of the byte stream, returning the reply groups it
    /// completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Reply> {
        let mut complete = Vec::new();

        for &byte in bytes {
            match byte {
                b'\r' => {
                    self.last_was_cr = true;
                    self.end_line(&mut complete);
                }
                b'\n' => {
                    // The LF of a CRLF pair; the CR already ended the line.
                    if self.last_was_cr {
                        self.last_was_cr = false;
                    } else {
                        self.end_line(&mut complete);
                    }
                }
                _ => {
                    self.last_was_cr = false;
                    if self.line.len() < MAX_LINE_LENGTH {
                        self.line.push(byte);
                    } else {
                        tracing::warn!("reply line exceeds {MAX_LINE_LENGTH} bytes, truncating");
                    }
                }
            }
        }

        complete
    }

    /// Discards any partial line or group, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.line.clear();
        self.last_was_cr = false;
        self.group = None;
    }

    fn end_line(&mut self, complete: &mut Vec<Reply>) {
        if self.line.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.line);

        let Some((code, is_last, text)) = split_reply_line(&line) else {
            tracing::warn!(
                line = %String::from_utf8_lossy(&line),
                "malformed reply line from server"
            );
            return;
        };

        let group = self.group.get_or_insert_with(|| PartialGroup {
            code,
            lines: Vec::new(),
        });
        if group.code != code {
            tracing::debug!(
                expected = group.code,
                got = code,
                "reply code changed inside a multi-line group"
            );
        }
        group.lines.push(text);

        if is_last {
            let group = self.group.take().unwrap_or(PartialGroup {
                code,
                lines: Vec::new(),
            });
            complete.push(Reply::new(ReplyCode::new(group.code), group.lines));
        }
    }
}

/// Splits one reply line into `(code, is-last-line, trimmed text)`.
///
/// Returns `None` when the line does not match `^(\d{3})([ -])(.*)$`.
fn split_reply_line(line: &[u8]) -> Option<(u16, bool, String)> {
    if line.len() < 4 {
        return None;
    }
    let digits = &line[0..3];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let is_last = match line[3] {
        b' ' => true,
        b'-' => false,
        _ => return None,
    };
    let code = digits
        .iter()
        .fold(0u16, |acc, &d| acc * 10 + u16::from(d - b'0'));
    let text = String::from_utf8_lossy(&line[4..]).trim().to_string();
    Some((code, is_last, text))
}
