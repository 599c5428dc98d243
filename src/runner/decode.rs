// ABOUTME: Turns raw pipe reads into clean text, one stream at a time.
// ABOUTME: Holds back split UTF-8 characters and unfinished escape sequences until the next read.

use super::ansi::{ANSI_ESCAPE, strip_ansi};

/// Longest unfinished escape sequence held back before it is passed through as text.
const MAX_PENDING_ESCAPE: usize = 256;

/// Incremental decoder for one output stream.
///
/// Concatenating everything `push` and `finish` return gives the same text as
/// decoding and stripping the whole stream at once.
#[derive(Debug, Default)]
pub struct OutputDecoder {
    bytes: Vec<u8>,
    escape: String,
}

impl OutputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next read, returning the text that is complete so far.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.bytes.extend_from_slice(chunk);
        let mut text = std::mem::take(&mut self.escape);
        text.push_str(&take_utf8(&mut self.bytes));

        match pending_escape_start(&text) {
            Some(start) => {
                self.escape = text.split_off(start);
                strip_ansi(&text)
            }
            None => strip_ansi(&text),
        }
    }

    /// Flush whatever is still held back once the stream has ended.
    pub fn finish(&mut self) -> String {
        let mut text = std::mem::take(&mut self.escape);
        text.push_str(&String::from_utf8_lossy(&self.bytes));
        self.bytes.clear();
        strip_ansi(&text)
    }
}

/// Drain the longest decodable prefix of `bytes`, leaving an incomplete trailing character.
fn take_utf8(bytes: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut rest: &[u8] = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(invalid) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[invalid..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }
    let consumed = bytes.len() - rest.len();
    bytes.drain(..consumed);
    text
}

/// Byte offset of an escape sequence at the end of `text` that has not finished yet.
fn pending_escape_start(text: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = text[from..].find('\x1b') {
        let start = from + offset;
        if text.len() - start <= MAX_PENDING_ESCAPE && is_escape_prefix(&text[start..]) {
            return Some(start);
        }
        from = match ANSI_ESCAPE.find_at(text, start) {
            Some(m) if m.start() == start => m.end(),
            _ => start + 1,
        };
    }
    None
}

/// Whether `tail` (starting with ESC) could still grow into a complete sequence.
fn is_escape_prefix(tail: &str) -> bool {
    let body = &tail[1..];
    match body.chars().next() {
        None => true,
        Some('[') => body[1..].chars().all(|c| (' '..='?').contains(&c)),
        Some(']') => {
            let rest = &body[1..];
            let rest = rest.strip_suffix('\x1b').unwrap_or(rest);
            !rest.contains(['\x07', '\x1b'])
        }
        Some(_) => false,
    }
}
