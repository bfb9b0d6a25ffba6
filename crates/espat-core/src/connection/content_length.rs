//! Content-length detection for header-bearing payloads

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Where a header-bearing payload ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadFraming {
    /// Bytes up to and including the blank line after the headers
    pub header_len: usize,
    /// Declared body length
    pub content_length: usize,
}

impl PayloadFraming {
    /// Total size of headers plus body
    pub fn total_len(&self) -> usize {
        self.header_len.saturating_add(self.content_length)
    }
}

fn content_length_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|\r\n)content-length[ \t]*:[ \t]*(\d+)[ \t]*\r\n")
            .expect("content-length pattern is valid")
    })
}

/// Inspect the first bytes of a payload for an HTTP-style header block
///
/// Returns `None` unless both a `Content-Length` header and the blank line that
/// ends the header block are present in `data`.
pub fn detect_framing(data: &[u8]) -> Option<PayloadFraming> {
    let header_end = find(data, b"\r\n\r\n")? + 4;
    let headers = &data[..header_end];

    let caps = content_length_re().captures(headers)?;
    let digits = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?;
    let content_length = digits.parse::<usize>().ok()?;

    Some(PayloadFraming {
        header_len: header_end,
        content_length,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
