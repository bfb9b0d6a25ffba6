//! Incremental frame parser
//!
//! Splits the module's output into line tokens and `+IPD` binary frames. The
//! parser consumes one byte at a time and keeps all partial state between
//! calls, so the tokens produced never depend on how the input was chunked.
//!
//! Recognised frame headers:
//! - `+IPD,<id>,<len>:` (multiple connections)
//! - `+IPD,<id>,<len>,<ip>,<port>:` (with remote info enabled)
//! - `+IPD,<len>:` (single connection, reported as id 0)

use tracing::{trace, warn};

const FRAME_MARKER: &[u8] = b"+IPD,";

/// Longest header (after `+IPD,`) accepted before it is treated as garbage
const MAX_HEADER_LEN: usize = 64;

/// Longest text line kept; longer lines are dropped
const MAX_LINE_LEN: usize = 1024;

/// Parser output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A complete non-empty text line without its terminator
    Line(String),
    /// The `>` send prompt
    Prompt,
    /// A frame header was accepted
    FrameStart {
        /// Link id from the header
        id: u8,
        /// Declared payload length
        len: usize,
    },
    /// One payload byte of the current frame
    Payload {
        /// Link id of the frame
        id: u8,
        /// The byte itself
        byte: u8,
        /// Final byte of the frame
        last: bool,
    },
    /// Malformed input was discarded
    Desync(String),
}

/// Externally visible parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Collecting a line
    ScanLine,
    /// Reading a `+IPD` header
    AwaitFrameHeader,
    /// Reading frame payload bytes
    ConsumeFramePayload,
    /// Discarding input up to the next line end
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderField {
    Id,
    Len,
    Extra,
}

#[derive(Debug, Clone, Copy)]
struct Header {
    field: HeaderField,
    id: usize,
    len: usize,
    digits: usize,
    consumed: usize,
}

impl Header {
    fn new() -> Self {
        Self {
            field: HeaderField::Id,
            id: 0,
            len: 0,
            digits: 0,
            consumed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    ScanLine,
    AwaitFrameHeader(Header),
    ConsumeFramePayload { id: u8, remaining: usize },
    Resync,
}

/// Resumable tokenizer for the module's output
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: State,
    line: Vec<u8>,
    max_connections: usize,
    max_frame_len: usize,
    prompt_expected: bool,
    after_prompt: bool,
}

impl FrameParser {
    /// Create a parser accepting ids below `max_connections` and frames up to
    /// `max_frame_len` bytes
    pub fn new(max_connections: usize, max_frame_len: usize) -> Self {
        Self {
            state: State::ScanLine,
            line: Vec::with_capacity(64),
            max_connections,
            max_frame_len,
            prompt_expected: false,
            after_prompt: false,
        }
    }

    /// Current state
    pub fn state(&self) -> ParserState {
        match self.state {
            State::ScanLine => ParserState::ScanLine,
            State::AwaitFrameHeader(_) => ParserState::AwaitFrameHeader,
            State::ConsumeFramePayload { .. } => ParserState::ConsumeFramePayload,
            State::Resync => ParserState::Resync,
        }
    }

    /// Recognise a bare `>` at the start of a line as the send prompt
    pub fn expect_prompt(&mut self, expected: bool) {
        self.prompt_expected = expected;
    }

    /// Whether a bare `>` is treated as the prompt
    pub fn is_prompt_expected(&self) -> bool {
        self.prompt_expected
    }

    /// Drop any partial token
    pub fn reset(&mut self) {
        self.state = State::ScanLine;
        self.line.clear();
        self.after_prompt = false;
    }

    /// Feed one byte
    pub fn push(&mut self, byte: u8) -> Option<Token> {
        match self.state {
            State::ScanLine => self.scan_line(byte),
            State::AwaitFrameHeader(header) => self.frame_header(header, byte),
            State::ConsumeFramePayload { id, remaining } => {
                let remaining = remaining - 1;
                self.state = if remaining == 0 {
                    State::ScanLine
                } else {
                    State::ConsumeFramePayload { id, remaining }
                };
                Some(Token::Payload {
                    id,
                    byte,
                    last: remaining == 0,
                })
            }
            State::Resync => {
                if byte == b'\n' {
                    trace!("parser resynchronised");
                    self.state = State::ScanLine;
                }
                None
            }
        }
    }

    fn scan_line(&mut self, byte: u8) -> Option<Token> {
        match byte {
            b'\r' => None,
            b'\n' => {
                self.after_prompt = false;
                if self.line.is_empty() {
                    return None;
                }
                let text = String::from_utf8_lossy(&self.line).trim_end().to_string();
                self.line.clear();
                if text.is_empty() {
                    None
                } else {
                    trace!("line: {text}");
                    Some(Token::Line(text))
                }
            }
            b'>' if self.line.is_empty() && self.prompt_expected => {
                self.after_prompt = true;
                trace!("prompt");
                Some(Token::Prompt)
            }
            b' ' if self.line.is_empty() && self.after_prompt => None,
            _ => {
                self.after_prompt = false;
                if self.line.len() >= MAX_LINE_LEN {
                    self.line.clear();
                    return self.desync("line too long".to_string(), byte);
                }
                self.line.push(byte);
                if self.line == FRAME_MARKER {
                    self.line.clear();
                    self.state = State::AwaitFrameHeader(Header::new());
                }
                None
            }
        }
    }

    fn frame_header(&mut self, mut header: Header, byte: u8) -> Option<Token> {
        header.consumed += 1;
        if header.consumed > MAX_HEADER_LEN {
            return self.desync("frame header too long".to_string(), byte);
        }

        match (header.field, byte) {
            (HeaderField::Id, b'0'..=b'9') | (HeaderField::Len, b'0'..=b'9')
                if header.digits >= 6 =>
            {
                self.desync("frame header field too long".to_string(), byte)
            }
            (HeaderField::Id, b'0'..=b'9') => {
                header.id = header.id * 10 + (byte - b'0') as usize;
                header.digits += 1;
                self.state = State::AwaitFrameHeader(header);
                None
            }
            (HeaderField::Id, b',') if header.digits > 0 => {
                if header.id >= self.max_connections {
                    return self.desync(format!("connection id {} out of range", header.id), byte);
                }
                header.field = HeaderField::Len;
                header.digits = 0;
                self.state = State::AwaitFrameHeader(header);
                None
            }
            // Single-connection form: the only field is the length
            (HeaderField::Id, b':') if header.digits > 0 => {
                let len = header.id;
                self.start_frame(0, len, byte)
            }
            (HeaderField::Len, b'0'..=b'9') => {
                header.len = header.len * 10 + (byte - b'0') as usize;
                header.digits += 1;
                self.state = State::AwaitFrameHeader(header);
                None
            }
            (HeaderField::Len, b',') if header.digits > 0 => {
                header.field = HeaderField::Extra;
                self.state = State::AwaitFrameHeader(header);
                None
            }
            (HeaderField::Len, b':') if header.digits > 0 => {
                self.start_frame(header.id, header.len, byte)
            }
            (HeaderField::Extra, b':') => self.start_frame(header.id, header.len, byte),
            (HeaderField::Extra, b'\r' | b'\n') => {
                self.desync("frame header interrupted by line end".to_string(), byte)
            }
            (HeaderField::Extra, _) => {
                self.state = State::AwaitFrameHeader(header);
                None
            }
            (field, other) => self.desync(
                format!("unexpected byte {other:#04x} in {field:?} field of frame header"),
                byte,
            ),
        }
    }

    fn start_frame(&mut self, id: usize, len: usize, byte: u8) -> Option<Token> {
        if len > self.max_frame_len {
            return self.desync(format!("frame length {len} exceeds maximum"), byte);
        }
        // `id` was range checked when its field ended, or is 0
        let id = id as u8;
        self.state = if len == 0 {
            State::ScanLine
        } else {
            State::ConsumeFramePayload { id, remaining: len }
        };
        trace!("frame start: id={id} len={len}");
        Some(Token::FrameStart { id, len })
    }

    fn desync(&mut self, reason: String, byte: u8) -> Option<Token> {
        warn!("parse desync: {reason}");
        self.line.clear();
        self.state = if byte == b'\n' {
            State::ScanLine
        } else {
            State::Resync
        };
        Some(Token::Desync(reason))
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(super::MAX_CONNECTIONS, super::MAX_FRAME_LEN)
    }
}
