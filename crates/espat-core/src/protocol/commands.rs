//! Protocol commands
//!
//! Defines the commands the engine issues and how each one completes.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::response::Terminal;
use super::LINE_END;
use crate::config::TimeoutConfig;
use crate::connection::ConnectionId;
use crate::wifi::{AccessPoint, AddressInfo, SntpConfig, StationInfo, TransferMode, WifiMode};

/// Commands understood by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// `AT`
    Probe,
    /// `ATE0`
    EchoOff,
    /// `AT+RST`
    Reset,
    /// `AT+CIPMUX`
    SetMux,
    /// `AT+CIPDINFO`
    SetRemoteInfo,
    /// `AT+CWMODE`
    SetWifiMode(WifiMode),
    /// `AT+CWJAP`
    Join,
    /// `AT+CWQAP`
    Leave,
    /// `AT+CWLAP`
    ListAccessPoints,
    /// `AT+CIFSR`
    QueryAddresses,
    /// `AT+CWSAP`
    ConfigureSoftAp,
    /// `AT+CWLIF`
    ListStations,
    /// `AT+CIPSTART`
    Connect(ConnectionId),
    /// `AT+CIPSEND=<id>,<len>` followed by the payload
    Send(ConnectionId),
    /// `AT+CIPCLOSE`
    Close(ConnectionId),
    /// `AT+CIPSERVER=1,<port>`
    ServerEnable(u16),
    /// `AT+CIPSERVER=0`
    ServerDisable,
    /// `AT+CIPSTO`
    ServerTimeout,
    /// `AT+PING`
    Ping,
    /// `AT+CIPSNTPCFG?`
    SntpGetConfig,
    /// `AT+CIPSNTPCFG=...`
    SntpSetConfig,
    /// `AT+CIPSNTPTIME?`
    SntpGetTime,
    /// `AT+CIPMODE`
    SetTransferMode(TransferMode),
    /// `AT+CIPSEND` without arguments (enter passthrough)
    TransparentStart,
    /// `+++` (leave passthrough)
    TransparentStop,
    /// Free-form command
    Raw,
}

/// Success and failure tokens for one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSet {
    /// Tokens that resolve the command successfully
    pub success: &'static [Terminal],
    /// Tokens that fail it
    pub failure: &'static [Terminal],
}

impl TerminalSet {
    /// `Some(true)` on success, `Some(false)` on failure, `None` if `terminal`
    /// does not end this command
    pub fn resolve(&self, terminal: Terminal) -> Option<bool> {
        if self.success.contains(&terminal) {
            Some(true)
        } else if self.failure.contains(&terminal) {
            Some(false)
        } else {
            None
        }
    }
}

const DEFAULT_TERMINALS: TerminalSet = TerminalSet {
    success: &[Terminal::Ok],
    failure: &[Terminal::Error, Terminal::Fail, Terminal::Busy],
};

const SEND_TERMINALS: TerminalSet = TerminalSet {
    success: &[Terminal::SendOk],
    failure: &[Terminal::SendFail, Terminal::Error, Terminal::Busy],
};

const RESET_TERMINALS: TerminalSet = TerminalSet {
    success: &[Terminal::Ready],
    failure: &[Terminal::Error, Terminal::Busy],
};

const TRANSPARENT_START_TERMINALS: TerminalSet = TerminalSet {
    success: &[Terminal::Prompt],
    failure: &[Terminal::Error, Terminal::Busy],
};

const NO_TERMINALS: TerminalSet = TerminalSet {
    success: &[],
    failure: &[],
};

impl CommandKind {
    /// Connection the command acts on
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            CommandKind::Connect(id) | CommandKind::Send(id) | CommandKind::Close(id) => Some(*id),
            _ => None,
        }
    }

    /// Deadline for this command class
    pub fn timeout_ms(&self, timeouts: &TimeoutConfig) -> u64 {
        match self {
            CommandKind::Reset => timeouts.reset,
            CommandKind::Join => timeouts.join,
            CommandKind::ListAccessPoints => timeouts.scan,
            CommandKind::Connect(_) => timeouts.connect,
            CommandKind::Send(_) => timeouts.send,
            CommandKind::Close(_) => timeouts.close,
            CommandKind::Ping => timeouts.ping,
            CommandKind::SntpGetTime => timeouts.sntp,
            CommandKind::TransparentStop => timeouts.transparent_guard,
            _ => timeouts.command,
        }
    }

    /// Tokens that end this command
    pub fn terminals(&self) -> TerminalSet {
        match self {
            CommandKind::Send(_) => SEND_TERMINALS,
            CommandKind::Reset => RESET_TERMINALS,
            CommandKind::TransparentStart => TRANSPARENT_START_TERMINALS,
            CommandKind::TransparentStop => NO_TERMINALS,
            _ => DEFAULT_TERMINALS,
        }
    }

    /// The module gives no reply; the command succeeds when its deadline passes
    pub fn completes_on_deadline(&self) -> bool {
        matches!(self, CommandKind::TransparentStop)
    }

    /// The module answers with a `>` prompt before the command completes
    pub fn expects_prompt(&self) -> bool {
        matches!(self, CommandKind::Send(_) | CommandKind::TransparentStart)
    }

    /// Output slot filled while response lines arrive
    pub fn initial_output(&self) -> CommandOutput {
        match self {
            CommandKind::ListAccessPoints => CommandOutput::AccessPoints(Vec::new()),
            CommandKind::ListStations => CommandOutput::Stations(Vec::new()),
            CommandKind::QueryAddresses => CommandOutput::Addresses(AddressInfo::default()),
            CommandKind::Connect(id) => CommandOutput::Connection(*id),
            CommandKind::Send(_) => CommandOutput::Sent(0),
            CommandKind::Raw => CommandOutput::Lines(Vec::new()),
            _ => CommandOutput::None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Value produced by a successful command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommandOutput {
    #[default]
    /// No value
    None,
    /// Scan results
    AccessPoints(Vec<AccessPoint>),
    /// Attached stations
    Stations(Vec<StationInfo>),
    /// Local addresses
    Addresses(AddressInfo),
    /// Ping round trip in milliseconds
    PingTime(u32),
    /// SNTP settings
    SntpConfig(SntpConfig),
    /// Module time
    SntpTime(NaiveDateTime),
    /// Slot claimed by an open
    Connection(ConnectionId),
    /// Payload bytes confirmed with `SEND OK`
    Sent(usize),
    /// Unclassified lines of a raw command
    Lines(Vec<String>),
}

/// Chunked payload of an `AT+CIPSEND` workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendProgress {
    data: Vec<u8>,
    offset: usize,
    chunk_len: usize,
    max_chunk: usize,
}

impl SendProgress {
    /// `max_chunk` of zero is treated as one
    pub fn new(data: Vec<u8>, max_chunk: usize) -> Self {
        let max_chunk = max_chunk.max(1);
        let chunk_len = data.len().min(max_chunk);
        Self {
            data,
            offset: 0,
            chunk_len,
            max_chunk,
        }
    }

    /// Bytes of the chunk announced by the last `AT+CIPSEND`
    pub fn current_chunk(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.chunk_len]
    }

    /// Length of the chunk in flight
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Mark the current chunk confirmed. Returns true if more remain.
    pub fn advance(&mut self) -> bool {
        self.offset += self.chunk_len;
        self.chunk_len = (self.data.len() - self.offset).min(self.max_chunk);
        self.chunk_len > 0
    }

    /// Bytes confirmed so far
    pub fn sent(&self) -> usize {
        self.offset
    }

    /// Payload length
    pub fn total(&self) -> usize {
        self.data.len()
    }
}

/// A command ready to be issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command class
    pub kind: CommandKind,
    /// Exact bytes to transmit
    pub bytes: Vec<u8>,
    /// Overrides the class timeout
    pub timeout_ms: Option<u64>,
    /// Payload for a send workflow
    pub send: Option<SendProgress>,
}

impl Request {
    /// Command line terminated with `\r\n`
    pub fn new(kind: CommandKind, text: impl Into<String>) -> Self {
        let mut bytes = text.into().into_bytes();
        bytes.extend_from_slice(LINE_END.as_bytes());
        Self {
            kind,
            bytes,
            timeout_ms: None,
            send: None,
        }
    }

    /// Bytes sent as-is, without a line terminator
    pub fn bare(kind: CommandKind, bytes: &[u8]) -> Self {
        Self {
            kind,
            bytes: bytes.to_vec(),
            timeout_ms: None,
            send: None,
        }
    }

    /// Override the class timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Attach a payload to send after the prompt
    pub fn with_send(mut self, send: SendProgress) -> Self {
        self.send = Some(send);
        self
    }

    /// Command text without the terminator, as the module echoes it
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim_end().to_string()
    }
}

/// Handle for collecting the result of a non-blocking operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandTicket(pub u32);

impl fmt::Display for CommandTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the caller waits for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// The caller drives the update loop until completion
    Blocking,
    /// The caller polls with its ticket
    Polled,
}
