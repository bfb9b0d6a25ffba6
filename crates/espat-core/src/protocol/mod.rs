//! AT Command Protocol
//!
//! Implements the textual AT command set spoken by ESP8266-class WiFi
//! co-processors, including the `+IPD` binary data frames interleaved with
//! line responses.

pub mod command_builder;
pub mod commands;
mod dispatcher;
mod error;
pub mod parser;
pub mod response;
pub mod serial;
mod transport;

pub use commands::{
    CallMode, CommandKind, CommandOutput, CommandTicket, Request, SendProgress, TerminalSet,
};
pub use dispatcher::{Completion, Dispatcher, PendingCommand};
pub use error::EspError;
pub use parser::{FrameParser, ParserState, Token};
pub use response::{Response, Terminal};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, PortInfo, SerialTransport};
pub use transport::Transmit;

/// Default baud rate of the module's UART
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for plain commands in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Number of link ids the module multiplexes
pub const MAX_CONNECTIONS: usize = 5;

/// Largest payload accepted by one `AT+CIPSEND`
pub const MAX_SEND_CHUNK: usize = 2048;

/// Largest `+IPD` frame length accepted before treating the header as garbage
pub const MAX_FRAME_LEN: usize = 4096;

/// Line terminator appended to every command
pub const LINE_END: &str = "\r\n";
