//! Protocol errors

use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors that can occur while driving the module
///
/// Results are stored by the dispatcher for later polling, so the error is
/// `Clone` and carries transport failures as text rather than `io::Error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EspError {
    /// No terminal token before the deadline
    #[error("Command timed out")]
    Timeout,

    /// Module answered with a failure token
    #[error("Module replied {0}")]
    DeviceError(String),

    /// A command is outstanding or the module reported busy
    #[error("Busy: a command is outstanding or the module reported busy")]
    Busy,

    /// Every connection slot is in use
    #[error("No free connection slot")]
    TableFull,

    /// Malformed `+IPD` header or oversized line
    #[error("Malformed frame: {0}")]
    ParseDesync(String),

    /// Module restarted mid-command
    #[error("Module restarted while a command was outstanding")]
    WatchdogReset,

    /// Bounded lock wait expired
    #[error("Could not acquire engine lock")]
    LockFailure,

    /// Serial or transmit failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation needs an active connection
    #[error("Connection {0} is not active")]
    NotActive(ConnectionId),

    /// Id outside the connection table
    #[error("Invalid connection id {0}")]
    InvalidConnection(u8),

    /// Refused while in transparent passthrough
    #[error("Transparent transfer is active")]
    TransferActive,

    /// Argument rejected before sending
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reply could not be parsed
    #[error("Invalid response from module: {0}")]
    InvalidResponse(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),
}
