//! Transparent (passthrough) transfer
//!
//! With `AT+CIPMODE=1` and a single link open, `AT+CIPSEND` without
//! arguments switches the UART into a raw pipe. The module leaves it when it
//! sees `+++` surrounded by at least a second of silence; it does not answer,
//! so the stop command completes once the guard time has passed.

use tracing::trace;

use super::Engine;
use crate::protocol::{command_builder, CommandTicket, EspError};
use crate::wifi::TransferMode;

impl Engine {
    /// Switch between normal and transparent transfer
    pub fn start_set_transfer_mode(&mut self, mode: TransferMode) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::set_transfer_mode(mode))
    }

    /// Switch transfer mode and wait
    pub fn set_transfer_mode(&mut self, mode: TransferMode) -> Result<(), EspError> {
        self.blocking(|e| e.start_set_transfer_mode(mode)).map(drop)
    }

    /// Enter passthrough; resolves on the `>` prompt
    ///
    /// From then on every received byte is raised as
    /// [`Event::TransparentReceived`](crate::event::Event::TransparentReceived).
    pub fn start_transparent(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::transparent_start())
    }

    /// Enter transparent passthrough and wait
    pub fn transparent(&mut self) -> Result<(), EspError> {
        self.blocking(|e| e.start_transparent()).map(drop)
    }

    /// True while inbound bytes bypass the parser
    pub fn is_transparent(&self) -> bool {
        self.passthrough
    }

    /// Write raw bytes while in passthrough
    pub fn transparent_send(&mut self, data: &[u8]) -> Result<(), EspError> {
        if !self.passthrough {
            return Err(EspError::InvalidArgument(
                "transparent transfer is not active".to_string(),
            ));
        }
        trace!("passthrough {} bytes", data.len());
        self.transport.transmit(data)
    }

    /// Send `+++`; the caller must have kept the line quiet for the guard time
    pub fn start_stop_transparent(&mut self) -> Result<CommandTicket, EspError> {
        if !self.passthrough {
            return Err(EspError::InvalidArgument(
                "transparent transfer is not active".to_string(),
            ));
        }
        self.issue(command_builder::transparent_stop())
    }

    /// Leave transparent passthrough and wait
    pub fn stop_transparent(&mut self) -> Result<(), EspError> {
        self.blocking(|e| e.start_stop_transparent()).map(drop)
    }
}
