//! Connection, server and ping operations

use super::{unexpected, Engine};
use crate::connection::{ConnectionId, ConnectionType};
use crate::event::Action;
use crate::protocol::{command_builder, CommandOutput, CommandTicket, EspError};

impl Engine {
    /// Open a link on the lowest free slot
    ///
    /// Fails with [`EspError::TableFull`] without touching the table when
    /// every slot is in use. The slot is `Opening` until `<id>,CONNECT`.
    pub fn start_open(
        &mut self,
        kind: ConnectionType,
        host: &str,
        port: u16,
    ) -> Result<CommandTicket, EspError> {
        let id = self.connections.free_slot().ok_or(EspError::TableFull)?;
        let ticket = self.issue(command_builder::connect(id, kind, host, port)?)?;
        self.connections.begin_open(id, kind, host, port)?;
        Ok(ticket)
    }

    /// Open a connection and wait until it is active
    pub fn open(
        &mut self,
        kind: ConnectionType,
        host: &str,
        port: u16,
    ) -> Result<ConnectionId, EspError> {
        match self.blocking(|e| e.start_open(kind, host, port))? {
            CommandOutput::Connection(id) => Ok(id),
            other => Err(unexpected(other)),
        }
    }

    fn require_active(&self, conn: ConnectionId) -> Result<(), EspError> {
        match self.connections.get(conn) {
            None => Err(EspError::InvalidConnection(conn.0)),
            Some(c) if !c.is_active() => Err(EspError::NotActive(conn)),
            Some(_) => Ok(()),
        }
    }

    /// Send `data` on an active link
    ///
    /// Payloads larger than the configured chunk size go out as consecutive
    /// `AT+CIPSEND` rounds under one ticket.
    pub fn start_send(
        &mut self,
        conn: ConnectionId,
        data: impl Into<Vec<u8>>,
    ) -> Result<CommandTicket, EspError> {
        self.require_active(conn)?;
        let request = command_builder::send(conn, data.into(), self.config.max_send_chunk)?;
        self.issue(request)
    }

    /// Returns the number of bytes confirmed
    pub fn send(&mut self, conn: ConnectionId, data: impl Into<Vec<u8>>) -> Result<usize, EspError> {
        let data = data.into();
        match self.blocking(move |e| e.start_send(conn, data))? {
            CommandOutput::Sent(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    /// Close an active link; the slot is freed once the module confirms
    pub fn start_close(&mut self, conn: ConnectionId) -> Result<CommandTicket, EspError> {
        self.require_active(conn)?;
        let ticket = self.issue(command_builder::close(conn))?;
        self.connections.begin_close(conn)?;
        Ok(ticket)
    }

    /// Close a connection and wait for the module
    pub fn close(&mut self, conn: ConnectionId) -> Result<(), EspError> {
        self.blocking(|e| e.start_close(conn)).map(drop)
    }

    /// Queue a close for every active link. Returns how many were queued.
    pub fn start_close_all(&mut self) -> usize {
        let active = self.connections.active_ids();
        for id in &active {
            self.actions.push(Action::Close { conn: *id });
        }
        self.run_actions();
        active.len()
    }

    /// Close every active link in turn, stopping at the first failure
    pub fn close_all(&mut self) -> Result<(), EspError> {
        for id in self.connections.active_ids() {
            self.close(id)?;
        }
        Ok(())
    }

    /// Accept incoming links on `port`
    pub fn start_server(&mut self, port: u16) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::server_enable(port)?)
    }

    /// Start the TCP server on `port`
    pub fn enable_server(&mut self, port: u16) -> Result<(), EspError> {
        self.blocking(|e| e.start_server(port)).map(drop)
    }

    /// Stop the TCP server
    pub fn start_stop_server(&mut self) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::server_disable())
    }

    /// Stop the TCP server and wait
    pub fn disable_server(&mut self) -> Result<(), EspError> {
        self.blocking(|e| e.start_stop_server()).map(drop)
    }

    /// Idle timeout for server-side links in seconds
    pub fn start_set_server_timeout(&mut self, seconds: u16) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::server_timeout(seconds)?)
    }

    /// Set the server idle timeout in seconds
    pub fn set_server_timeout(&mut self, seconds: u16) -> Result<(), EspError> {
        self.blocking(|e| e.start_set_server_timeout(seconds))
            .map(drop)
    }

    /// Ping `host`; the round trip is also raised as a ping-result event
    pub fn start_ping(&mut self, host: &str) -> Result<CommandTicket, EspError> {
        self.issue(command_builder::ping(host)?)
    }

    /// Round trip time in milliseconds
    pub fn ping(&mut self, host: &str) -> Result<u32, EspError> {
        match self.blocking(|e| e.start_ping(host))? {
            CommandOutput::PingTime(ms) => Ok(ms),
            other => Err(unexpected(other)),
        }
    }
}
