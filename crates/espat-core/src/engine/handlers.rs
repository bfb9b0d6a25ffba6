//! Token handling
//!
//! Applies parser output to the dispatcher, the connection table and the
//! status snapshot, and raises the matching events.

use std::borrow::Cow;
use tracing::{debug, info, trace, warn};

use super::Engine;
use crate::connection::{ConnectionId, ConnectionState};
use crate::event::Event;
use crate::protocol::response::{self, classify, Response, Terminal};
use crate::protocol::{command_builder, CommandKind, CommandOutput, Completion, EspError, Token};
use crate::wifi::TransferMode;

impl Engine {
    pub(super) fn handle_token(&mut self, token: Token) {
        match token {
            Token::Line(line) => self.handle_line(&line),
            Token::Prompt => self.handle_prompt(),
            Token::FrameStart { id, len } => self.begin_frame(id, len),
            Token::Payload { byte, last, .. } => self.frame_payload(byte, last),
            Token::Desync(reason) => {
                self.frame_target = None;
                let error = EspError::ParseDesync(reason);
                self.events
                    .emit(Event::ParseError { error }, &mut self.actions);
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        if self.dispatcher.is_echo(line) {
            trace!("echo: {line}");
            return;
        }

        let response = classify(line);
        if let Some(terminal) = response.terminal() {
            if terminal == Terminal::Ready {
                self.on_ready();
            } else {
                self.on_terminal(terminal);
            }
            return;
        }

        match response {
            Response::WifiConnected => {
                info!("wifi connected");
                self.status.station_connected = true;
                self.status.has_ip = false;
                self.dhcp_deadline = Some(self.clock.deadline(self.config.timeouts.dhcp));
                self.events.emit(Event::WifiConnected, &mut self.actions);
            }
            Response::WifiGotIp => {
                info!("wifi got ip");
                self.status.has_ip = true;
                self.dhcp_deadline = None;
                self.events.emit(Event::WifiGotIp, &mut self.actions);
            }
            Response::WifiDisconnect => {
                info!("wifi disconnected");
                self.status.station_connected = false;
                self.status.has_ip = false;
                self.status.addresses.station_ip = None;
                self.dhcp_deadline = None;
                self.events.emit(Event::WifiDisconnected, &mut self.actions);
            }
            Response::Connect(raw) => match self.connections.id(raw) {
                Ok(id) => {
                    if let Some(role) = self.connections.on_connect(id) {
                        self.events
                            .emit(Event::ConnectionActive { conn: id, role }, &mut self.actions);
                    }
                }
                Err(_) => warn!("CONNECT for unknown link {raw}"),
            },
            Response::Closed(raw) => match self.connections.id(raw) {
                Ok(id) => {
                    if self.connections.mark_closed(id) {
                        self.events
                            .emit(Event::ConnectionClosed { conn: id }, &mut self.actions);
                    } else {
                        trace!("CLOSED for untracked link {id}");
                    }
                }
                Err(_) => warn!("CLOSED for unknown link {raw}"),
            },
            Response::ConnectFail(raw) => debug!("link {raw} failed to connect"),
            Response::AlreadyConnected => debug!("link already connected"),
            Response::StationConnected(mac) => {
                info!("station {mac} joined");
                self.events
                    .emit(Event::StationJoined { mac }, &mut self.actions);
            }
            Response::StationDisconnected(mac) => {
                info!("station {mac} left");
                self.events.emit(Event::StationLeft { mac }, &mut self.actions);
            }
            Response::Recv(n) => trace!("module accepted {n} bytes"),
            Response::PingTime(ms) => self.collect(line, |kind, output| {
                if kind == CommandKind::Ping {
                    *output = CommandOutput::PingTime(ms);
                }
                Ok(())
            }),
            Response::Info { tag, body } => self.handle_info(line, &tag, &body),
            Response::Other(text) => self.collect(line, |kind, output| {
                if let (CommandKind::ListStations, CommandOutput::Stations(list)) = (kind, output) {
                    list.push(response::parse_station(&text)?);
                }
                Ok(())
            }),
            // Terminals were handled above
            _ => {}
        }
    }

    /// Apply a response line to the pending command's output
    ///
    /// Raw commands collect every such line verbatim.
    fn collect<F>(&mut self, line: &str, apply: F)
    where
        F: FnOnce(CommandKind, &mut CommandOutput) -> Result<(), EspError>,
    {
        let Some(pending) = self.dispatcher.pending_mut() else {
            trace!("unsolicited: {line}");
            return;
        };
        if let CommandOutput::Lines(lines) = &mut pending.output {
            lines.push(line.to_string());
            return;
        }
        if let Err(e) = apply(pending.kind, &mut pending.output) {
            warn!("ignoring unparseable line {line:?}: {e}");
        }
    }

    fn handle_info(&mut self, line: &str, tag: &str, body: &str) {
        let pending_kind = self.dispatcher.pending().map(|p| p.kind);

        // Join failure reasons also raise an event
        if tag == "CWJAP" && pending_kind == Some(CommandKind::Join) {
            if let Some(reason) = response::parse_join_failure(body) {
                warn!("join failed: {reason:?}");
                self.status.last_join_failure = Some(reason);
                self.events
                    .emit(Event::WifiJoinFailed { reason }, &mut self.actions);
            }
            return;
        }

        self.collect(line, |kind, output| {
            match (tag, kind, output) {
                ("CWLAP", CommandKind::ListAccessPoints, CommandOutput::AccessPoints(list)) => {
                    list.push(response::parse_access_point(body)?);
                }
                ("CIFSR", CommandKind::QueryAddresses, CommandOutput::Addresses(info)) => {
                    response::parse_cifsr(body, info)?;
                }
                ("CIPSNTPCFG", CommandKind::SntpGetConfig, output) => {
                    *output = CommandOutput::SntpConfig(response::parse_sntp_config(body)?);
                }
                ("CIPSNTPTIME", CommandKind::SntpGetTime, output) => {
                    *output = CommandOutput::SntpTime(response::parse_sntp_time(body)?);
                }
                _ => trace!("info line +{tag}"),
            }
            Ok(())
        });
    }

    fn handle_prompt(&mut self) {
        self.parser.expect_prompt(false);
        let Some(pending) = self.dispatcher.pending() else {
            return;
        };

        match pending.kind {
            CommandKind::Send(id) => {
                let sent = match pending.send.as_ref() {
                    Some(progress) => {
                        trace!("sending {} bytes on link {id}", progress.chunk_len());
                        self.transport.transmit(progress.current_chunk())
                    }
                    None => Ok(()),
                };
                if let Err(e) = sent {
                    if let Some(done) = self.dispatcher.fail_pending(e) {
                        self.on_completion(done);
                    }
                }
            }
            CommandKind::TransparentStart => {
                if let Some(done) = self.dispatcher.complete(Terminal::Prompt) {
                    self.on_completion(done);
                }
            }
            _ => trace!("unexpected prompt"),
        }
    }

    fn begin_frame(&mut self, raw: u8, len: usize) {
        self.frame_target = match self.connections.id(raw) {
            Ok(id) if self.connections.begin_frame(id, len) => Some(id),
            _ => {
                warn!("discarding {len} byte frame for inactive link {raw}");
                None
            }
        };
        if len == 0 {
            self.frame_target = None;
        }
    }

    fn frame_payload(&mut self, byte: u8, last: bool) {
        if let Some(id) = self.frame_target {
            let full = self.connections.push_payload(id, byte);
            if full || last {
                self.flush_connection(id);
            }
        }
        if last {
            self.frame_target = None;
        }
    }

    /// Raise a data event over the connection's buffered bytes
    fn flush_connection(&mut self, id: ConnectionId) {
        let Some(chunk) = self.connections.on_data_frame(id) else {
            return;
        };
        if let Some(conn) = self.connections.get(id) {
            let event = Event::DataReceived {
                conn: id,
                data: Cow::Borrowed(conn.pending_data()),
                first: chunk.first,
                content_length: chunk.framing.map(|f| f.content_length),
            };
            self.events.emit(event, &mut self.actions);
        }
        self.connections.clear_pending(id);
    }

    /// Ready banner: the module restarted
    fn on_ready(&mut self) {
        let outstanding = self.dispatcher.pending().map(|p| p.kind);
        match outstanding {
            Some(CommandKind::Reset) => {
                info!("module restarted");
                self.reset_module_state();
                self.events.emit(Event::ModuleReady, &mut self.actions);
                if let Some(done) = self.dispatcher.complete(Terminal::Ready) {
                    self.on_completion(done);
                }
            }
            Some(kind) => {
                warn!("module restarted while {kind} was outstanding");
                self.events.emit(Event::WatchdogReset, &mut self.actions);
                self.reset_module_state();
                if let Some(done) = self.dispatcher.fail_pending(EspError::WatchdogReset) {
                    self.on_completion(done);
                }
            }
            None => {
                info!("module ready");
                self.reset_module_state();
                self.events.emit(Event::ModuleReady, &mut self.actions);
            }
        }
    }

    /// Forget everything the module lost in a restart
    fn reset_module_state(&mut self) {
        self.frame_target = None;
        self.passthrough = false;
        self.dhcp_deadline = None;
        self.status.station_connected = false;
        self.status.has_ip = false;
        self.status.addresses = Default::default();
        self.status.server_port = None;
        self.status.transfer_mode = TransferMode::Normal;

        for id in self.connections.reset() {
            self.events
                .emit(Event::ConnectionClosed { conn: id }, &mut self.actions);
        }
    }

    fn on_terminal(&mut self, terminal: Terminal) {
        if terminal == Terminal::SendOk && self.continue_send() {
            return;
        }
        match self.dispatcher.complete(terminal) {
            Some(done) => self.on_completion(done),
            None => debug!("{} with no matching command", terminal.as_str()),
        }
    }

    /// Account for a confirmed chunk and announce the next one. Returns true
    /// while the send workflow continues.
    fn continue_send(&mut self) -> bool {
        let now = self.clock.now();
        let (id, confirmed, next_len) = {
            let Some(pending) = self.dispatcher.pending_mut() else {
                return false;
            };
            let CommandKind::Send(id) = pending.kind else {
                return false;
            };
            let Some(progress) = pending.send.as_mut() else {
                return false;
            };

            self.connections.record_sent(id, progress.chunk_len());
            let more = progress.advance();
            let confirmed = progress.sent();
            let next_len = progress.chunk_len();
            pending.output = CommandOutput::Sent(confirmed);
            if !more {
                return false;
            }
            (id, confirmed, next_len)
        };

        self.dispatcher.rearm(now);
        let header = command_builder::send_header(id, next_len);
        debug!("link {id}: {confirmed} bytes confirmed, next chunk {next_len}");
        let sent = self.transport.transmit(&header.bytes);

        match sent {
            Ok(()) => self.parser.expect_prompt(true),
            Err(e) => {
                if let Some(done) = self.dispatcher.fail_pending(e) {
                    self.on_completion(done);
                }
            }
        }
        true
    }

    /// Apply the side effects of a finished command
    pub(super) fn on_completion(&mut self, done: Completion) {
        self.parser.expect_prompt(false);
        let Completion {
            ticket,
            kind,
            result,
            ..
        } = done;

        match (&kind, &result) {
            (CommandKind::Connect(id), Ok(_)) => {
                if self.connections.get(*id).map(|c| c.state()) == Some(ConnectionState::Opening)
                {
                    if let Some(role) = self.connections.on_connect(*id) {
                        self.events
                            .emit(Event::ConnectionActive { conn: *id, role }, &mut self.actions);
                    }
                }
            }
            (CommandKind::Connect(id), Err(EspError::Timeout)) => self.on_connection_timeout(*id),
            (CommandKind::Connect(id), Err(_)) => {
                if self.connections.get(*id).map(|c| c.state()) == Some(ConnectionState::Opening)
                {
                    self.connections.mark_closed(*id);
                }
            }
            (CommandKind::Send(id), Ok(output)) => {
                let len = match output {
                    CommandOutput::Sent(n) => *n,
                    _ => 0,
                };
                self.events
                    .emit(Event::DataSent { conn: *id, len }, &mut self.actions);
            }
            (CommandKind::Send(id), Err(e)) => {
                self.events
                    .emit(Event::DataSendError { conn: *id }, &mut self.actions);
                if *e == EspError::Timeout {
                    self.on_connection_timeout(*id);
                }
            }
            // The module answers ERROR when the link is already gone
            (CommandKind::Close(id), Ok(_)) | (CommandKind::Close(id), Err(EspError::DeviceError(_))) => {
                if self.connections.mark_closed(*id) {
                    self.events
                        .emit(Event::ConnectionClosed { conn: *id }, &mut self.actions);
                }
            }
            (CommandKind::Close(id), Err(EspError::Timeout)) => self.on_connection_timeout(*id),
            (CommandKind::Close(id), Err(_)) => self.connections.cancel_close(*id),
            (CommandKind::SetWifiMode(mode), Ok(_)) => self.status.mode = Some(*mode),
            (CommandKind::Join, Ok(_)) => self.status.last_join_failure = None,
            (CommandKind::Leave, Ok(_)) => {
                self.status.station_connected = false;
                self.status.has_ip = false;
                self.status.addresses.station_ip = None;
                self.dhcp_deadline = None;
            }
            (CommandKind::ListAccessPoints, Ok(CommandOutput::AccessPoints(list))) => {
                let access_points = list.clone();
                self.events
                    .emit(Event::ScanResult { access_points }, &mut self.actions);
            }
            (CommandKind::QueryAddresses, Ok(CommandOutput::Addresses(info))) => {
                self.status.addresses = info.clone();
            }
            (CommandKind::ServerEnable(port), Ok(_)) => self.status.server_port = Some(*port),
            (CommandKind::ServerDisable, Ok(_)) => self.status.server_port = None,
            (CommandKind::Ping, Ok(CommandOutput::PingTime(ms))) => {
                self.events
                    .emit(Event::PingResult { time_ms: *ms }, &mut self.actions);
            }
            (CommandKind::SntpGetTime, Ok(CommandOutput::SntpTime(time))) => {
                self.events
                    .emit(Event::SntpTime { time: *time }, &mut self.actions);
            }
            (CommandKind::SetTransferMode(mode), Ok(_)) => self.status.transfer_mode = *mode,
            (CommandKind::TransparentStart, Ok(_)) => {
                info!("transparent transfer started");
                self.passthrough = true;
            }
            (CommandKind::TransparentStop, Ok(_)) => {
                info!("transparent transfer stopped");
                self.passthrough = false;
            }
            _ => {}
        }

        self.advance_workflow(ticket, &result);

        if self.is_idle() {
            self.events.emit(Event::Idle, &mut self.actions);
        }
    }

    /// A connection-scoped command expired: step its link toward `Closed`
    fn on_connection_timeout(&mut self, id: ConnectionId) {
        let before = self.connections.get(id).map(|c| c.state());
        let after = self.connections.advance_toward_closed(id);
        warn!("link {id} timed out ({before:?} -> {after:?})");
        self.events
            .emit(Event::ConnectionTimeout { conn: id }, &mut self.actions);

        match (before, after) {
            (Some(ConnectionState::Closing), Some(ConnectionState::Closed)) => {
                self.events
                    .emit(Event::ConnectionClosed { conn: id }, &mut self.actions);
            }
            (
                Some(ConnectionState::Opening | ConnectionState::Active),
                Some(ConnectionState::Closing),
            ) => {
                if let Err(e) = self.issue(command_builder::close(id)) {
                    warn!("could not close link {id}: {e}");
                    if self.connections.mark_closed(id) {
                        self.events
                            .emit(Event::ConnectionClosed { conn: id }, &mut self.actions);
                    }
                }
            }
            _ => {}
        }
    }
}
