//! Command dispatcher
//!
//! Tracks the single command in flight, matches terminal tokens against it and
//! keeps finished results until their ticket is collected.

use std::collections::VecDeque;
use tracing::{debug, warn};

use super::commands::{
    CallMode, CommandKind, CommandOutput, CommandTicket, Request, SendProgress, TerminalSet,
};
use super::response::Terminal;
use super::{EspError, Transmit};
use crate::clock::Deadline;

/// Finished results kept for polling
const RESULT_SLOTS: usize = 16;

/// The command currently awaiting its terminal token
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Result handle
    pub ticket: CommandTicket,
    /// Command class
    pub kind: CommandKind,
    /// Command line as the module would echo it
    pub text: String,
    /// Tokens that end it
    pub terminals: TerminalSet,
    /// When it expires
    pub deadline: Deadline,
    /// Blocking or polled
    pub mode: CallMode,
    /// Filled in from informational lines while the command runs
    pub output: CommandOutput,
    /// Chunked payload of a send
    pub send: Option<SendProgress>,
}

/// A command that reached a terminal state
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Result handle
    pub ticket: CommandTicket,
    /// Command class
    pub kind: CommandKind,
    /// Blocking or polled
    pub mode: CallMode,
    /// Output or failure
    pub result: Result<CommandOutput, EspError>,
}

/// At-most-one-in-flight command tracker
#[derive(Debug)]
pub struct Dispatcher {
    pending: Option<PendingCommand>,
    next_ticket: u32,
    results: VecDeque<(CommandTicket, Result<CommandOutput, EspError>)>,
    last_status: Option<Result<(), EspError>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Idle dispatcher
    pub fn new() -> Self {
        Self {
            pending: None,
            next_ticket: 1,
            results: VecDeque::with_capacity(RESULT_SLOTS),
            last_status: None,
        }
    }

    /// Command in flight
    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Command in flight, mutable
    pub fn pending_mut(&mut self) -> Option<&mut PendingCommand> {
        self.pending.as_mut()
    }

    /// No command in flight
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Outcome of the most recently finished command
    pub fn last_status(&self) -> Option<&Result<(), EspError>> {
        self.last_status.as_ref()
    }

    /// Transmit `request` and record it as pending
    ///
    /// Fails with [`EspError::Busy`] while another command is outstanding, and
    /// records nothing if the transport rejects the bytes.
    pub fn issue(
        &mut self,
        request: Request,
        transport: &mut dyn Transmit,
        now: u64,
        timeout_ms: u64,
        mode: CallMode,
    ) -> Result<CommandTicket, EspError> {
        if let Some(pending) = &self.pending {
            debug!(
                "refusing {:?}: {} {} still pending",
                request.kind, pending.ticket, pending.kind
            );
            return Err(EspError::Busy);
        }

        transport.transmit(&request.bytes)?;

        let ticket = self.reserve_ticket();

        let text = request.text();
        debug!("issue {ticket} {text} (timeout {timeout_ms} ms)");

        self.pending = Some(PendingCommand {
            ticket,
            kind: request.kind,
            text,
            terminals: request.kind.terminals(),
            deadline: Deadline::new(now, timeout_ms),
            mode,
            output: request.kind.initial_output(),
            send: request.send,
        });
        Ok(ticket)
    }

    /// Line equal to the pending command text (module echo enabled)
    pub fn is_echo(&self, line: &str) -> bool {
        self.pending
            .as_ref()
            .map(|p| !p.text.is_empty() && p.text == line)
            .unwrap_or(false)
    }

    /// Restart the pending command's deadline (next step of a workflow)
    pub fn rearm(&mut self, now: u64) {
        if let Some(pending) = &mut self.pending {
            pending.deadline = Deadline::new(now, pending.deadline.timeout_ms);
        }
    }

    /// Resolve the pending command if `terminal` belongs to its set
    pub fn complete(&mut self, terminal: Terminal) -> Option<Completion> {
        let resolved = self.pending.as_ref()?.terminals.resolve(terminal)?;
        let result = if resolved {
            Ok(())
        } else if terminal == Terminal::Busy {
            Err(EspError::Busy)
        } else {
            Err(EspError::DeviceError(terminal.as_str().to_string()))
        };
        self.finish(result)
    }

    /// Resolve the pending command as timed out if its deadline has passed
    pub fn expire(&mut self, now: u64) -> Option<Completion> {
        let pending = self.pending.as_ref()?;
        if !pending.deadline.is_expired(now) {
            return None;
        }
        if pending.kind.completes_on_deadline() {
            self.finish(Ok(()))
        } else {
            warn!("{} {} timed out", pending.ticket, pending.text);
            self.finish(Err(EspError::Timeout))
        }
    }

    /// Fail the pending command with `error`
    pub fn fail_pending(&mut self, error: EspError) -> Option<Completion> {
        self.pending.as_ref()?;
        self.finish(Err(error))
    }

    /// Finish the pending command with `result`, keeping its collected output
    pub fn finish(&mut self, result: Result<(), EspError>) -> Option<Completion> {
        let pending = self.pending.take()?;
        let result = result.map(|()| pending.output);

        match &result {
            Ok(_) => debug!("complete {} {}", pending.ticket, pending.text),
            Err(e) => debug!("failed {} {}: {e}", pending.ticket, pending.text),
        }

        self.last_status = Some(result.as_ref().map(|_| ()).map_err(|e| e.clone()));
        self.store_result(pending.ticket, result.clone());

        Some(Completion {
            ticket: pending.ticket,
            kind: pending.kind,
            mode: pending.mode,
            result,
        })
    }

    /// Allocate a ticket for a multi-command workflow
    pub fn reserve_ticket(&mut self) -> CommandTicket {
        let ticket = CommandTicket(self.next_ticket);
        self.next_ticket = self.next_ticket.wrapping_add(1).max(1);
        ticket
    }

    /// Record a result for later collection
    pub fn store_result(&mut self, ticket: CommandTicket, result: Result<CommandOutput, EspError>) {
        if self.results.len() == RESULT_SLOTS {
            if let Some((dropped, _)) = self.results.pop_front() {
                debug!("result for {dropped} was never collected");
            }
        }
        self.results.push_back((ticket, result));
    }

    /// Collect a finished result. Returns `None` while it is still pending.
    pub fn take_result(&mut self, ticket: CommandTicket) -> Option<Result<CommandOutput, EspError>> {
        let index = self.results.iter().position(|(t, _)| *t == ticket)?;
        self.results.remove(index).map(|(_, result)| result)
    }

    /// Ticket is neither pending nor holding a result
    pub fn is_unknown(&self, ticket: CommandTicket) -> bool {
        self.pending.as_ref().map(|p| p.ticket) != Some(ticket)
            && !self.results.iter().any(|(t, _)| *t == ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command_builder;
    use crate::wifi::WifiMode;

    struct Sink(Vec<u8>);

    impl Transmit for Sink {
        fn transmit(&mut self, bytes: &[u8]) -> Result<(), EspError> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }
    }

    struct Broken;

    impl Transmit for Broken {
        fn transmit(&mut self, _: &[u8]) -> Result<(), EspError> {
            Err(EspError::Transport("unplugged".into()))
        }
    }

    #[test]
    fn test_issue_and_complete() {
        let mut sink = Sink(Vec::new());
        let mut d = Dispatcher::new();
        let ticket = d
            .issue(
                command_builder::set_wifi_mode(WifiMode::StationAndSoftAp),
                &mut sink,
                0,
                100,
                CallMode::Polled,
            )
            .unwrap();
        assert_eq!(sink.0, b"AT+CWMODE=3\r\n");
        assert!(d.is_echo("AT+CWMODE=3"));

        let done = d.complete(Terminal::Ok).unwrap();
        assert_eq!(done.ticket, ticket);
        assert_eq!(done.result, Ok(CommandOutput::None));
        assert!(d.is_idle());
        assert_eq!(d.take_result(ticket), Some(Ok(CommandOutput::None)));
        assert_eq!(d.take_result(ticket), None);
    }

    #[test]
    fn test_second_issue_is_busy() {
        let mut sink = Sink(Vec::new());
        let mut d = Dispatcher::new();
        let first = d
            .issue(command_builder::probe(), &mut sink, 0, 100, CallMode::Polled)
            .unwrap();
        let before = sink.0.len();

        let second = d.issue(command_builder::leave(), &mut sink, 5, 100, CallMode::Polled);
        assert_eq!(second, Err(EspError::Busy));
        assert_eq!(sink.0.len(), before);

        let pending = d.pending().unwrap();
        assert_eq!(pending.ticket, first);
        assert_eq!(pending.kind, CommandKind::Probe);
        assert_eq!(pending.deadline, Deadline::new(0, 100));
    }

    #[test]
    fn test_transport_failure_records_nothing() {
        let mut d = Dispatcher::new();
        let result = d.issue(command_builder::probe(), &mut Broken, 0, 100, CallMode::Polled);
        assert_eq!(result, Err(EspError::Transport("unplugged".into())));
        assert!(d.is_idle());
    }

    #[test]
    fn test_unrelated_terminal_is_ignored() {
        let mut sink = Sink(Vec::new());
        let mut d = Dispatcher::new();
        d.issue(
            command_builder::send(crate::connection::ConnectionId(0), b"hi".to_vec(), 2048)
                .unwrap(),
            &mut sink,
            0,
            100,
            CallMode::Polled,
        )
        .unwrap();
        assert_eq!(d.complete(Terminal::Ok), None);
        assert!(!d.is_idle());
        let done = d.complete(Terminal::SendFail).unwrap();
        assert_eq!(done.result, Err(EspError::DeviceError("SEND FAIL".into())));
    }

    #[test]
    fn test_timeout_resolves_once() {
        let mut sink = Sink(Vec::new());
        let mut d = Dispatcher::new();
        let ticket = d
            .issue(command_builder::probe(), &mut sink, 10, 100, CallMode::Polled)
            .unwrap();
        assert_eq!(d.expire(109), None);
        let done = d.expire(110).unwrap();
        assert_eq!(done.result, Err(EspError::Timeout));
        assert_eq!(d.expire(500), None);
        assert_eq!(d.complete(Terminal::Ok), None);
        assert_eq!(d.take_result(ticket), Some(Err(EspError::Timeout)));
        assert_eq!(d.last_status(), Some(&Err(EspError::Timeout)));
    }

    #[test]
    fn test_busy_reply_maps_to_busy() {
        let mut sink = Sink(Vec::new());
        let mut d = Dispatcher::new();
        d.issue(command_builder::probe(), &mut sink, 0, 100, CallMode::Blocking)
            .unwrap();
        assert_eq!(d.complete(Terminal::Busy).unwrap().result, Err(EspError::Busy));
    }

    #[test]
    fn test_old_results_are_dropped() {
        let mut sink = Sink(Vec::new());
        let mut d = Dispatcher::new();
        let mut tickets = Vec::new();
        for _ in 0..RESULT_SLOTS + 1 {
            tickets.push(
                d.issue(command_builder::probe(), &mut sink, 0, 100, CallMode::Polled)
                    .unwrap(),
            );
            d.complete(Terminal::Ok);
        }
        assert!(d.is_unknown(tickets[0]));
        assert!(d.take_result(tickets[RESULT_SLOTS]).is_some());
    }
}
