//! Protocol engine
//!
//! Owns every piece of protocol state and is driven by [`Engine::update`].
//! Each operation comes as a non-blocking `start_*` call that returns a
//! [`CommandTicket`] and a blocking wrapper that drives `update` until the
//! ticket resolves.
//!
//! ```rust,ignore
//! use espat_core::prelude::*;
//!
//! let (producer, rx) = rx_buffer(4096);
//! let transport = SerialTransport::open("/dev/ttyUSB0", 115200, producer)?;
//! let clock = Clock::new();
//! let _ticker = clock.spawn_ticker(std::time::Duration::from_millis(1));
//!
//! let mut engine = Engine::new(
//!     EngineConfig::default(),
//!     Platform { transport: Box::new(transport), rx, clock },
//! )?;
//! engine.initialize()?;
//! engine.join("HomeNet", "secret")?;
//! let conn = engine.open(ConnectionType::Tcp, "example.com", 80)?;
//! engine.send(conn, b"GET / HTTP/1.0\r\n\r\n".to_vec())?;
//! ```

mod handlers;
mod net;
mod sntp;
mod transfer;
mod wifi;

use std::borrow::Cow;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::buffer::RxConsumer;
use crate::clock::{Clock, Deadline};
use crate::config::EngineConfig;
use crate::connection::{Connection, ConnectionId, ConnectionTable};
use crate::event::{Action, Actions, Event, EventDispatcher};
use crate::protocol::{
    command_builder, CallMode, CommandOutput, CommandTicket, Dispatcher, EspError, FrameParser,
    PendingCommand, Request, Transmit,
};
use crate::wifi::WifiStatus;

fn unexpected(output: CommandOutput) -> EspError {
    EspError::InvalidResponse(format!("unexpected output {output:?}"))
}

/// Capabilities the host provides to the engine
pub struct Platform {
    /// Outbound byte path
    pub transport: Box<dyn Transmit>,
    /// Consumer half of the receive buffer the serial input feeds
    pub rx: RxConsumer,
    /// Millisecond clock advanced by the host
    pub clock: Clock,
}

/// Multi-command sequence resolved under one ticket
#[derive(Debug)]
struct Workflow {
    ticket: CommandTicket,
    /// Ticket of the step currently in flight
    step: CommandTicket,
    remaining: VecDeque<Request>,
}

/// AT-command protocol engine
pub struct Engine {
    config: EngineConfig,
    transport: Box<dyn Transmit>,
    rx: RxConsumer,
    clock: Clock,
    parser: FrameParser,
    dispatcher: Dispatcher,
    connections: ConnectionTable,
    events: EventDispatcher,
    actions: Actions,
    status: WifiStatus,
    dhcp_deadline: Option<Deadline>,
    /// Connection receiving the current `+IPD` frame, if it is tracked
    frame_target: Option<ConnectionId>,
    /// Inbound bytes bypass the parser
    passthrough: bool,
    workflow: Option<Workflow>,
    call_mode: CallMode,
    yield_fn: Box<dyn FnMut() + Send>,
}

impl Engine {
    /// Create an engine over the host `platform`
    pub fn new(config: EngineConfig, platform: Platform) -> Result<Self, EspError> {
        config.validate()?;

        Ok(Self {
            parser: FrameParser::new(config.max_connections, config.max_frame_len),
            dispatcher: Dispatcher::new(),
            connections: ConnectionTable::new(
                config.max_connections,
                config.connection_buffer_size,
                config.content_length,
            ),
            events: EventDispatcher::new(config.delivery, config.event_queue_limit),
            actions: Actions::new(),
            status: WifiStatus::default(),
            dhcp_deadline: None,
            frame_target: None,
            passthrough: false,
            workflow: None,
            call_mode: CallMode::Polled,
            yield_fn: Box::new(std::thread::yield_now),
            transport: platform.transport,
            rx: platform.rx,
            clock: platform.clock,
            config,
        })
    }

    /// Install the application event handler
    pub fn set_event_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&Event<'_>, &mut Actions) + Send + 'static,
    {
        self.events.set_callback(Box::new(callback));
    }

    /// Deliver events to the queue instead
    pub fn clear_event_callback(&mut self) {
        self.events.clear_callback();
    }

    /// Hook run between polls while a blocking call waits
    pub fn set_yield<F>(&mut self, yield_fn: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.yield_fn = Box::new(yield_fn);
    }

    /// Process all buffered input, expire deadlines and start queued actions
    ///
    /// Never blocks. Returns the number of bytes consumed.
    pub fn update(&mut self) -> usize {
        let mut consumed = 0;
        let mut passthrough_data = Vec::new();

        while let Some(byte) = self.rx.pop() {
            consumed += 1;
            if self.passthrough {
                passthrough_data.push(byte);
                continue;
            }
            if let Some(token) = self.parser.push(byte) {
                self.handle_token(token);
            }
        }

        if !passthrough_data.is_empty() {
            let event = Event::TransparentReceived {
                data: Cow::Borrowed(&passthrough_data[..]),
            };
            self.events.emit(event, &mut self.actions);
        }

        self.check_timeouts();
        self.run_actions();
        consumed
    }

    /// Deliver deferred events to the callback, then start any actions it queued
    pub fn process_events(&mut self) -> usize {
        let delivered = self.events.drain(&mut self.actions);
        self.run_actions();
        delivered
    }

    /// Remove queued events without a callback
    pub fn take_events(&mut self) -> Vec<Event<'static>> {
        self.events.take_events()
    }

    /// Queue follow-up work from outside a callback
    pub fn queue_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Collect the result of a non-blocking call, if it has finished
    pub fn poll(&mut self, ticket: CommandTicket) -> Option<Result<CommandOutput, EspError>> {
        self.dispatcher.take_result(ticket)
    }

    /// Drive the update loop until `ticket` resolves
    ///
    /// Relies on the clock advancing (tick source or yield hook) for
    /// deadlines to expire.
    pub fn wait(&mut self, ticket: CommandTicket) -> Result<CommandOutput, EspError> {
        loop {
            self.update();
            if let Some(result) = self.dispatcher.take_result(ticket) {
                return result;
            }
            if !self.is_known_ticket(ticket) {
                return Err(EspError::InvalidArgument(format!("unknown ticket {ticket}")));
            }
            (self.yield_fn)();
        }
    }

    pub(crate) fn is_known_ticket(&self, ticket: CommandTicket) -> bool {
        !self.dispatcher.is_unknown(ticket)
            || self.workflow.as_ref().map(|w| w.ticket) == Some(ticket)
    }

    /// No command pending and nothing queued
    pub fn is_idle(&self) -> bool {
        self.dispatcher.is_idle() && self.workflow.is_none() && self.actions.is_empty()
    }

    /// Outcome of the most recently finished command
    pub fn last_status(&self) -> Option<&Result<(), EspError>> {
        self.dispatcher.last_status()
    }

    /// The command awaiting its terminal token
    pub fn pending_command(&self) -> Option<&PendingCommand> {
        self.dispatcher.pending()
    }

    /// Look up a connection slot
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// All connection slots
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Slots not in `Closed`
    pub fn occupied_connections(&self) -> usize {
        self.connections.occupied()
    }

    /// Last observed WiFi state
    pub fn status(&self) -> &WifiStatus {
        &self.status
    }

    /// Clock the engine reads deadlines from
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Events discarded because the deferred queue was full
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Transmit and record a command
    fn issue(&mut self, request: Request) -> Result<CommandTicket, EspError> {
        if self.passthrough && !request.kind.completes_on_deadline() {
            return Err(EspError::TransferActive);
        }
        let timeout = request
            .timeout_ms
            .unwrap_or_else(|| request.kind.timeout_ms(&self.config.timeouts));
        let expects_prompt = request.kind.expects_prompt();

        let ticket = self.dispatcher.issue(
            request,
            self.transport.as_mut(),
            self.clock.now(),
            timeout,
            self.call_mode,
        )?;
        self.parser.expect_prompt(expects_prompt);
        Ok(ticket)
    }

    /// Run `start` as a blocking call
    fn blocking<F>(&mut self, start: F) -> Result<CommandOutput, EspError>
    where
        F: FnOnce(&mut Self) -> Result<CommandTicket, EspError>,
    {
        self.call_mode = CallMode::Blocking;
        let ticket = start(self);
        self.call_mode = CallMode::Polled;
        self.wait(ticket?)
    }

    /// Issue the first step of `steps` and resolve the returned ticket once
    /// every step has succeeded
    fn start_workflow(&mut self, steps: Vec<Request>) -> Result<CommandTicket, EspError> {
        if self.workflow.is_some() || !self.dispatcher.is_idle() {
            return Err(EspError::Busy);
        }
        let mut remaining: VecDeque<Request> = steps.into();
        let first = remaining
            .pop_front()
            .ok_or_else(|| EspError::InvalidArgument("empty workflow".to_string()))?;

        let step = self.issue(first)?;
        let ticket = self.dispatcher.reserve_ticket();
        self.workflow = Some(Workflow {
            ticket,
            step,
            remaining,
        });
        Ok(ticket)
    }

    /// Move the workflow on after one of its steps finished
    fn advance_workflow(&mut self, step: CommandTicket, result: &Result<CommandOutput, EspError>) {
        if self.workflow.as_ref().map(|w| w.step) != Some(step) {
            return;
        }
        // The step's own result is not collected by anyone
        self.dispatcher.take_result(step);
        let Some(mut workflow) = self.workflow.take() else {
            return;
        };

        let outcome = match result {
            Err(e) => Err(e.clone()),
            Ok(_) => match workflow.remaining.pop_front() {
                None => Ok(CommandOutput::None),
                Some(next) => match self.issue(next) {
                    Ok(next_step) => {
                        workflow.step = next_step;
                        self.workflow = Some(workflow);
                        return;
                    }
                    Err(e) => Err(e),
                },
            },
        };

        debug!("workflow {} finished: {:?}", workflow.ticket, outcome.as_ref().err());
        self.dispatcher.store_result(workflow.ticket, outcome);
    }

    fn check_timeouts(&mut self) {
        let now = self.clock.now();
        if let Some(done) = self.dispatcher.expire(now) {
            self.on_completion(done);
        }

        if let Some(deadline) = self.dhcp_deadline {
            if deadline.is_expired(now) {
                self.dhcp_deadline = None;
                warn!("no IP address {} ms after joining", deadline.timeout_ms);
                self.events.emit(Event::DhcpTimeout, &mut self.actions);
            }
        }
    }

    /// Start queued actions while the dispatcher is free
    fn run_actions(&mut self) {
        while self.dispatcher.is_idle() && self.workflow.is_none() {
            let Some(action) = self.actions.pop() else {
                break;
            };
            if let Err(error) = self.start_action(action) {
                warn!("queued action failed: {error}");
                self.events
                    .emit(Event::ActionFailed { error }, &mut self.actions);
            }
        }
    }

    fn start_action(&mut self, action: Action) -> Result<(), EspError> {
        debug!("starting queued action {action:?}");
        match action {
            Action::Open { kind, host, port } => self.start_open(kind, &host, port).map(drop),
            Action::Send { conn, data } => self.start_send(conn, data).map(drop),
            Action::Close { conn } => self.start_close(conn).map(drop),
            Action::CloseAll => {
                for id in self.connections.active_ids().into_iter().rev() {
                    self.actions.push_front(Action::Close { conn: id });
                }
                Ok(())
            }
            Action::Scan => self.start_scan().map(drop),
            Action::Ping { host } => self.start_ping(&host).map(drop),
            Action::SntpTime => self.start_sntp_time().map(drop),
            Action::Raw { command } => self.start_raw(&command, None).map(drop),
        }
    }

    /// Free-form command completing on `OK` / `ERROR`
    ///
    /// Unclassified lines are returned as [`CommandOutput::Lines`].
    pub fn start_raw(
        &mut self,
        command: &str,
        timeout_ms: Option<u64>,
    ) -> Result<CommandTicket, EspError> {
        let mut request = command_builder::raw(command)?;
        request.timeout_ms = timeout_ms;
        self.issue(request)
    }

    /// Blocking [`start_raw`](Engine::start_raw)
    pub fn raw(&mut self, command: &str, timeout_ms: Option<u64>) -> Result<Vec<String>, EspError> {
        match self.blocking(|e| e.start_raw(command, timeout_ms))? {
            CommandOutput::Lines(lines) => Ok(lines),
            _ => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("parser", &self.parser.state())
            .field("pending", &self.dispatcher.pending().map(|p| p.kind))
            .field("occupied", &self.connections.occupied())
            .field("status", &self.status)
            .field("passthrough", &self.passthrough)
            .finish()
    }
}
