//! Event delivery
//!
//! Callbacks never get access to the engine. Follow-up work they want done is
//! recorded in [`Actions`] and started by the engine once the callback has
//! returned and no command is pending.

use std::collections::VecDeque;
use tracing::{trace, warn};

use super::Event;
use crate::config::DeliveryMode;
use crate::connection::{ConnectionId, ConnectionType};

/// Application event handler
pub type EventCallback = Box<dyn FnMut(&Event<'_>, &mut Actions) + Send>;

/// Work requested from inside an event callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a connection
    Open {
        /// Transport type
        kind: ConnectionType,
        /// Remote host
        host: String,
        /// Remote port
        port: u16,
    },
    /// Send a payload
    Send {
        /// Target link
        conn: ConnectionId,
        /// Payload bytes
        data: Vec<u8>,
    },
    /// Close a connection
    Close {
        /// Target link
        conn: ConnectionId,
    },
    /// Close every active connection
    CloseAll,
    /// Scan for access points
    Scan,
    /// Ping a host
    Ping {
        /// Host name or address
        host: String,
    },
    /// Fetch the SNTP time
    SntpTime,
    /// Issue a raw command
    Raw {
        /// Command text without the line terminator
        command: String,
    },
}

/// FIFO of requested actions
#[derive(Debug, Default)]
pub struct Actions {
    queue: VecDeque<Action>,
}

impl Actions {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an action
    pub fn push(&mut self, action: Action) {
        self.queue.push_back(action);
    }

    /// Queue an open
    pub fn open(&mut self, kind: ConnectionType, host: impl Into<String>, port: u16) {
        self.push(Action::Open {
            kind,
            host: host.into(),
            port,
        });
    }

    /// Queue a send
    pub fn send(&mut self, conn: ConnectionId, data: impl Into<Vec<u8>>) {
        self.push(Action::Send {
            conn,
            data: data.into(),
        });
    }

    /// Queue a close
    pub fn close(&mut self, conn: ConnectionId) {
        self.push(Action::Close { conn });
    }

    /// Queue a close of every active link
    pub fn close_all(&mut self) {
        self.push(Action::CloseAll);
    }

    /// Queue a scan
    pub fn scan(&mut self) {
        self.push(Action::Scan);
    }

    /// Queue a ping
    pub fn ping(&mut self, host: impl Into<String>) {
        self.push(Action::Ping { host: host.into() });
    }

    /// Queue an SNTP time query
    pub fn sntp_time(&mut self) {
        self.push(Action::SntpTime);
    }

    /// Queue a raw command
    pub fn raw(&mut self, command: impl Into<String>) {
        self.push(Action::Raw {
            command: command.into(),
        });
    }

    /// Queued actions
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Nothing queued
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<Action> {
        self.queue.pop_front()
    }

    /// Run `action` before anything already queued
    pub(crate) fn push_front(&mut self, action: Action) {
        self.queue.push_front(action);
    }
}

/// Routes events to the callback now or later
pub struct EventDispatcher {
    mode: DeliveryMode,
    callback: Option<EventCallback>,
    queue: VecDeque<Event<'static>>,
    limit: usize,
    dropped: u64,
}

impl EventDispatcher {
    /// Dispatcher with a queue bounded by `limit`
    pub fn new(mode: DeliveryMode, limit: usize) -> Self {
        Self {
            mode,
            callback: None,
            queue: VecDeque::new(),
            limit: limit.max(1),
            dropped: 0,
        }
    }

    /// Current delivery mode
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Install the event callback
    pub fn set_callback(&mut self, callback: EventCallback) {
        self.callback = Some(callback);
    }

    /// Remove the callback; events are queued
    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /// Deliver or queue `event`
    ///
    /// Without a callback, events are queued in either mode so they can be
    /// collected with [`take_events`](EventDispatcher::take_events).
    pub fn emit(&mut self, event: Event<'_>, actions: &mut Actions) {
        trace!("event {}", event.name());
        if self.mode == DeliveryMode::Immediate {
            if let Some(callback) = self.callback.as_mut() {
                callback(&event, actions);
                return;
            }
        }
        self.enqueue(event.into_owned());
    }

    fn enqueue(&mut self, event: Event<'static>) {
        if self.queue.len() >= self.limit {
            if let Some(oldest) = self.queue.pop_front() {
                self.dropped += 1;
                warn!("event queue full, dropped {}", oldest.name());
            }
        }
        self.queue.push_back(event);
    }

    /// Hand queued events to the callback in order. Returns how many were delivered.
    pub fn drain(&mut self, actions: &mut Actions) -> usize {
        let Some(callback) = self.callback.as_mut() else {
            return 0;
        };
        let mut delivered = 0;
        while let Some(event) = self.queue.pop_front() {
            callback(&event, actions);
            delivered += 1;
        }
        delivered
    }

    /// Remove and return every queued event
    pub fn take_events(&mut self) -> Vec<Event<'static>> {
        self.queue.drain(..).collect()
    }

    /// Events waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("mode", &self.mode)
            .field("has_callback", &self.callback.is_some())
            .field("queued", &self.queue.len())
            .field("dropped", &self.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<Event<'static>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: EventCallback = Box::new(move |event: &Event<'_>, _: &mut Actions| {
            sink.lock().unwrap().push(event.clone().into_owned());
        });
        (callback, seen)
    }

    #[test]
    fn test_immediate_delivery() {
        let mut d = EventDispatcher::new(DeliveryMode::Immediate, 8);
        let (callback, seen) = recorder();
        d.set_callback(callback);
        let mut actions = Actions::new();

        d.emit(Event::WifiConnected, &mut actions);
        assert_eq!(seen.lock().unwrap().as_slice(), &[Event::WifiConnected]);
        assert_eq!(d.queued(), 0);
    }

    #[test]
    fn test_deferred_delivery_is_fifo() {
        let mut d = EventDispatcher::new(DeliveryMode::Deferred, 8);
        let (callback, seen) = recorder();
        d.set_callback(callback);
        let mut actions = Actions::new();

        d.emit(Event::WifiConnected, &mut actions);
        d.emit(Event::WifiGotIp, &mut actions);
        assert!(seen.lock().unwrap().is_empty());

        assert_eq!(d.drain(&mut actions), 2);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[Event::WifiConnected, Event::WifiGotIp]
        );
    }

    #[test]
    fn test_queue_limit_drops_oldest() {
        let mut d = EventDispatcher::new(DeliveryMode::Deferred, 2);
        let mut actions = Actions::new();
        d.emit(Event::WifiConnected, &mut actions);
        d.emit(Event::WifiGotIp, &mut actions);
        d.emit(Event::Idle, &mut actions);
        assert_eq!(d.dropped(), 1);
        assert_eq!(d.take_events(), vec![Event::WifiGotIp, Event::Idle]);
    }

    #[test]
    fn test_callback_records_actions() {
        let mut d = EventDispatcher::new(DeliveryMode::Immediate, 8);
        d.set_callback(Box::new(|event: &Event<'_>, actions: &mut Actions| {
            if let Event::ConnectionActive { conn, .. } = event {
                actions.send(*conn, b"GET / HTTP/1.1\r\n\r\n".to_vec());
            }
        }));
        let mut actions = Actions::new();
        d.emit(
            Event::ConnectionActive {
                conn: ConnectionId(1),
                role: crate::connection::Role::Client,
            },
            &mut actions,
        );
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions.pop(),
            Some(Action::Send { conn: ConnectionId(1), .. })
        ));
    }
}
