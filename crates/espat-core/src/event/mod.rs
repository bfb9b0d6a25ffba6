//! Asynchronous events
//!
//! Everything the module reports outside of a command's direct result reaches
//! the application as an [`Event`]. Data events borrow the connection buffer
//! they were assembled in and are copied only when queued for later delivery.

mod dispatcher;

pub use dispatcher::{Action, Actions, EventCallback, EventDispatcher};

use chrono::NaiveDateTime;
use std::borrow::Cow;

use crate::connection::{ConnectionId, Role};
use crate::protocol::EspError;
use crate::wifi::{AccessPoint, JoinFailure};

/// Event raised by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Event<'a> {
    /// Ready banner with no command outstanding
    ModuleReady,
    /// Ready banner while a command was outstanding
    WatchdogReset,
    /// `WIFI CONNECTED`
    WifiConnected,
    /// `WIFI GOT IP`
    WifiGotIp,
    /// `WIFI DISCONNECT`
    WifiDisconnected,
    /// Join rejected with a reason code
    WifiJoinFailed {
        /// Reason reported by the module
        reason: JoinFailure,
    },
    /// No address was assigned in time after joining
    DhcpTimeout,
    /// A station attached to the soft AP
    StationJoined {
        /// Station MAC
        mac: String,
    },
    /// A station left the soft AP
    StationLeft {
        /// Station MAC
        mac: String,
    },
    /// Link is up
    ConnectionActive {
        /// Link slot
        conn: ConnectionId,
        /// Client for `AT+CIPSTART`, server for incoming links
        role: Role,
    },
    /// Link closed and its slot freed
    ConnectionClosed {
        /// Link slot
        conn: ConnectionId,
    },
    /// A connection-scoped command expired
    ConnectionTimeout {
        /// Link slot
        conn: ConnectionId,
    },
    /// Payload bytes for a link
    DataReceived {
        /// Link slot
        conn: ConnectionId,
        /// Payload bytes
        data: Cow<'a, [u8]>,
        /// First data since the connection became active
        first: bool,
        /// Detected length of the payload body this data belongs to
        content_length: Option<usize>,
    },
    /// Send completed
    DataSent {
        /// Link slot
        conn: ConnectionId,
        /// Bytes confirmed
        len: usize,
    },
    /// Send failed
    DataSendError {
        /// Link slot
        conn: ConnectionId,
    },
    /// Scan finished
    ScanResult {
        /// Access points found
        access_points: Vec<AccessPoint>,
    },
    /// Ping reply
    PingResult {
        /// Round trip in milliseconds
        time_ms: u32,
    },
    /// Module time
    SntpTime {
        /// Local time reported by the module
        time: NaiveDateTime,
    },
    /// Bytes received while in transparent transfer
    TransparentReceived {
        /// Raw bytes
        data: Cow<'a, [u8]>,
    },
    /// Malformed input was discarded
    ParseError {
        /// Always [`EspError::ParseDesync`]
        error: EspError,
    },
    /// A queued action could not be started
    ActionFailed {
        /// Why it was refused
        error: EspError,
    },
    /// No command pending and no queued work
    Idle,
}

impl Event<'_> {
    /// Copy any borrowed data so the event can outlive the parse step
    pub fn into_owned(self) -> Event<'static> {
        match self {
            Event::ModuleReady => Event::ModuleReady,
            Event::WatchdogReset => Event::WatchdogReset,
            Event::WifiConnected => Event::WifiConnected,
            Event::WifiGotIp => Event::WifiGotIp,
            Event::WifiDisconnected => Event::WifiDisconnected,
            Event::WifiJoinFailed { reason } => Event::WifiJoinFailed { reason },
            Event::DhcpTimeout => Event::DhcpTimeout,
            Event::StationJoined { mac } => Event::StationJoined { mac },
            Event::StationLeft { mac } => Event::StationLeft { mac },
            Event::ConnectionActive { conn, role } => Event::ConnectionActive { conn, role },
            Event::ConnectionClosed { conn } => Event::ConnectionClosed { conn },
            Event::ConnectionTimeout { conn } => Event::ConnectionTimeout { conn },
            Event::DataReceived {
                conn,
                data,
                first,
                content_length,
            } => Event::DataReceived {
                conn,
                data: Cow::Owned(data.into_owned()),
                first,
                content_length,
            },
            Event::DataSent { conn, len } => Event::DataSent { conn, len },
            Event::DataSendError { conn } => Event::DataSendError { conn },
            Event::ScanResult { access_points } => Event::ScanResult { access_points },
            Event::PingResult { time_ms } => Event::PingResult { time_ms },
            Event::SntpTime { time } => Event::SntpTime { time },
            Event::TransparentReceived { data } => Event::TransparentReceived {
                data: Cow::Owned(data.into_owned()),
            },
            Event::ParseError { error } => Event::ParseError { error },
            Event::ActionFailed { error } => Event::ActionFailed { error },
            Event::Idle => Event::Idle,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Event::ModuleReady => "module-ready",
            Event::WatchdogReset => "watchdog-reset",
            Event::WifiConnected => "wifi-connected",
            Event::WifiGotIp => "wifi-got-ip",
            Event::WifiDisconnected => "wifi-disconnected",
            Event::WifiJoinFailed { .. } => "wifi-join-failed",
            Event::DhcpTimeout => "dhcp-timeout",
            Event::StationJoined { .. } => "station-joined",
            Event::StationLeft { .. } => "station-left",
            Event::ConnectionActive { .. } => "connection-active",
            Event::ConnectionClosed { .. } => "connection-closed",
            Event::ConnectionTimeout { .. } => "connection-timeout",
            Event::DataReceived { .. } => "data-received",
            Event::DataSent { .. } => "data-sent",
            Event::DataSendError { .. } => "data-send-error",
            Event::ScanResult { .. } => "scan-result",
            Event::PingResult { .. } => "ping-result",
            Event::SntpTime { .. } => "sntp-time",
            Event::TransparentReceived { .. } => "transparent-received",
            Event::ParseError { .. } => "parse-error",
            Event::ActionFailed { .. } => "action-failed",
            Event::Idle => "idle",
        }
    }

    /// Connection the event concerns
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Event::ConnectionActive { conn, .. }
            | Event::ConnectionClosed { conn }
            | Event::ConnectionTimeout { conn }
            | Event::DataReceived { conn, .. }
            | Event::DataSent { conn, .. }
            | Event::DataSendError { conn } => Some(*conn),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_owned_copies_data() {
        let buffer = b"ABCDE".to_vec();
        let borrowed = Event::DataReceived {
            conn: ConnectionId(0),
            data: Cow::Borrowed(&buffer[..]),
            first: true,
            content_length: None,
        };
        let owned = borrowed.into_owned();
        drop(buffer);

        match owned {
            Event::DataReceived { data, first, .. } => {
                assert!(matches!(data, Cow::Owned(_)));
                assert_eq!(&data[..], b"ABCDE");
                assert!(first);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_connection_lookup() {
        assert_eq!(
            Event::ConnectionClosed {
                conn: ConnectionId(3)
            }
            .connection(),
            Some(ConnectionId(3))
        );
        assert_eq!(Event::Idle.connection(), None);
        assert_eq!(Event::WifiGotIp.name(), "wifi-got-ip");
    }
}
