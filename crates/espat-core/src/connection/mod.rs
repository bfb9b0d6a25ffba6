//! Connection table
//!
//! Maps the module's small numeric link ids to application-visible state.

mod content_length;
mod table;

pub use content_length::{detect_framing, PayloadFraming};
pub use table::{ConnectionTable, DataChunk};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Module link id (0..capacity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u8);

impl ConnectionId {
    /// Slot index into the table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side opened the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Opened by us with `AT+CIPSTART`
    Client,
    /// Accepted by the module's server
    Server,
}

/// Transport protocol of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// TLS over TCP
    Ssl,
}

impl ConnectionType {
    /// Name used in `AT+CIPSTART`
    pub fn as_at_str(&self) -> &'static str {
        match self {
            ConnectionType::Tcp => "TCP",
            ConnectionType::Udp => "UDP",
            ConnectionType::Ssl => "SSL",
        }
    }
}

/// Lifecycle of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Free
    Closed,
    /// `AT+CIPSTART` issued, waiting for `<id>,CONNECT`
    Opening,
    /// Link is up
    Active,
    /// `AT+CIPCLOSE` issued, waiting for `<id>,CLOSED`
    Closing,
}

/// One virtual connection record
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    role: Role,
    kind: ConnectionType,
    remote_host: String,
    remote_port: u16,
    /// Declared length of the `+IPD` frame being received
    frame_len: usize,
    /// Bytes received so far in the current `+IPD` frame
    frame_received: usize,
    total_received: u64,
    total_sent: u64,
    framing: Option<PayloadFraming>,
    /// Bytes of the current logical payload seen so far
    payload_received: usize,
    first_packet: bool,
    /// Open timed out; the slot is held until the module confirms the close
    aborted: bool,
    /// Payload bytes not yet handed to the application
    pending: Vec<u8>,
}

impl Connection {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Closed,
            role: Role::Client,
            kind: ConnectionType::Tcp,
            remote_host: String::new(),
            remote_port: 0,
            frame_len: 0,
            frame_received: 0,
            total_received: 0,
            total_sent: 0,
            framing: None,
            payload_received: 0,
            first_packet: false,
            aborted: false,
            pending: Vec::new(),
        }
    }

    /// Slot id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Who opened the link
    pub fn role(&self) -> Role {
        self.role
    }

    /// Transport type
    pub fn kind(&self) -> ConnectionType {
        self.kind
    }

    /// Remote host as given to `AT+CIPSTART`
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// Remote port
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Bytes received in the current `+IPD` frame
    pub fn frame_received(&self) -> usize {
        self.frame_received
    }

    /// Declared length of the current `+IPD` frame
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Bytes received over the lifetime of the link; never decreases
    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    /// Bytes confirmed sent with `SEND OK`
    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    /// Content length detected for the current logical payload
    pub fn content_length(&self) -> Option<usize> {
        self.framing.map(|f| f.content_length)
    }

    /// Framing detected for the current logical payload
    pub fn framing(&self) -> Option<PayloadFraming> {
        self.framing
    }

    /// True until the first data chunk after activation is delivered
    pub fn is_first_packet_pending(&self) -> bool {
        self.first_packet
    }

    /// Buffered payload awaiting delivery
    pub fn pending_data(&self) -> &[u8] {
        &self.pending
    }

    /// Closing a link whose open timed out
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Link is up
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }

    /// Slot is free
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }
}
