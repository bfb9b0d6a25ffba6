//! Fixed-capacity connection table

use tracing::{debug, trace};

use super::{
    detect_framing, Connection, ConnectionId, ConnectionState, ConnectionType, PayloadFraming,
    Role,
};
use crate::config::ContentLengthPolicy;
use crate::protocol::EspError;

/// Result of handing a buffered chunk to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChunk {
    /// First chunk since the link became active
    pub first: bool,
    /// Framing in force for this chunk, if any was detected
    pub framing: Option<PayloadFraming>,
    /// This chunk reached the end of a framed payload
    pub payload_complete: bool,
}

/// The module's link slots
#[derive(Debug, Clone)]
pub struct ConnectionTable {
    slots: Vec<Connection>,
    buffer_size: usize,
    policy: ContentLengthPolicy,
}

impl ConnectionTable {
    /// Create `capacity` closed slots
    pub fn new(capacity: usize, buffer_size: usize, policy: ContentLengthPolicy) -> Self {
        let capacity = capacity.min(u8::MAX as usize);
        Self {
            slots: (0..capacity)
                .map(|i| Connection::new(ConnectionId(i as u8)))
                .collect(),
            buffer_size: buffer_size.max(1),
            policy,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Validate a raw id reported by the module or passed by the application
    pub fn id(&self, raw: u8) -> Result<ConnectionId, EspError> {
        if (raw as usize) < self.slots.len() {
            Ok(ConnectionId(raw))
        } else {
            Err(EspError::InvalidConnection(raw))
        }
    }

    /// Look up a slot
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots.get(id.index())
    }

    fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.slots.get_mut(id.index())
    }

    /// All slots in id order
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter()
    }

    /// Slots not in `Closed`
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|c| !c.is_closed()).count()
    }

    /// Lowest free slot
    pub fn free_slot(&self) -> Option<ConnectionId> {
        self.slots.iter().find(|c| c.is_closed()).map(|c| c.id)
    }

    /// Ids of links currently up
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        self.slots
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.id)
            .collect()
    }

    /// Claim a free slot for an outgoing connection
    pub fn begin_open(
        &mut self,
        id: ConnectionId,
        kind: ConnectionType,
        host: &str,
        port: u16,
    ) -> Result<(), EspError> {
        let slot = self
            .get_mut(id)
            .ok_or(EspError::InvalidConnection(id.0))?;
        if !slot.is_closed() {
            return Err(EspError::TableFull);
        }

        *slot = Connection::new(id);
        slot.state = ConnectionState::Opening;
        slot.role = Role::Client;
        slot.kind = kind;
        slot.remote_host = host.to_string();
        slot.remote_port = port;
        debug!("connection {id}: opening {} {host}:{port}", kind.as_at_str());
        Ok(())
    }

    /// Handle `<id>,CONNECT`. Returns the role when the slot just became active.
    pub fn on_connect(&mut self, id: ConnectionId) -> Option<Role> {
        let slot = self.get_mut(id)?;
        match slot.state {
            ConnectionState::Opening => {
                slot.state = ConnectionState::Active;
                slot.first_packet = true;
                debug!("connection {id}: active (client)");
                Some(Role::Client)
            }
            ConnectionState::Closed => {
                *slot = Connection::new(id);
                slot.state = ConnectionState::Active;
                slot.role = Role::Server;
                slot.first_packet = true;
                debug!("connection {id}: active (server)");
                Some(Role::Server)
            }
            ConnectionState::Active | ConnectionState::Closing => {
                trace!("connection {id}: duplicate CONNECT ignored");
                None
            }
        }
    }

    /// Move a slot to `Closed`. Returns false if it was already free.
    pub fn mark_closed(&mut self, id: ConnectionId) -> bool {
        let Some(slot) = self.get_mut(id) else {
            return false;
        };
        if slot.is_closed() {
            return false;
        }
        slot.state = ConnectionState::Closed;
        slot.pending.clear();
        slot.framing = None;
        slot.first_packet = false;
        slot.aborted = false;
        debug!("connection {id}: closed");
        true
    }

    /// Start closing an active link
    pub fn begin_close(&mut self, id: ConnectionId) -> Result<(), EspError> {
        let slot = self
            .get_mut(id)
            .ok_or(EspError::InvalidConnection(id.0))?;
        if slot.state != ConnectionState::Active {
            return Err(EspError::NotActive(id));
        }
        slot.state = ConnectionState::Closing;
        debug!("connection {id}: closing");
        Ok(())
    }

    /// Undo [`begin_close`](ConnectionTable::begin_close) when the module
    /// refused the close. A link that never came up stays `Closing`.
    pub fn cancel_close(&mut self, id: ConnectionId) {
        if let Some(slot) = self.get_mut(id) {
            if slot.state == ConnectionState::Closing && !slot.aborted {
                slot.state = ConnectionState::Active;
            }
        }
    }

    /// Step a slot one stage toward `Closed` after a timeout.
    ///
    /// `Opening` and `Active` both go to `Closing`: the module may still hold
    /// the id, so the slot stays taken until the close is confirmed.
    pub fn advance_toward_closed(&mut self, id: ConnectionId) -> Option<ConnectionState> {
        let slot = self.get_mut(id)?;
        match slot.state {
            ConnectionState::Opening | ConnectionState::Active => {
                slot.aborted = slot.state == ConnectionState::Opening;
                slot.state = ConnectionState::Closing;
                debug!("connection {id}: closing after timeout");
                Some(ConnectionState::Closing)
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                self.mark_closed(id);
                Some(ConnectionState::Closed)
            }
        }
    }

    /// Free every slot (module restarted). Returns the ids that were in use.
    pub fn reset(&mut self) -> Vec<ConnectionId> {
        let ids: Vec<ConnectionId> = self
            .slots
            .iter()
            .filter(|c| !c.is_closed())
            .map(|c| c.id)
            .collect();
        for id in &ids {
            self.mark_closed(*id);
        }
        ids
    }

    /// Start of a `+IPD` frame. Returns false if the slot cannot take data.
    pub fn begin_frame(&mut self, id: ConnectionId, len: usize) -> bool {
        match self.get_mut(id) {
            Some(slot)
                if matches!(
                    slot.state,
                    ConnectionState::Active | ConnectionState::Closing
                ) =>
            {
                slot.frame_len = len;
                slot.frame_received = 0;
                true
            }
            _ => false,
        }
    }

    /// Buffer one payload byte. Returns true when the buffer is full.
    pub fn push_payload(&mut self, id: ConnectionId, byte: u8) -> bool {
        let buffer_size = self.buffer_size;
        match self.get_mut(id) {
            Some(slot) => {
                slot.pending.push(byte);
                slot.frame_received += 1;
                slot.pending.len() >= buffer_size
            }
            None => false,
        }
    }

    /// Account for the buffered bytes about to be delivered
    ///
    /// Updates counters, runs content-length detection on the first chunk of a
    /// logical payload, and consumes the first-packet marker. The caller
    /// delivers `pending_data()` and then calls [`clear_pending`].
    ///
    /// [`clear_pending`]: ConnectionTable::clear_pending
    pub fn on_data_frame(&mut self, id: ConnectionId) -> Option<DataChunk> {
        let policy = self.policy;
        let slot = self.get_mut(id)?;
        if slot.pending.is_empty() {
            return None;
        }

        let len = slot.pending.len();
        slot.total_received = slot.total_received.saturating_add(len as u64);
        let first = std::mem::take(&mut slot.first_packet);

        if policy == ContentLengthPolicy::Disabled {
            return Some(DataChunk {
                first,
                framing: None,
                payload_complete: false,
            });
        }

        if slot.framing.is_none() && slot.payload_received == 0 {
            slot.framing = detect_framing(&slot.pending);
            if let Some(framing) = slot.framing {
                debug!(
                    "connection {id}: content length {} (headers {})",
                    framing.content_length, framing.header_len
                );
            }
        }

        slot.payload_received = slot.payload_received.saturating_add(len);
        let framing = slot.framing;
        let payload_complete = framing
            .map(|f| slot.payload_received >= f.total_len())
            .unwrap_or(false);

        if payload_complete || framing.is_none() {
            slot.framing = None;
            slot.payload_received = 0;
        }

        Some(DataChunk {
            first,
            framing,
            payload_complete,
        })
    }

    /// Drop delivered payload bytes
    pub fn clear_pending(&mut self, id: ConnectionId) {
        if let Some(slot) = self.get_mut(id) {
            slot.pending.clear();
        }
    }

    /// Record bytes confirmed by `SEND OK`
    pub fn record_sent(&mut self, id: ConnectionId, len: usize) {
        if let Some(slot) = self.get_mut(id) {
            slot.total_sent = slot.total_sent.saturating_add(len as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ConnectionTable {
        ConnectionTable::new(5, 16, ContentLengthPolicy::HttpHeaders)
    }

    #[test]
    fn test_open_connect_close_lifecycle() {
        let mut t = table();
        let id = t.free_slot().unwrap();
        assert_eq!(id, ConnectionId(0));

        t.begin_open(id, ConnectionType::Tcp, "example.com", 80).unwrap();
        assert_eq!(t.get(id).unwrap().state(), ConnectionState::Opening);
        assert_eq!(t.free_slot(), Some(ConnectionId(1)));

        assert_eq!(t.on_connect(id), Some(Role::Client));
        assert!(t.get(id).unwrap().is_first_packet_pending());

        t.begin_close(id).unwrap();
        assert_eq!(t.get(id).unwrap().state(), ConnectionState::Closing);
        // Still occupied until the module confirms
        assert_eq!(t.occupied(), 1);

        assert!(t.mark_closed(id));
        assert_eq!(t.occupied(), 0);
        assert!(!t.mark_closed(id));
    }

    #[test]
    fn test_unsolicited_connect_creates_server_link() {
        let mut t = table();
        assert_eq!(t.on_connect(ConnectionId(3)), Some(Role::Server));
        assert_eq!(t.get(ConnectionId(3)).unwrap().role(), Role::Server);
        assert_eq!(t.on_connect(ConnectionId(3)), None);
    }

    #[test]
    fn test_id_out_of_range() {
        let t = table();
        assert_eq!(t.id(4), Ok(ConnectionId(4)));
        assert_eq!(t.id(5), Err(EspError::InvalidConnection(5)));
    }

    #[test]
    fn test_close_requires_active() {
        let mut t = table();
        assert_eq!(
            t.begin_close(ConnectionId(1)),
            Err(EspError::NotActive(ConnectionId(1)))
        );
    }

    #[test]
    fn test_timeout_advances_toward_closed() {
        let mut t = table();
        t.on_connect(ConnectionId(0));
        assert_eq!(
            t.advance_toward_closed(ConnectionId(0)),
            Some(ConnectionState::Closing)
        );
        assert_eq!(
            t.advance_toward_closed(ConnectionId(0)),
            Some(ConnectionState::Closed)
        );

        t.begin_open(ConnectionId(1), ConnectionType::Udp, "10.0.0.1", 53)
            .unwrap();
        assert_eq!(
            t.advance_toward_closed(ConnectionId(1)),
            Some(ConnectionState::Closing)
        );
        assert!(t.get(ConnectionId(1)).unwrap().is_aborted());
    }

    #[test]
    fn test_timed_out_open_holds_slot_until_closed() {
        let mut t = table();
        let id = ConnectionId(0);
        t.begin_open(id, ConnectionType::Tcp, "example.com", 80)
            .unwrap();
        t.advance_toward_closed(id);

        assert_eq!(t.free_slot(), Some(ConnectionId(1)));
        assert_eq!(t.on_connect(id), None);
        t.cancel_close(id);
        assert_eq!(t.get(id).unwrap().state(), ConnectionState::Closing);

        assert!(t.mark_closed(id));
        assert!(!t.get(id).unwrap().is_aborted());
        assert_eq!(t.free_slot(), Some(id));
    }

    #[test]
    fn test_first_packet_marker_consumed_once() {
        let mut t = table();
        let id = ConnectionId(0);
        t.on_connect(id);

        assert!(t.begin_frame(id, 2));
        t.push_payload(id, b'a');
        t.push_payload(id, b'b');
        assert!(t.on_data_frame(id).unwrap().first);
        t.clear_pending(id);

        assert!(t.begin_frame(id, 1));
        t.push_payload(id, b'c');
        assert!(!t.on_data_frame(id).unwrap().first);
        assert_eq!(t.get(id).unwrap().total_received(), 3);
    }

    #[test]
    fn test_frame_rejected_for_closed_slot() {
        let mut t = table();
        assert!(!t.begin_frame(ConnectionId(2), 10));
    }

    #[test]
    fn test_content_length_fixed_until_boundary() {
        let mut t = ConnectionTable::new(5, 64, ContentLengthPolicy::HttpHeaders);
        let id = ConnectionId(0);
        t.on_connect(id);

        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nabc";
        t.begin_frame(id, head.len());
        for &b in head.iter() {
            t.push_payload(id, b);
        }
        let chunk = t.on_data_frame(id).unwrap();
        assert_eq!(chunk.framing.map(|f| f.content_length), Some(6));
        assert!(!chunk.payload_complete);
        t.clear_pending(id);
        assert_eq!(t.get(id).unwrap().content_length(), Some(6));

        // A body chunk that happens to look like headers must not change the length
        let tail = b"def";
        t.begin_frame(id, tail.len());
        for &b in tail.iter() {
            t.push_payload(id, b);
        }
        let chunk = t.on_data_frame(id).unwrap();
        assert_eq!(chunk.framing.map(|f| f.content_length), Some(6));
        assert!(chunk.payload_complete);
        t.clear_pending(id);
        assert_eq!(t.get(id).unwrap().content_length(), None);
    }

    #[test]
    fn test_disabled_policy_never_detects() {
        let mut t = ConnectionTable::new(5, 64, ContentLengthPolicy::Disabled);
        let id = ConnectionId(0);
        t.on_connect(id);
        for &b in b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".iter() {
            t.push_payload(id, b);
        }
        let chunk = t.on_data_frame(id).unwrap();
        assert_eq!(chunk.framing, None);
        assert_eq!(t.get(id).unwrap().content_length(), None);
    }

    #[test]
    fn test_buffer_full_signals_flush() {
        let mut t = ConnectionTable::new(5, 2, ContentLengthPolicy::Disabled);
        let id = ConnectionId(0);
        t.on_connect(id);
        t.begin_frame(id, 3);
        assert!(!t.push_payload(id, 1));
        assert!(t.push_payload(id, 2));
    }

    #[test]
    fn test_reset_frees_everything() {
        let mut t = table();
        t.on_connect(ConnectionId(0));
        t.on_connect(ConnectionId(2));
        let mut ids = t.reset();
        ids.sort();
        assert_eq!(ids, vec![ConnectionId(0), ConnectionId(2)]);
        assert_eq!(t.occupied(), 0);
    }
}
