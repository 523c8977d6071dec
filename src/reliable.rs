use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::protocol::packets::AcknowledgePacket;
use crate::protocol::Protocol;

pub type AckCallback = Arc<dyn Fn(&ReliablePacket, &AcknowledgePacket) + Send + Sync>;

/// A packet that was sent with the reliable flag and is waiting for its acknowledgement
pub struct ReliablePacket {
    pub uid: u32,
    pub protocol: Option<Protocol>,
    pub data: Vec<u8>,
    pub callback: Option<AckCallback>,
}

impl ReliablePacket {
    pub fn new(uid: u32, data: Vec<u8>, callback: Option<AckCallback>) -> ReliablePacket {
        ReliablePacket {
            uid,
            protocol: Protocol::peek(&data),
            data,
            callback,
        }
    }
}

/// Pending reliable packets by packet UID.
///
/// NB: There is no retransmission. A record stays here until it is acknowledged or the map is
///  cleared on shutdown.
#[derive(Default)]
pub struct ReliablePackets {
    pending: Mutex<FxHashMap<u32, ReliablePacket>>,
}

impl ReliablePackets {
    /// Panics if there is a pending record for the same UID: UIDs are assigned by the sender, so
    ///  a duplicate is a bug.
    pub fn add(&self, packet: ReliablePacket) {
        let uid = packet.uid;
        let previous = self.pending.lock().insert(uid, packet);
        if previous.is_some() {
            panic!("duplicate reliable packet UID {}", uid);
        }
    }

    /// Removes the record acknowledged by `ack` and invokes its callback (outside the lock).
    ///  Returns false if there was no matching record.
    pub fn complete(&self, ack: &AcknowledgePacket) -> bool {
        let Some(packet) = self.pending.lock().remove(&ack.header.uid) else {
            debug!("received acknowledgement for unknown packet {} - dropping", ack.header.uid);
            return false;
        };

        if let Some(callback) = &packet.callback {
            callback(&packet, ack);
        }
        true
    }

    pub fn remove(&self, uid: u32) -> Option<ReliablePacket> {
        self.pending.lock().remove(&uid)
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.pending.lock().contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            warn!("discarding {} unacknowledged reliable packets", pending.len());
        }
        pending.clear();
    }
}
