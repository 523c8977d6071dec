use std::fmt::{Debug, Display, Formatter};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::stream::{NetSerialize, NetStream, StreamError};

/// Identifies an accepted connection. It is assigned by the server when it accepts a connect, and
///  it is never reused. All zeros is not a valid UID, it signals a rejected connect.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct ConnectionUid([u8; 16]);

impl ConnectionUid {
    pub const LEN: usize = 16;
    pub const ZERO: ConnectionUid = ConnectionUid([0; 16]);

    pub fn generate() -> ConnectionUid {
        ConnectionUid(*Uuid::new_v4().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> ConnectionUid {
        ConnectionUid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl Debug for ConnectionUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}
impl Display for ConnectionUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// a byte blob that must be exactly 16 bytes long
impl NetSerialize for ConnectionUid {
    fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        let mut raw = self.0.to_vec();
        ns.serialize(&mut raw)?;
        if ns.is_reading() {
            self.0 = raw.as_slice().try_into()
                .map_err(|_| StreamError::BlobLength { expected: Self::LEN, actual: raw.len() })?;
        }
        Ok(())
    }
}

/// A peer the server accepted
#[derive(Debug, Clone)]
pub struct NetConnection {
    pub address: String,
    pub identifier: String,
    pub uid: ConnectionUid,
    last_seen: Instant,
}

impl NetConnection {
    pub fn new(address: impl Into<String>, identifier: impl Into<String>) -> NetConnection {
        NetConnection {
            address: address.into(),
            identifier: identifier.into(),
            uid: ConnectionUid::generate(),
            last_seen: Instant::now(),
        }
    }

    /// time since the peer last sent anything, heartbeats included
    pub fn idle_time(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// The server's connections. This is small (max_connections is in the order of 100), so lookups
///  are linear scans.
pub struct ConnectionTable {
    max_connections: usize,
    connections: Mutex<Vec<NetConnection>>,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> ConnectionTable {
        ConnectionTable {
            max_connections,
            connections: Default::default(),
        }
    }

    /// Returns `None` if the table is full
    pub fn create(&self, address: &str, identifier: &str) -> Option<NetConnection> {
        let mut connections = self.connections.lock();
        if connections.len() >= self.max_connections {
            warn!("rejecting connection from {} ({:?}): max connections ({}) reached", address, identifier, self.max_connections);
            return None;
        }

        let connection = NetConnection::new(address, identifier);
        debug!("created connection {} for {} ({:?})", connection.uid, address, identifier);
        connections.push(connection.clone());
        Some(connection)
    }

    pub fn remove(&self, uid: &ConnectionUid) -> Option<NetConnection> {
        let mut connections = self.connections.lock();
        let idx = connections.iter()
            .position(|c| c.uid.as_bytes() == uid.as_bytes())?;
        Some(connections.remove(idx))
    }

    pub fn touch(&self, address: &str) {
        let mut connections = self.connections.lock();
        for c in connections.iter_mut().filter(|c| c.address == address) {
            c.touch();
        }
    }

    pub fn has_connection(&self, address: &str) -> bool {
        self.connections.lock()
            .iter()
            .any(|c| c.address == address)
    }

    pub fn get(&self, uid: &ConnectionUid) -> Option<NetConnection> {
        self.connections.lock()
            .iter()
            .find(|c| c.uid == *uid)
            .cloned()
    }

    pub fn get_by_address(&self, address: &str) -> Option<NetConnection> {
        self.connections.lock()
            .iter()
            .find(|c| c.address == address)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.connections.lock().clear();
    }
}
