//! An in-process stand-in for UDP. Nodes register under an address string, and sending delivers
//!  the datagram by calling the target's handler synchronously on the sender's thread.
//!
//! NB: Because delivery is synchronous, a reply can arrive before the call that triggered it
//!  returns. Real sockets never do that, so timing-sensitive tests must not rely on it.

#[cfg(test)]
mod scenarios;

use std::sync::Arc;

use anyhow::bail;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::transport::{ReceiveHandler, Transport};

/// Sees every datagram in transit. It may modify the datagram, or return false to drop it.
pub trait PacketFilter: Send + Sync + 'static {
    fn filter(&self, sender: &str, target: &str, data: &mut Vec<u8>) -> bool;
}

impl <F: Fn(&str, &str, &mut Vec<u8>) -> bool + Send + Sync + 'static> PacketFilter for F {
    fn filter(&self, sender: &str, target: &str, data: &mut Vec<u8>) -> bool {
        self(sender, target, data)
    }
}

#[derive(Default)]
pub struct VirtualNetwork {
    nodes: RwLock<FxHashMap<String, Arc<dyn ReceiveHandler>>>,
    filter: RwLock<Option<Arc<dyn PacketFilter>>>,
}

impl VirtualNetwork {
    pub fn new() -> VirtualNetwork {
        Default::default()
    }

    pub fn connect(&self, address: &str, node: Arc<dyn ReceiveHandler>) -> anyhow::Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(address) {
            bail!("a virtual node with address {:?} is already connected", address);
        }
        debug!("connecting virtual node {:?}", address);
        nodes.insert(address.to_string(), node);
        Ok(())
    }

    pub fn disconnect(&self, address: &str) -> anyhow::Result<()> {
        if self.nodes.write().remove(address).is_none() {
            bail!("no virtual node with address {:?} is connected", address);
        }
        debug!("disconnected virtual node {:?}", address);
        Ok(())
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.nodes.read().contains_key(address)
    }

    /// Returns false if there is no node at `target`. A datagram dropped by the filter counts as
    ///  sent.
    pub fn send(&self, target: &str, sender: &str, data: &[u8]) -> bool {
        // the handler may send in turn, so it is called without holding the lock
        let Some(node) = self.nodes.read().get(target).cloned() else {
            debug!("no virtual node at {:?} - dropping datagram from {:?}", target, sender);
            return false;
        };

        let filter = self.filter.read().clone();
        match filter {
            Some(filter) => {
                let mut data = data.to_vec();
                if !filter.filter(sender, target, &mut data) {
                    trace!("filter dropped datagram from {:?} to {:?}", sender, target);
                    return true;
                }
                node.on_receive(sender, &data);
            }
            None => {
                node.on_receive(sender, data);
            }
        }
        true
    }

    pub fn set_filter(&self, filter: impl PacketFilter) {
        *self.filter.write() = Some(Arc::new(filter));
    }

    pub fn clear_filter(&self) {
        *self.filter.write() = None;
    }
}

/// A node's endpoint in a [VirtualNetwork]
pub struct VirtualLink {
    network: Arc<VirtualNetwork>,
    address: String,
}

impl VirtualLink {
    pub fn connect(network: Arc<VirtualNetwork>, address: &str, handler: Arc<dyn ReceiveHandler>) -> anyhow::Result<VirtualLink> {
        network.connect(address, handler)?;
        Ok(VirtualLink {
            network,
            address: address.to_string(),
        })
    }
}

impl Transport for VirtualLink {
    fn local_addr(&self) -> String {
        self.address.clone()
    }

    fn send(&self, target: &str, data: &[u8]) -> anyhow::Result<()> {
        if !self.network.send(target, &self.address, data) {
            bail!("no virtual node at {:?}", target);
        }
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        self.network.disconnect(&self.address)
    }
}
