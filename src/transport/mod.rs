pub mod udp;

use std::sync::{Arc, Weak};

#[cfg(test)] use mockall::automock;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReceiveFlow {
    Continue,
    /// the receive loop terminates after this datagram
    Stop,
}

/// Receives datagrams from a transport. This is called on the transport's receive thread (or,
///  for the virtual network, synchronously on the sender's thread), so implementations must hand
///  off any real work rather than doing it inline.
pub trait ReceiveHandler: Send + Sync + 'static {
    fn on_receive(&self, sender: &str, data: &[u8]) -> ReceiveFlow;
}

/// Forwards to a handler without keeping it alive, so a transport that is owned by its handler
///  does not create a reference cycle
pub struct WeakReceiveHandler<H: ReceiveHandler>(pub Weak<H>);

impl <H: ReceiveHandler> ReceiveHandler for WeakReceiveHandler<H> {
    fn on_receive(&self, sender: &str, data: &[u8]) -> ReceiveFlow {
        match self.0.upgrade() {
            Some(handler) => handler.on_receive(sender, data),
            None => ReceiveFlow::Stop,
        }
    }
}

pub fn weak_handler<H: ReceiveHandler>(handler: &Arc<H>) -> Arc<dyn ReceiveHandler> {
    Arc::new(WeakReceiveHandler(Arc::downgrade(handler)))
}

/// The sending side of an endpoint (UDP socket or virtual network node). Addresses are strings
///  so that the same client and server code works with both.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync + 'static {
    /// the address at which this endpoint can send datagrams to itself
    fn local_addr(&self) -> String;

    fn send(&self, target: &str, data: &[u8]) -> anyhow::Result<()>;

    /// stops receiving and releases the endpoint
    fn close(&self) -> anyhow::Result<()>;
}

/// A received datagram, queued for processing
#[derive(Debug, Clone)]
pub struct Datagram {
    pub sender: String,
    pub data: Vec<u8>,
}
