//! Networking for games on top of UDP: a bit-packing serialization stream, CRC32-signed packets,
//!  and a client / server pair with a connect handshake and acknowledged ("reliable") packets.
//!
//! Client and server run on either a real UDP socket or on a [virtual_net::VirtualNetwork],
//!  which delivers datagrams in-process for tests.

pub mod client;
pub mod config;
pub mod connection;
pub mod processor;
pub mod protocol;
pub mod reliable;
pub mod replication;
pub mod server;
pub mod state;
pub mod stream;
pub mod transport;
pub mod virtual_net;

#[cfg(test)]
pub mod test_util;
