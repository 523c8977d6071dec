//! The client side of a connection: it connects to exactly one server, and it tracks the
//!  reliable packets it sent until the server acknowledges them.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, info_span, trace, warn, Span};

use crate::config::NetConfig;
use crate::connection::ConnectionUid;
use crate::protocol::packets::{AcknowledgePacket, ConnectAckPacket, ConnectPacket, DisconnectPacket, HeartbeatPacket, ProtocolPacket, RemoteMethodPacket};
use crate::protocol::{shutdown_message, Protocol, ProtocolFlags, ShutdownType};
use crate::reliable::{AckCallback, ReliablePacket, ReliablePackets};
use crate::state::{ClientState, StateCell};
use crate::transport::udp::UdpTransport;
use crate::transport::{weak_handler, ReceiveFlow, ReceiveHandler, Transport};
use crate::virtual_net::{VirtualLink, VirtualNetwork};

/// A client on a [VirtualNetwork] is the same state machine as a UDP client, only bound to a
///  different transport
pub type VirtualNetClient = NetClient;

#[derive(Debug, Default)]
pub struct ClientStats {
    bad_protocol_packets: AtomicU64,
    corrupt_ack_packets: AtomicU64,
}

impl ClientStats {
    /// packets with a protocol other than acknowledgement
    pub fn bad_protocol_packets(&self) -> u64 {
        self.bad_protocol_packets.load(Ordering::Relaxed)
    }

    /// acknowledgements that failed their CRC check or could not be parsed
    pub fn corrupt_ack_packets(&self) -> u64 {
        self.corrupt_ack_packets.load(Ordering::Relaxed)
    }
}

pub struct NetClient {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    config: NetConfig,
    span: Span,
    state: StateCell<ClientState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    server_addr: RwLock<String>,
    next_uid: AtomicU32,
    reliable: ReliablePackets,
    connection_uid: Mutex<ConnectionUid>,
    stats: ClientStats,
}

impl NetClient {
    pub fn new(config: NetConfig) -> NetClient {
        NetClient::with_span(config, info_span!("net_client", server = tracing::field::Empty))
    }

    /// All logging of this client happens inside `span`
    pub fn with_span(config: NetConfig, span: Span) -> NetClient {
        NetClient {
            shared: Arc::new(ClientShared {
                config,
                span,
                state: StateCell::new(ClientState::Shutdown),
                transport: Default::default(),
                server_addr: Default::default(),
                next_uid: AtomicU32::new(1),
                reliable: Default::default(),
                connection_uid: Mutex::new(ConnectionUid::ZERO),
                stats: Default::default(),
            }),
        }
    }

    pub fn state(&self) -> ClientState {
        self.shared.state.get()
    }

    /// Blocks until the client reaches `state`, returning false on timeout
    pub fn wait_for_state(&self, state: ClientState, timeout: Duration) -> bool {
        self.shared.state.wait_for_timeout(state, timeout)
    }

    pub fn stats(&self) -> &ClientStats {
        &self.shared.stats
    }

    /// The UID the server assigned to this client's connection, if it is connected
    pub fn connection_uid(&self) -> Option<ConnectionUid> {
        let uid = *self.shared.connection_uid.lock();
        if uid.is_zero() {
            None
        }
        else {
            Some(uid)
        }
    }

    /// reliable packets that were sent but not acknowledged yet
    pub fn num_pending_reliable(&self) -> usize {
        self.shared.reliable.len()
    }

    pub fn local_addr(&self) -> Option<String> {
        self.shared.transport.read()
            .as_ref()
            .map(|t| t.local_addr())
    }

    /// Opens a UDP socket and starts the connect handshake with the server at `address:port`.
    ///  This returns as soon as the connect packet is sent; the client becomes
    ///  [ClientState::Connected] or [ClientState::ConnectionFailed] when the server's reply
    ///  arrives.
    pub fn connect(&self, identifier: &str, address: &str, port: u16) -> anyhow::Result<()> {
        let server_addr = UdpTransport::resolve(address, port)?;
        let local_addr: SocketAddr = match server_addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let span = self.shared.span.clone();
        self.begin_connect(identifier, &server_addr.to_string(), |handler| {
            let transport: Arc<dyn Transport> = Arc::new(UdpTransport::bind(local_addr, handler, span)?);
            Ok(transport)
        })
    }

    /// Joins `network` under `address` and starts the connect handshake with the server at
    ///  `server`. The client identifies itself by its address.
    pub fn virtual_connect(&self, network: &Arc<VirtualNetwork>, server: &str, address: &str) -> anyhow::Result<()> {
        let network = network.clone();
        self.begin_connect(address, server, |handler| {
            let link: Arc<dyn Transport> = Arc::new(VirtualLink::connect(network, address, handler)?);
            Ok(link)
        })
    }

    fn begin_connect(&self, identifier: &str, server_addr: &str, open_transport: impl FnOnce(Arc<dyn ReceiveHandler>) -> anyhow::Result<Arc<dyn Transport>>) -> anyhow::Result<()> {
        let shared = &self.shared;
        let _entered = shared.span.enter();

        shared.config.validate()?;
        if !shared.state.transition(ClientState::Shutdown, ClientState::Connecting) {
            bail!("cannot connect in state {:?}", shared.state.get());
        }

        let transport = match open_transport(weak_handler(shared)) {
            Ok(transport) => transport,
            Err(e) => {
                shared.state.set(ClientState::Shutdown);
                return Err(e);
            }
        };
        *shared.transport.write() = Some(transport);
        *shared.server_addr.write() = server_addr.to_string();
        shared.span.record("server", server_addr);

        info!("connecting to {} as {:?}", server_addr, identifier);

        let weak = Arc::downgrade(shared);
        let on_ack: AckCallback = Arc::new(move |reliable, ack| {
            if let Some(shared) = weak.upgrade() {
                shared.on_connect_acknowledged(reliable, ack);
            }
        });

        let mut packet = ConnectPacket::new(ProtocolFlags::RELIABLE, shared.next_uid(), identifier);
        if let Err(e) = shared.send_packet(&mut packet, Some(on_ack)) {
            warn!("failed to send connect packet: {}", e);
            shared.state.transition(ClientState::Connecting, ClientState::ConnectionFailed);
            return Err(e);
        }
        Ok(())
    }

    /// Closes the connection and releases the transport. See [ShutdownType] for the variants;
    ///  notifying the server only happens if the client is connected.
    pub fn close(&self, shutdown_type: ShutdownType) -> anyhow::Result<()> {
        let shared = &self.shared;
        let _entered = shared.span.enter();

        let state = shared.state.get();
        match state {
            ClientState::Shutdown => bail!("client is not connected"),
            ClientState::WaitingForSocket | ClientState::ShuttingDown => bail!("client is already closing"),
            _ => {}
        }
        debug!("closing client ({:?}) in state {:?}", shutdown_type, state);

        if shutdown_type == ShutdownType::NotifyAndWait && state == ClientState::Connected {
            shared.state.set(ClientState::WaitingForSocket);

            // the acknowledgement releases the receive loop, there is no need for a shutdown message
            let weak = Arc::downgrade(shared);
            let on_ack: AckCallback = Arc::new(move |_, _| {
                if let Some(shared) = weak.upgrade() {
                    debug!("server acknowledged disconnect");
                    shared.state.set(ClientState::ShuttingDown);
                }
            });
            let mut packet = DisconnectPacket::new(ProtocolFlags::RELIABLE, shared.next_uid(), *shared.connection_uid.lock());
            match shared.send_packet(&mut packet, Some(on_ack)) {
                Ok(()) => shared.state.wait_for(ClientState::ShuttingDown),
                Err(e) => {
                    warn!("failed to send disconnect packet: {}", e);
                    shared.state.set(ClientState::ShuttingDown);
                }
            }
        }
        else {
            if shutdown_type == ShutdownType::Notify && state == ClientState::Connected {
                let mut packet = DisconnectPacket::new(ProtocolFlags::empty(), shared.next_uid(), *shared.connection_uid.lock());
                if let Err(e) = shared.send_packet(&mut packet, None) {
                    warn!("failed to send disconnect packet: {}", e);
                }
            }

            shared.state.set(ClientState::WaitingForSocket);
            shared.unblock_receive();
            shared.state.wait_for(ClientState::ShuttingDown);
        }

        shared.release_transport();
        shared.reliable.clear();
        *shared.connection_uid.lock() = ConnectionUid::ZERO;
        shared.state.set(ClientState::Shutdown);
        info!("client shut down");
        Ok(())
    }

    /// Sends an unreliable heartbeat so the server sees this client as alive
    pub fn send_heartbeat(&self) -> anyhow::Result<()> {
        let shared = &self.shared;
        let _entered = shared.span.enter();

        shared.require_connected()?;
        shared.send_packet(&mut HeartbeatPacket::new(shared.next_uid()), None)
    }

    /// Calls method `method_id` on the server's object `object_id`. `data` is the serialized
    ///  argument, see [crate::replication::encode_argument].
    pub fn call_remote_method(&self, object_id: u32, method_id: u32, data: Vec<u8>, flags: ProtocolFlags) -> anyhow::Result<()> {
        let shared = &self.shared;
        let _entered = shared.span.enter();

        shared.require_connected()?;
        let mut packet = RemoteMethodPacket::new(flags, shared.next_uid(), object_id, method_id, data);
        shared.send_packet(&mut packet, None)
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        if self.shared.state.get() != ClientState::Shutdown {
            if let Err(e) = self.close(ShutdownType::Immediate) {
                error!("error closing client on drop: {}", e);
            }
        }
    }
}

impl ClientShared {
    fn next_uid(&self) -> u32 {
        self.next_uid.fetch_add(1, Ordering::Relaxed)
    }

    fn require_connected(&self) -> anyhow::Result<()> {
        match self.state.get() {
            ClientState::Connected => Ok(()),
            state => bail!("client is not connected (state {:?})", state),
        }
    }

    /// Reliable packets are recorded before they are sent, so an acknowledgement can never
    ///  overtake its own record
    fn send_packet<P: ProtocolPacket>(&self, packet: &mut P, callback: Option<AckCallback>) -> anyhow::Result<()> {
        let data = packet.write()?;
        let uid = packet.header().uid;
        let is_reliable = packet.header().is_reliable();

        if is_reliable {
            self.reliable.add(ReliablePacket::new(uid, data.clone(), callback));
        }
        else if callback.is_some() {
            warn!("packet {} is not reliable - its acknowledgement callback is never called", uid);
        }

        trace!("sending {:?} packet {}", P::PROTOCOL, uid);
        let result = self.send_raw(&data);
        if result.is_err() && is_reliable {
            self.reliable.remove(uid);
        }
        result
    }

    fn send_raw(&self, data: &[u8]) -> anyhow::Result<()> {
        self.config.check_datagram_size(data.len())?;
        // NB: no lock is held while sending, a virtual network delivers synchronously
        let transport = self.transport.read().clone()
            .ok_or_else(|| anyhow!("client has no open transport"))?;
        let server_addr = self.server_addr.read().clone();
        transport.send(&server_addr, data)
    }

    /// Sends the shutdown message to the client's own socket so that its receive loop terminates
    fn unblock_receive(&self) {
        let Some(transport) = self.transport.read().clone() else {
            self.state.set(ClientState::ShuttingDown);
            return;
        };
        if let Err(e) = transport.send(&transport.local_addr(), &shutdown_message()) {
            warn!("failed to send shutdown message to self: {}", e);
            self.state.set(ClientState::ShuttingDown);
        }
    }

    fn release_transport(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close() {
                warn!("error closing transport: {}", e);
            }
        }
    }

    fn on_connect_acknowledged(&self, reliable: &ReliablePacket, ack: &AcknowledgePacket) {
        if reliable.protocol != Some(Protocol::Connect) {
            error!("connect acknowledgement callback for a {:?} packet", reliable.protocol);
            return;
        }

        match ConnectAckPacket::read(&ack.data) {
            Ok(connect_ack) if connect_ack.is_rejection() => {
                info!("server rejected the connection");
                self.state.transition(ClientState::Connecting, ClientState::ConnectionFailed);
            }
            Ok(connect_ack) => {
                // the UID must be visible to anybody who sees the Connected state
                *self.connection_uid.lock() = connect_ack.connection_uid;
                if self.state.transition(ClientState::Connecting, ClientState::Connected) {
                    info!("connected with connection UID {}", connect_ack.connection_uid);
                }
                else {
                    debug!("connect acknowledged in state {:?} - ignoring", self.state.get());
                }
            }
            Err(e) => {
                warn!("malformed connect acknowledgement: {}", e);
                self.state.transition(ClientState::Connecting, ClientState::ConnectionFailed);
            }
        }
    }
}

impl ReceiveHandler for ClientShared {
    fn on_receive(&self, sender: &str, data: &[u8]) -> ReceiveFlow {
        let _entered = self.span.enter();

        let state = self.state.get();
        if state == ClientState::ShuttingDown {
            trace!("shutting down - dropping datagram from {}", sender);
            return ReceiveFlow::Stop;
        }

        match Protocol::peek(data) {
            Some(Protocol::Shutdown) if state == ClientState::WaitingForSocket => {
                debug!("received shutdown message");
                self.state.transition(ClientState::WaitingForSocket, ClientState::ShuttingDown);
                return ReceiveFlow::Stop;
            }
            Some(Protocol::Acknowledgement) => {
                match AcknowledgePacket::read(data) {
                    Ok(ack) => {
                        trace!("received acknowledgement for packet {}", ack.header.uid);
                        self.reliable.complete(&ack);
                    }
                    Err(e) => {
                        self.stats.corrupt_ack_packets.fetch_add(1, Ordering::Relaxed);
                        debug!("corrupt acknowledgement from {}: {} - dropping", sender, e);
                        if self.state.transition(ClientState::Connecting, ClientState::ConnectionFailed) {
                            warn!("connect failed: the server's acknowledgement was corrupt");
                        }
                    }
                }
            }
            protocol => {
                self.stats.bad_protocol_packets.fetch_add(1, Ordering::Relaxed);
                debug!("unexpected protocol {:?} from {} - dropping", protocol, sender);
            }
        }
        ReceiveFlow::Continue
    }
}
