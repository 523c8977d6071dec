//! The server side: it accepts connects up to a configured maximum, and it dispatches received
//!  packets to per-protocol worker threads.
//!
//! The receive loop does nothing but classify datagrams and queue them. Everything that may send
//!  (acknowledgements in particular) happens on the [PacketProcessor]'s workers.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use parking_lot::RwLock;
use tracing::{debug, error, info, info_span, trace, warn, Span};

use crate::config::NetConfig;
use crate::connection::{ConnectionTable, ConnectionUid, NetConnection};
use crate::processor::{PacketProcessor, ProtocolRoutes};
use crate::protocol::packets::{AcknowledgePacket, ConnectAckPacket, ConnectPacket, DisconnectPacket, HeartbeatPacket, ProtocolPacket, RemoteMethodPacket};
use crate::protocol::{shutdown_message, Protocol, ShutdownType};
use crate::replication::RemoteMethodResolver;
use crate::state::{ServerState, StateCell};
use crate::transport::udp::UdpTransport;
use crate::transport::{weak_handler, Datagram, ReceiveFlow, ReceiveHandler, Transport};
use crate::virtual_net::{VirtualLink, VirtualNetwork};

/// A server on a [VirtualNetwork] is the same state machine as a UDP server, only bound to a
///  different transport
pub type VirtualNetServer = NetServer;

#[derive(Debug, Default)]
pub struct ServerStats {
    unroutable_packets: AtomicU64,
    corrupt_packets: AtomicU64,
    rejected_connections: AtomicU64,
}

impl ServerStats {
    /// packets with an unknown protocol, or a protocol the server has no handler for
    pub fn unroutable_packets(&self) -> u64 {
        self.unroutable_packets.load(Ordering::Relaxed)
    }

    /// packets that failed their CRC check or could not be parsed
    pub fn corrupt_packets(&self) -> u64 {
        self.corrupt_packets.load(Ordering::Relaxed)
    }

    /// connects that were rejected because the server was full
    pub fn rejected_connections(&self) -> u64 {
        self.rejected_connections.load(Ordering::Relaxed)
    }
}

pub struct NetServer {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    span: Span,
    config: NetConfig,
    state: StateCell<ServerState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    processor: PacketProcessor<Datagram>,
    connections: ConnectionTable,
    resolver: RwLock<Option<Arc<dyn RemoteMethodResolver>>>,
    stats: ServerStats,
}

impl NetServer {
    pub fn new(config: NetConfig) -> NetServer {
        NetServer::with_span(config, info_span!("net_server", addr = tracing::field::Empty))
    }

    /// All logging of this server (including its worker threads) happens inside `span`
    pub fn with_span(config: NetConfig, span: Span) -> NetServer {
        NetServer {
            shared: Arc::new(ServerShared {
                span,
                connections: ConnectionTable::new(config.max_connections),
                config,
                state: StateCell::new(ServerState::Shutdown),
                transport: Default::default(),
                processor: PacketProcessor::new("gamenet-server"),
                resolver: Default::default(),
                stats: Default::default(),
            }),
        }
    }

    /// Remote method packets are dispatched to `resolver`. This takes effect when the server is
    ///  started: a server started without a resolver drops remote method packets.
    pub fn set_resolver(&self, resolver: Arc<dyn RemoteMethodResolver>) {
        *self.shared.resolver.write() = Some(resolver);
    }

    pub fn state(&self) -> ServerState {
        self.shared.state.get()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.shared.stats
    }

    pub fn local_addr(&self) -> Option<String> {
        self.shared.transport.read()
            .as_ref()
            .map(|t| t.local_addr())
    }

    pub fn has_connection(&self, address: &str) -> bool {
        self.shared.connections.has_connection(address)
    }

    pub fn connection(&self, uid: &ConnectionUid) -> Option<NetConnection> {
        self.shared.connections.get(uid)
    }

    pub fn num_connections(&self) -> usize {
        self.shared.connections.len()
    }

    /// Blocks until the server reaches `state`, returning false on timeout
    pub fn wait_for_state(&self, state: ServerState, timeout: Duration) -> bool {
        self.shared.state.wait_for_timeout(state, timeout)
    }

    /// Listens for UDP datagrams on `port` on all IPV4 interfaces
    pub fn host(&self, port: u16) -> anyhow::Result<()> {
        self.host_addr((Ipv4Addr::UNSPECIFIED, port).into())
    }

    pub fn host_addr(&self, addr: SocketAddr) -> anyhow::Result<()> {
        let span = self.shared.span.clone();
        self.start(|handler| {
            let transport: Arc<dyn Transport> = Arc::new(UdpTransport::bind(addr, handler, span)?);
            Ok(transport)
        })
    }

    /// Joins `network` under `address`
    pub fn virtual_host(&self, network: &Arc<VirtualNetwork>, address: &str) -> anyhow::Result<()> {
        let network = network.clone();
        self.start(|handler| {
            let link: Arc<dyn Transport> = Arc::new(VirtualLink::connect(network, address, handler)?);
            Ok(link)
        })
    }

    fn start(&self, open_transport: impl FnOnce(Arc<dyn ReceiveHandler>) -> anyhow::Result<Arc<dyn Transport>>) -> anyhow::Result<()> {
        let shared = &self.shared;
        let _entered = shared.span.enter();

        shared.config.validate()?;
        if !shared.state.transition(ServerState::Shutdown, ServerState::Running) {
            bail!("cannot start server in state {:?}", shared.state.get());
        }

        // workers must be ready before the first datagram arrives
        if let Err(e) = shared.processor.start(shared.routes(), shared.span.clone()) {
            shared.state.set(ServerState::Shutdown);
            return Err(e);
        }

        match open_transport(weak_handler(shared)) {
            Ok(transport) => {
                let local_addr = transport.local_addr();
                shared.span.record("addr", local_addr.as_str());
                info!("server listening on {}", local_addr);
                *shared.transport.write() = Some(transport);
                Ok(())
            }
            Err(e) => {
                shared.processor.stop();
                shared.state.set(ServerState::Shutdown);
                Err(e)
            }
        }
    }

    /// Stops the server and drops all connections.
    ///
    /// NB: Connected clients are not notified for any [ShutdownType]. They find out from their
    ///  next reliable packet never being acknowledged.
    pub fn close(&self, shutdown_type: ShutdownType) -> anyhow::Result<()> {
        let shared = &self.shared;
        let _entered = shared.span.enter();

        if !shared.state.transition(ServerState::Running, ServerState::WaitingForSocket) {
            bail!("cannot close server in state {:?}", shared.state.get());
        }
        debug!("closing server ({:?}) with {} connections", shutdown_type, shared.connections.len());

        shared.unblock_receive();
        shared.state.wait_for(ServerState::ShuttingDown);

        shared.processor.stop();
        let transport = shared.transport.write().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close() {
                warn!("error closing transport: {}", e);
            }
        }
        shared.connections.clear();

        shared.state.set(ServerState::Shutdown);
        info!("server shut down");
        Ok(())
    }
}

impl Drop for NetServer {
    fn drop(&mut self) {
        if self.shared.state.get() == ServerState::Running {
            if let Err(e) = self.close(ShutdownType::Immediate) {
                error!("error closing server on drop: {}", e);
            }
        }
    }
}

impl ServerShared {
    fn routes(self: &Arc<Self>) -> ProtocolRoutes<Datagram> {
        let mut routes = ProtocolRoutes::default()
            .route(Protocol::Connect, self.worker(ServerShared::process_connect))
            .route(Protocol::Disconnect, self.worker(ServerShared::process_disconnect));

        if self.resolver.read().is_some() {
            routes = routes.route(Protocol::RemoteMethod, self.worker(ServerShared::process_remote_method));
        }
        routes
    }

    /// Workers hold the server weakly, a running worker must not keep a dropped server alive
    fn worker(self: &Arc<Self>, process: fn(&ServerShared, Datagram)) -> impl Fn(Datagram) + Send + Sync + 'static {
        let weak = Arc::downgrade(self);
        move |datagram| {
            if let Some(shared) = weak.upgrade() {
                process(&shared, datagram);
            }
        }
    }

    fn unblock_receive(&self) {
        let Some(transport) = self.transport.read().clone() else {
            self.state.set(ServerState::ShuttingDown);
            return;
        };
        if let Err(e) = transport.send(&transport.local_addr(), &shutdown_message()) {
            warn!("failed to send shutdown message to self: {}", e);
            self.state.set(ServerState::ShuttingDown);
        }
    }

    fn send_to(&self, target: &str, data: &[u8]) -> anyhow::Result<()> {
        self.config.check_datagram_size(data.len())?;
        let transport = self.transport.read().clone()
            .ok_or_else(|| anyhow!("server has no open transport"))?;
        transport.send(target, data)
    }

    fn acknowledge(&self, target: &str, uid: u32, data: Vec<u8>) {
        let result = AcknowledgePacket::new(uid, data)
            .write()
            .map_err(anyhow::Error::from)
            .and_then(|ack| self.send_to(target, &ack));
        match result {
            Ok(()) => trace!("acknowledged packet {} from {}", uid, target),
            Err(e) => warn!("failed to acknowledge packet {} from {}: {}", uid, target, e),
        }
    }

    fn parse<P: ProtocolPacket>(&self, datagram: &Datagram) -> Option<P> {
        match P::read(&datagram.data) {
            Ok(packet) => Some(packet),
            Err(e) => {
                self.stats.corrupt_packets.fetch_add(1, Ordering::Relaxed);
                debug!("corrupt {:?} packet from {}: {} - dropping", P::PROTOCOL, datagram.sender, e);
                None
            }
        }
    }

    fn process_connect(&self, datagram: Datagram) {
        let Some(packet) = self.parse::<ConnectPacket>(&datagram) else { return; };

        let connection_uid = match self.connections.create(&datagram.sender, &packet.identifier) {
            Some(connection) => {
                info!("accepted connection {} from {} ({:?})", connection.uid, datagram.sender, packet.identifier);
                connection.uid
            }
            None => {
                self.stats.rejected_connections.fetch_add(1, Ordering::Relaxed);
                ConnectionUid::ZERO
            }
        };

        if packet.header.is_reliable() {
            match ConnectAckPacket::new(connection_uid).write() {
                Ok(data) => self.acknowledge(&datagram.sender, packet.header.uid, data),
                Err(e) => error!("failed to serialize connect acknowledgement: {}", e),
            }
        }
    }

    fn process_disconnect(&self, datagram: Datagram) {
        let Some(packet) = self.parse::<DisconnectPacket>(&datagram) else { return; };

        match self.connections.remove(&packet.connection_uid) {
            Some(connection) => info!("connection {} from {} ({:?}) disconnected", connection.uid, connection.address, connection.identifier),
            None => debug!("disconnect for unknown connection {} from {} - ignoring", packet.connection_uid, datagram.sender),
        }

        if packet.header.is_reliable() {
            self.acknowledge(&datagram.sender, packet.header.uid, Vec::new());
        }
    }

    fn process_remote_method(&self, datagram: Datagram) {
        let Some(packet) = self.parse::<RemoteMethodPacket>(&datagram) else { return; };

        let resolver = self.resolver.read().clone();
        if let Some(resolver) = resolver {
            trace!("invoking remote method {} on object {}", packet.method_id, packet.object_id);
            if let Err(e) = resolver.invoke(packet.object_id, packet.method_id, &packet.data) {
                warn!("remote method {} on object {} from {} failed: {}", packet.method_id, packet.object_id, datagram.sender, e);
            }
        }

        if packet.header.is_reliable() {
            self.acknowledge(&datagram.sender, packet.header.uid, Vec::new());
        }
    }
}

impl ReceiveHandler for ServerShared {
    fn on_receive(&self, sender: &str, data: &[u8]) -> ReceiveFlow {
        let _entered = self.span.enter();

        match Protocol::peek(data) {
            Some(Protocol::Shutdown) if self.state.get() == ServerState::WaitingForSocket => {
                debug!("received shutdown message");
                self.state.transition(ServerState::WaitingForSocket, ServerState::ShuttingDown);
                return ReceiveFlow::Stop;
            }
            Some(Protocol::None) => {
                match HeartbeatPacket::read(data) {
                    Ok(_) => {
                        trace!("heartbeat from {}", sender);
                        self.connections.touch(sender);
                    }
                    Err(e) => {
                        self.stats.corrupt_packets.fetch_add(1, Ordering::Relaxed);
                        debug!("corrupt heartbeat from {}: {} - dropping", sender, e);
                    }
                }
            }
            Some(protocol) => {
                self.connections.touch(sender);
                let datagram = Datagram {
                    sender: sender.to_string(),
                    data: data.to_vec(),
                };
                if !self.processor.enqueue(protocol, datagram) {
                    self.stats.unroutable_packets.fetch_add(1, Ordering::Relaxed);
                    debug!("no handler for protocol {:?} from {} - dropping", protocol, sender);
                }
            }
            None => {
                self.stats.unroutable_packets.fetch_add(1, Ordering::Relaxed);
                debug!("unknown protocol from {} - dropping", sender);
            }
        }
        ReceiveFlow::Continue
    }
}
