use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, trace, Instrument, Span};

use crate::transport::{ReceiveFlow, ReceiveHandler, Transport};

/// The largest UDP payload over IPV4: `65535 - 20 - 8`. The receive buffer has this size so that
///  no datagram is ever truncated.
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// A UDP socket with a receive loop running on a dedicated tokio runtime.
///
/// Only the receive loop is async. Sending uses the std socket directly, and nothing blocks on
///  the runtime, so the API can be called from any thread, including a thread of some other tokio
///  runtime.
///
/// NB: The socket is non-blocking. A send fails rather than waits if the socket's send buffer is
///  full, which is the same as the datagram being lost.
pub struct UdpTransport {
    runtime: Mutex<Option<Runtime>>,
    socket: std::net::UdpSocket,
    self_addr: SocketAddr,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr, handler: Arc<dyn ReceiveHandler>, span: Span) -> anyhow::Result<UdpTransport> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        info!("bound UDP socket to {:?}", local_addr);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gamenet-udp")
            .enable_io()
            .build()?;

        let recv_socket = {
            // registering with the reactor requires the runtime's context but does not block
            let _guard = runtime.enter();
            UdpSocket::from_std(socket.try_clone()?)?
        };
        runtime.spawn(Self::recv_loop(recv_socket, handler).instrument(span));

        Ok(UdpTransport {
            runtime: Mutex::new(Some(runtime)),
            socket,
            self_addr: Self::reachable_from_self(local_addr),
        })
    }

    /// a socket bound to the unspecified address receives its own datagrams via loopback
    fn reachable_from_self(addr: SocketAddr) -> SocketAddr {
        if !addr.ip().is_unspecified() {
            return addr;
        }
        let loopback: IpAddr = match addr {
            SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        };
        SocketAddr::new(loopback, addr.port())
    }

    pub fn resolve(address: &str, port: u16) -> anyhow::Result<SocketAddr> {
        (address, port).to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow!("{}:{} does not resolve to a socket address", address, port))
    }

    async fn recv_loop(socket: UdpSocket, handler: Arc<dyn ReceiveHandler>) {
        info!("starting receive loop");

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let (num_read, from) = match socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };
            trace!("received datagram from {:?}: {:?}", from, &buf[..num_read]);

            if handler.on_receive(&from.to_string(), &buf[..num_read]) == ReceiveFlow::Stop {
                break;
            }
        }

        info!("receive loop terminated");
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> String {
        self.self_addr.to_string()
    }

    fn send(&self, target: &str, data: &[u8]) -> anyhow::Result<()> {
        let target: SocketAddr = target.parse()?;
        let num_sent = self.socket.send_to(data, target)?;
        if num_sent != data.len() {
            anyhow::bail!("sent {} of {} bytes to {:?}", num_sent, data.len(), target);
        }
        Ok(())
    }

    fn close(&self) -> anyhow::Result<()> {
        if let Some(runtime) = self.runtime.lock().take() {
            debug!("closing UDP socket {:?}", self.self_addr);
            runtime.shutdown_background();
        }
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}
