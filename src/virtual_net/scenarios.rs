//! Client / server scenarios on a virtual network.
//!
//! NB: Delivery is synchronous, but the server processes packets on its worker threads, so
//!  replies still arrive asynchronously and tests wait for state changes with a timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rstest::*;

use crate::client::VirtualNetClient;
use crate::config::NetConfig;
use crate::protocol::{Protocol, ProtocolFlags, ShutdownType};
use crate::replication::{encode_argument, MockRemoteMethodResolver, ReplicationType, Replicator};
use crate::server::VirtualNetServer;
use crate::state::{ClientState, ServerState};
use crate::test_util::{state_log, wait_until};
use crate::virtual_net::VirtualNetwork;

const TIMEOUT: Duration = Duration::from_secs(5);
const SERVER: &str = "server";

struct Setup {
    network: Arc<VirtualNetwork>,
    server: VirtualNetServer,
}

impl Setup {
    fn client(&self, address: &str) -> VirtualNetClient {
        let client = VirtualNetClient::new(NetConfig::default());
        client.virtual_connect(&self.network, SERVER, address).unwrap();
        client
    }

    fn connected_client(&self, address: &str) -> VirtualNetClient {
        let client = self.client(address);
        assert!(client.wait_for_state(ClientState::Connected, TIMEOUT));
        client
    }
}

fn hosted(config: NetConfig) -> Setup {
    let network = Arc::new(VirtualNetwork::new());
    let server = VirtualNetServer::new(config);
    server.virtual_host(&network, SERVER).unwrap();
    Setup { network, server }
}

#[fixture]
fn setup() -> Setup {
    hosted(NetConfig::default())
}

fn is_ack(data: &[u8]) -> bool {
    Protocol::peek(data) == Some(Protocol::Acknowledgement)
}

#[rstest]
fn test_connect_handshake(setup: Setup) {
    let client = setup.connected_client("client");

    assert!(setup.server.has_connection("client"));
    let uid = client.connection_uid().unwrap();
    assert!(!uid.is_zero());
    assert_eq!(setup.server.connection(&uid).unwrap().address, "client");
    assert_eq!(client.num_pending_reliable(), 0);
    assert_eq!(client.local_addr().as_deref(), Some("client"));
}

#[rstest]
fn test_corrupt_ack(setup: Setup) {
    setup.network.set_filter(|_: &str, _: &str, data: &mut Vec<u8>| {
        if is_ack(data) {
            let last = data.len() - 1;
            data[last] ^= 0x01;
        }
        true
    });

    let client = setup.client("client");
    assert!(client.wait_for_state(ClientState::ConnectionFailed, TIMEOUT));

    assert_eq!(client.stats().corrupt_ack_packets(), 1);
    assert_eq!(client.connection_uid(), None);
    assert!(setup.server.has_connection("client"));
}

#[rstest]
fn test_ignored_ack(setup: Setup) {
    setup.network.set_filter(|_: &str, _: &str, data: &mut Vec<u8>| !is_ack(data));

    let client = setup.client("client");
    assert!(wait_until(TIMEOUT, || setup.server.has_connection("client")));

    // there is no timeout for the handshake
    assert!(!client.wait_for_state(ClientState::Connected, Duration::from_millis(100)));
    assert_eq!(client.state(), ClientState::Connecting);
    assert_eq!(client.num_pending_reliable(), 1);

    client.close(ShutdownType::Immediate).unwrap();
    assert_eq!(client.state(), ClientState::Shutdown);
    assert!(!setup.network.is_connected("client"));
}

#[rstest]
fn test_close_notify(setup: Setup) {
    let client = setup.connected_client("client");

    // the virtual network delivers the shutdown message on the closing thread, so all of the
    //  client's transitions are logged here
    let (subscriber, states) = state_log();
    tracing::subscriber::with_default(subscriber, || client.close(ShutdownType::Notify)).unwrap();
    assert_eq!(*states.lock(), vec!["WaitingForSocket", "ShuttingDown", "Shutdown"]);

    assert_eq!(client.state(), ClientState::Shutdown);
    assert_eq!(client.connection_uid(), None);
    assert!(!setup.network.is_connected("client"));

    assert!(wait_until(TIMEOUT, || !setup.server.has_connection("client")));
    assert!(client.close(ShutdownType::Notify).is_err());
}

#[rstest]
fn test_close_notify_and_wait(setup: Setup) {
    let client = setup.connected_client("client");

    client.close(ShutdownType::NotifyAndWait).unwrap();
    assert_eq!(client.state(), ClientState::Shutdown);
    assert_eq!(client.num_pending_reliable(), 0);

    // the server removes the connection before it acknowledges the disconnect
    assert!(!setup.server.has_connection("client"));
}

#[rstest]
#[case::immediate(ShutdownType::Immediate)]
#[case::notify(ShutdownType::Notify)]
#[case::notify_and_wait(ShutdownType::NotifyAndWait)]
fn test_close_before_connected(setup: Setup, #[case] shutdown_type: ShutdownType) {
    setup.network.set_filter(|_: &str, _: &str, data: &mut Vec<u8>| !is_ack(data));
    let client = setup.client("client");

    client.close(shutdown_type).unwrap();
    assert_eq!(client.state(), ClientState::Shutdown);

    // nothing was sent, so the server still knows the client
    assert!(wait_until(TIMEOUT, || setup.server.has_connection("client")));
}

#[rstest]
fn test_reconnect_after_close(setup: Setup) {
    let client = setup.connected_client("client");
    let first_uid = client.connection_uid().unwrap();
    client.close(ShutdownType::NotifyAndWait).unwrap();

    client.virtual_connect(&setup.network, SERVER, "client").unwrap();
    assert!(client.wait_for_state(ClientState::Connected, TIMEOUT));
    assert_ne!(client.connection_uid().unwrap(), first_uid);
}

#[rstest]
fn test_server_close_immediate(setup: Setup) {
    let clients: Vec<_> = (0..3)
        .map(|i| setup.connected_client(&format!("client-{}", i)))
        .collect();
    assert_eq!(setup.server.num_connections(), 3);

    setup.server.close(ShutdownType::Immediate).unwrap();
    assert_eq!(setup.server.state(), ServerState::Shutdown);
    assert_eq!(setup.server.num_connections(), 0);
    assert!(!setup.network.is_connected(SERVER));

    // the clients are not notified
    for client in &clients {
        assert_eq!(client.state(), ClientState::Connected);
    }
    assert!(setup.server.close(ShutdownType::Immediate).is_err());
}

#[test]
fn test_server_rejects_beyond_capacity() {
    let setup = hosted(NetConfig { max_connections: 2, ..NetConfig::default() });

    let _a = setup.connected_client("a");
    let _b = setup.connected_client("b");
    let c = setup.client("c");

    assert!(c.wait_for_state(ClientState::ConnectionFailed, TIMEOUT));
    assert_eq!(c.connection_uid(), None);
    assert!(!setup.server.has_connection("c"));
    assert_eq!(setup.server.num_connections(), 2);
    assert_eq!(setup.server.stats().rejected_connections(), 1);
}

#[rstest]
fn test_heartbeat(setup: Setup) {
    let idle = VirtualNetClient::new(NetConfig::default());
    assert!(idle.send_heartbeat().is_err());

    let client = setup.connected_client("client");

    let uid = client.connection_uid().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let idle_before = setup.server.connection(&uid).unwrap().idle_time();

    client.send_heartbeat().unwrap();
    let idle_after = setup.server.connection(&uid).unwrap().idle_time();
    assert!(idle_after < idle_before);
    assert_eq!(setup.server.stats().unroutable_packets(), 0);
    assert_eq!(setup.server.stats().corrupt_packets(), 0);
}

#[rstest]
#[case::reliable(ProtocolFlags::RELIABLE)]
#[case::unreliable(ProtocolFlags::empty())]
fn test_remote_method_is_resolved(#[case] flags: ProtocolFlags) {
    let network = Arc::new(VirtualNetwork::new());
    let invoked = Arc::new(Mutex::new(false));

    let mut resolver = MockRemoteMethodResolver::new();
    let flag = invoked.clone();
    resolver.expect_invoke()
        .withf(|object_id, method_id, data| *object_id == 12 && *method_id == 3 && data == [1u8, 2, 3])
        .times(1)
        .returning(move |_, _, _| {
            *flag.lock() = true;
            Ok(())
        });

    let server = VirtualNetServer::new(NetConfig::default());
    server.set_resolver(Arc::new(resolver));
    server.virtual_host(&network, SERVER).unwrap();
    let setup = Setup { network, server };

    let client = setup.connected_client("client");
    client.call_remote_method(12, 3, vec![1, 2, 3], flags).unwrap();

    assert!(wait_until(TIMEOUT, || *invoked.lock()));
    assert!(wait_until(TIMEOUT, || client.num_pending_reliable() == 0));
}

#[test]
fn test_remote_method_without_resolver_is_dropped() {
    let setup = hosted(NetConfig::default());
    let client = setup.connected_client("client");

    client.call_remote_method(1, 1, vec![], ProtocolFlags::RELIABLE).unwrap();
    assert_eq!(setup.server.stats().unroutable_packets(), 1);
    // never acknowledged, there is no retransmission
    assert_eq!(client.num_pending_reliable(), 1);
}

#[derive(Default)]
struct Score {
    points: u32,
}

#[test]
fn test_remote_method_on_replicated_object() {
    let replicator = Arc::new(Replicator::new());
    let mut score_type = ReplicationType::new::<Score>();
    let add = score_type.register_method("add", |score: &mut Score, points: u32| score.points += points).unwrap();
    replicator.register_type(score_type).unwrap();

    let score = Arc::new(Mutex::new(Score::default()));
    let object_id = replicator.allocate(score.clone()).unwrap();

    let network = Arc::new(VirtualNetwork::new());
    let server = VirtualNetServer::new(NetConfig::default());
    server.set_resolver(replicator.clone());
    server.virtual_host(&network, SERVER).unwrap();
    let setup = Setup { network, server };

    let client = setup.connected_client("client");
    client.call_remote_method(object_id, add, encode_argument(5u32).unwrap(), ProtocolFlags::RELIABLE).unwrap();
    client.call_remote_method(object_id, add, encode_argument(7u32).unwrap(), ProtocolFlags::RELIABLE).unwrap();

    assert!(wait_until(TIMEOUT, || client.num_pending_reliable() == 0));
    assert_eq!(score.lock().points, 12);
}

#[rstest]
fn test_state_preconditions(setup: Setup) {
    let client = setup.connected_client("client");
    assert!(client.virtual_connect(&setup.network, SERVER, "client-2").is_err());
    assert_eq!(client.state(), ClientState::Connected);

    assert!(setup.server.virtual_host(&setup.network, "server-2").is_err());
    assert_eq!(setup.server.state(), ServerState::Running);

    // address already taken
    let other = VirtualNetClient::new(NetConfig::default());
    assert!(other.virtual_connect(&setup.network, SERVER, "client").is_err());
    assert_eq!(other.state(), ClientState::Shutdown);
}

#[test]
fn test_connect_to_missing_server() {
    let network = Arc::new(VirtualNetwork::new());
    let client = VirtualNetClient::new(NetConfig::default());

    assert!(client.virtual_connect(&network, SERVER, "client").is_err());
    assert_eq!(client.state(), ClientState::ConnectionFailed);
    assert_eq!(client.num_pending_reliable(), 0);

    client.close(ShutdownType::Immediate).unwrap();
    assert_eq!(client.state(), ClientState::Shutdown);
    assert!(!network.is_connected("client"));
}
