//! End-to-end admission and ping coverage driven over real loopback sockets — no mocked
//! transport. Each test binds a server (and, where needed, a relay) to an ephemeral port,
//! connects one or more clients, and pumps `Buffer::receive`/`send` directly (bypassing the
//! threaded connection façade) until the expected state is reached or a bounded number of
//! ticks elapses.

use corenet::buffer::client::ClientBuffer;
use corenet::buffer::relay::RelayBuffer;
use corenet::buffer::server::ServerBuffer;
use corenet::buffer::{Buffer, ControlTarget, InboundEvent};
use corenet::config::{Config, Role};
use corenet::error::Result;
use corenet::ids::{ClientId, Encodable, RpcId};
use corenet::logger;
use corenet::rpc::{self, PingPayload, ProtocolRegistry, RpcContext, RpcDef};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// No application RPCs are exercised by these tests, so every lookup misses; a relay forwards
/// only registered, non-control RPC ids and these tests only drive ping (a control message).
struct NoopRegistry;
impl ProtocolRegistry for NoopRegistry {
    fn lookup(&self, _id: RpcId) -> Option<RpcDef> {
        None
    }

    fn dispatch(&self, _id: RpcId, _ctx: RpcContext, _args: &[u8]) -> Result<()> {
        Ok(())
    }
}

const TICK: Duration = Duration::from_millis(2);
const MAX_TICKS: u32 = 500;

fn base_config(role: Role) -> Config {
    Config {
        role,
        app_id: "APP".into(),
        session_id: "SESSION".into(),
        max_clients: 4,
        ..Config::default()
    }
}

fn point_client_at(mut client_config: Config, tcp: std::net::SocketAddr, udp: std::net::SocketAddr) -> Config {
    client_config.server_addr = tcp.ip().to_string();
    client_config.tcp_port = tcp.port();
    client_config.udp_port = udp.port();
    client_config
}

#[test]
fn client_is_admitted_by_a_plain_server() {
    let server_config = Config { tcp_port: 0, udp_port: 0, ..base_config(Role::Server) };
    let mut server = ServerBuffer::bind(server_config, logger::discard()).unwrap();
    let tcp_addr = server.tcp_local_addr().unwrap();
    let udp_addr = server.udp_local_addr().unwrap();

    let client_config = point_client_at(base_config(Role::Client), tcp_addr, udp_addr);
    let mut client = ClientBuffer::connect(client_config, logger::discard()).unwrap();

    let mut server_events = Vec::new();
    for _ in 0..MAX_TICKS {
        server_events.extend(server.receive().unwrap());
        server.send().unwrap();
        let client_events = client.receive().unwrap();
        client.send().unwrap();
        if !client_events.is_empty() && client.local_id() != ClientId::NONE {
            break;
        }
        std::thread::sleep(TICK);
    }

    assert_ne!(client.local_id(), ClientId::NONE, "client never completed admission");
    assert_eq!(client.authority(), ClientId::NONE, "a plain server never assigns a client as authority");
    assert!(
        server_events.iter().any(|e| matches!(e, InboundEvent::ClientConnected(id) if *id == client.local_id())),
        "server never observed its own newly admitted client"
    );
}

#[test]
fn second_client_is_replayed_the_first_clients_presence() {
    let server_config = Config { tcp_port: 0, udp_port: 0, ..base_config(Role::Server) };
    let mut server = ServerBuffer::bind(server_config, logger::discard()).unwrap();
    let tcp_addr = server.tcp_local_addr().unwrap();
    let udp_addr = server.udp_local_addr().unwrap();

    let mut first = ClientBuffer::connect(point_client_at(base_config(Role::Client), tcp_addr, udp_addr), logger::discard()).unwrap();

    for _ in 0..MAX_TICKS {
        server.receive().unwrap();
        server.send().unwrap();
        first.receive().unwrap();
        first.send().unwrap();
        if first.local_id() != ClientId::NONE {
            break;
        }
        std::thread::sleep(TICK);
    }
    assert_ne!(first.local_id(), ClientId::NONE, "first client never completed admission");

    let mut second = ClientBuffer::connect(point_client_at(base_config(Role::Client), tcp_addr, udp_addr), logger::discard()).unwrap();
    let mut second_events = Vec::new();
    for _ in 0..MAX_TICKS {
        server.receive().unwrap();
        server.send().unwrap();
        first.receive().unwrap();
        first.send().unwrap();
        second_events.extend(second.receive().unwrap());
        second.send().unwrap();
        if second.local_id() != ClientId::NONE {
            break;
        }
        std::thread::sleep(TICK);
    }

    assert_ne!(second.local_id(), ClientId::NONE, "second client never completed admission");
    assert!(
        second_events.iter().any(|e| matches!(e, InboundEvent::ClientConnected(id) if *id == first.local_id())),
        "second client was never told about the first client already present"
    );
}

#[test]
fn ping_through_a_plain_server_round_trips() {
    let server_config = Config { tcp_port: 0, udp_port: 0, ..base_config(Role::Server) };
    let mut server = ServerBuffer::bind(server_config, logger::discard()).unwrap();
    let tcp_addr = server.tcp_local_addr().unwrap();
    let udp_addr = server.udp_local_addr().unwrap();

    let mut client = ClientBuffer::connect(point_client_at(base_config(Role::Client), tcp_addr, udp_addr), logger::discard()).unwrap();

    for _ in 0..MAX_TICKS {
        server.receive().unwrap();
        server.send().unwrap();
        client.receive().unwrap();
        client.send().unwrap();
        if client.local_id() != ClientId::NONE {
            break;
        }
        std::thread::sleep(TICK);
    }
    assert_ne!(client.local_id(), ClientId::NONE, "client never completed admission");

    let resolved: Arc<Mutex<Option<i64>>> = Arc::new(Mutex::new(None));
    let resolved_handle = resolved.clone();
    client.subscribe_ping(Box::new(move |req| {
        *resolved_handle.lock().unwrap() = Some(req.ping_millis());
    }));

    let request = client.ping(ClientId::NONE);
    assert!(!request.resolved, "pinging the server is never a local self-ping short-circuit");

    let payload = PingPayload {
        source: request.source,
        target: request.target,
        send_time_millis: request.send_time_millis,
        receive_time_millis: 0,
    };
    let mut bytes = Vec::with_capacity(payload.encoded_len());
    payload.write(&mut bytes).unwrap();
    client.enqueue_control(ControlTarget::One(ClientId::NONE), rpc::RPC_PING_REQUEST, bytes).unwrap();

    for _ in 0..MAX_TICKS {
        client.send().unwrap();
        server.receive().unwrap();
        server.send().unwrap();
        client.receive().unwrap();
        if resolved.lock().unwrap().is_some() {
            break;
        }
        std::thread::sleep(TICK);
    }

    let millis = resolved.lock().unwrap().expect("ping never resolved");
    assert!(millis >= 0, "round-trip time should never be negative on loopback");
}

#[test]
fn relay_forwards_a_ping_between_two_peers() {
    let relay_config = Config { tcp_port: 0, udp_port: 0, ..base_config(Role::Relay) };
    let mut relay = RelayBuffer::bind(relay_config, logger::discard(), Arc::new(NoopRegistry)).unwrap();
    let tcp_addr = relay.tcp_local_addr().unwrap();
    let udp_addr = relay.udp_local_addr().unwrap();

    let mut host = ClientBuffer::connect(point_client_at(base_config(Role::Host), tcp_addr, udp_addr), logger::discard()).unwrap();
    let mut peer = ClientBuffer::connect(point_client_at(base_config(Role::Client), tcp_addr, udp_addr), logger::discard()).unwrap();

    for _ in 0..MAX_TICKS {
        relay.receive().unwrap();
        relay.send().unwrap();
        host.receive().unwrap();
        host.send().unwrap();
        peer.receive().unwrap();
        peer.send().unwrap();
        if host.local_id() != ClientId::NONE && peer.local_id() != ClientId::NONE {
            break;
        }
        std::thread::sleep(TICK);
    }
    assert_ne!(host.local_id(), ClientId::NONE, "host never completed admission");
    assert_ne!(peer.local_id(), ClientId::NONE, "peer never completed admission");
    assert_eq!(host.authority(), host.local_id(), "the first admitted client becomes the relay's authority");

    let resolved: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
    let resolved_handle = resolved.clone();
    peer.subscribe_ping(Box::new(move |_req| {
        *resolved_handle.lock().unwrap() = true;
    }));

    let request = peer.ping(host.local_id());
    assert!(!request.resolved);
    let payload = PingPayload {
        source: request.source,
        target: request.target,
        send_time_millis: request.send_time_millis,
        receive_time_millis: 0,
    };
    let mut bytes = Vec::with_capacity(payload.encoded_len());
    payload.write(&mut bytes).unwrap();
    peer.enqueue_control(ControlTarget::One(host.local_id()), rpc::RPC_PING_REQUEST, bytes).unwrap();

    for _ in 0..MAX_TICKS {
        peer.send().unwrap();
        relay.receive().unwrap();
        relay.send().unwrap();
        host.receive().unwrap();
        host.send().unwrap();
        relay.receive().unwrap();
        relay.send().unwrap();
        peer.receive().unwrap();
        if *resolved.lock().unwrap() {
            break;
        }
        std::thread::sleep(TICK);
    }

    assert!(*resolved.lock().unwrap(), "ping routed through the relay never resolved on the peer");
}
