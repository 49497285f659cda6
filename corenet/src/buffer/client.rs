//! Client role (spec §4.5.2): a single stream and datagram socket talking to one server or relay,
//! admission retry bookkeeping, and host-role self-reconciliation on `LocalClientConnected`/
//! `HostMigration`.

use crate::buffer::{Buffer, ControlTarget, InboundEvent};
use crate::config::Config;
use crate::error::{Error, Kind, Result};
use crate::ids::{ClientId, Encodable, NetworkId, RpcId, StringId};
use crate::logger::Logger;
use crate::packet::{Packet, Transport};
use crate::ping::{PingList, PingRequest};
use crate::rpc::{self, ConnectionRequest, ConnectionResponseCode, Permission, RpcHeader};
use crate::transform::bandwidth::{BandwidthCounters, BandwidthInTransform, BandwidthOutTransform};
use crate::transform::huffman::HuffmanTransform;
use crate::transform::Pipeline;
use mio::net::{TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

const TOKEN_TCP: Token = Token(0);
const TOKEN_UDP: Token = Token(1);

/// Admission bookkeeping named in spec §4.5.2.
struct Admission {
    last_request_time: Instant,
    remaining_attempts: u32,
    request_as_host: bool,
}

enum Phase {
    /// Re-sending the UDP `ConnectionRequest` at `connectionRequestRateMillis` up to
    /// `connectionRequestLimit` attempts.
    Requesting(Admission),
    /// Accepted; TCP stream connect/handshake in flight.
    Handshaking,
    Connected,
    GaveUp,
}

pub struct ClientBuffer {
    config: Config,
    log: Logger,
    poll: Poll,
    events: Events,
    tcp: TcpStream,
    udp: UdpSocket,
    server_udp_addr: SocketAddr,
    phase: Phase,
    tcp_in: Packet,
    tcp_out: Packet,
    write_backlog: Vec<u8>,
    local_id: ClientId,
    authority: ClientId,
    secret: u32,
    is_host: bool,
    ping_list: PingList,
    app_id: StringId,
    session_id: StringId,
    pipeline: Pipeline,
    bandwidth: BandwidthCounters,
}

/// Assembles the transform pipeline from config (spec §4.2); duplicated per role rather than
/// shared since each role's `Pipeline` is otherwise unrelated state.
fn build_pipeline(config: &Config, bandwidth: &BandwidthCounters) -> Pipeline {
    let mut pipeline = Pipeline::new();
    if config.measure_bandwidth {
        pipeline.register(Box::new(BandwidthInTransform::new(bandwidth.clone())));
        pipeline.register(Box::new(BandwidthOutTransform::new(bandwidth.clone())));
    }
    if config.use_compression {
        pipeline.register(Box::new(HuffmanTransform));
    }
    pipeline
}

impl ClientBuffer {
    pub fn connect(config: Config, log: Logger) -> Result<ClientBuffer> {
        let server_addr: SocketAddr = config.tcp_addr().parse().map_err(|_| Error::fatal(Kind::InvalidValue))?;
        let server_udp_addr: SocketAddr = config.udp_addr().parse().map_err(|_| Error::fatal(Kind::InvalidValue))?;

        let mut tcp = TcpStream::connect(server_addr)?;
        let local_bind: SocketAddr = if server_udp_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }
            .parse()
            .map_err(|_| Error::fatal(Kind::InvalidValue))?;
        let mut udp = UdpSocket::bind(local_bind)?;
        udp.connect(server_udp_addr)?;

        let poll = Poll::new()?;
        poll.registry().register(&mut tcp, TOKEN_TCP, Interest::READABLE)?;
        poll.registry().register(&mut udp, TOKEN_UDP, Interest::READABLE)?;

        let app_id = config.app_id()?;
        let session_id = config.session_id()?;
        let request_as_host = config.requests_host();
        let bandwidth = BandwidthCounters::new();
        let pipeline = build_pipeline(&config, &bandwidth);

        let mut client = ClientBuffer {
            phase: Phase::Requesting(Admission {
                last_request_time: Instant::now() - std::time::Duration::from_secs(3600),
                remaining_attempts: config.connection_request_limit,
                request_as_host,
            }),
            tcp_in: Packet::new_inbound(Transport::Stream, config.buffer_size),
            tcp_out: Packet::new_outbound(Transport::Stream, config.buffer_size),
            write_backlog: Vec::new(),
            local_id: ClientId::NONE,
            authority: ClientId::NONE,
            secret: 0,
            is_host: false,
            ping_list: PingList::new(),
            config,
            log,
            poll,
            events: Events::with_capacity(64),
            tcp,
            udp,
            server_udp_addr,
            app_id,
            session_id,
            pipeline,
            bandwidth,
        };
        client.maybe_send_request();
        Ok(client)
    }

    fn maybe_send_request(&mut self) {
        let request_as_host = if let Phase::Requesting(admission) = &mut self.phase {
            let now = Instant::now();
            if now.duration_since(admission.last_request_time).as_millis()
                < self.config.connection_request_rate_millis as u128
            {
                return;
            }
            if admission.remaining_attempts == 0 {
                self.phase = Phase::GaveUp;
                return;
            }
            admission.remaining_attempts -= 1;
            admission.last_request_time = now;
            admission.request_as_host
        } else {
            return;
        };

        let request = ConnectionRequest { app_id: self.app_id.clone(), session_id: self.session_id.clone(), is_host: request_as_host };
        let mut bytes = Vec::with_capacity(request.encoded_len());
        if request.write(&mut bytes).is_ok() {
            let _ = self.udp.send(&bytes);
        }
    }

    fn poll_datagram(&mut self) -> Option<ConnectionResponseCode> {
        let mut buf = [0u8; 4];
        match self.udp.recv(&mut buf) {
            Ok(4) => ConnectionResponseCode::decode(buf).ok(),
            _ => None,
        }
    }

    fn decode_inbound(&mut self) -> Result<Vec<InboundEvent>> {
        let mut events = Vec::new();
        if !self.tcp_in.is_complete() {
            return Ok(events);
        }

        let header = self.tcp_in.header;
        if header.protocol_version < self.config.min_protocol_version
            || header.app_version < self.config.min_app_version
        {
            slog::warn!(self.log, "protocol mismatch with server, disconnecting");
            self.tcp_in.clear_inbound();
            events.push(InboundEvent::LocalDisconnect);
            self.disconnect();
            return Ok(events);
        }

        self.pipeline.decode(&mut self.tcp_in)?;
        let messages: Vec<Vec<u8>> = self.tcp_in.iterate_messages().map(|m| m.to_vec()).collect();
        for message in messages {
            let (header, offset) = rpc::decode_header(&message)?;
            let args = &message[offset..];
            match header.rpc_id {
                rpc::RPC_LOCAL_CLIENT_CONNECTED => {
                    let assignment = crate::rpc::ClientIdAssignment::read(&mut &args[..])?;
                    self.local_id = assignment.assigned_id;
                    self.authority = assignment.authority_id;
                    self.secret = assignment.client_secret;
                    self.is_host = self.authority == self.local_id;
                    self.phase = Phase::Connected;
                    events.push(InboundEvent::LocalClientConnected(assignment));
                }
                rpc::RPC_CLIENT_CONNECTED => {
                    let evt = crate::rpc::ClientEvent::read(&mut &args[..])?;
                    events.push(InboundEvent::ClientConnected(evt.id));
                }
                rpc::RPC_CLIENT_DISCONNECTED => {
                    let evt = crate::rpc::ClientEvent::read(&mut &args[..])?;
                    events.push(InboundEvent::ClientDisconnected(evt.id));
                }
                rpc::RPC_NETWORK_OBJECT_SPAWN => {
                    let payload = crate::rpc::SpawnPayload::read(&mut &args[..])?;
                    events.push(InboundEvent::ObjectSpawn(payload));
                }
                rpc::RPC_NETWORK_OBJECT_DESPAWN => {
                    let payload = crate::rpc::DespawnPayload::read(&mut &args[..])?;
                    events.push(InboundEvent::ObjectDespawn(payload));
                }
                rpc::RPC_HOST_MIGRATION => {
                    let payload = crate::rpc::HostMigrationPayload::read(&mut &args[..])?;
                    self.authority = payload.new_authority_id;
                    self.is_host = self.authority == self.local_id;
                    events.push(InboundEvent::HostMigration(payload));
                }
                rpc::RPC_PING_REQUEST => {
                    let payload = crate::rpc::PingPayload::read(&mut &args[..])?;
                    if payload.target == self.local_id {
                        let echoed = PingList::echo(payload, crate::time_millis());
                        let mut echo_bytes = Vec::with_capacity(echoed.encoded_len());
                        echoed.write(&mut echo_bytes)?;
                        self.enqueue_control(ControlTarget::One(ClientId::NONE), rpc::RPC_PING_REQUEST, echo_bytes)?;
                    } else if let Some(resolved) = self.ping_list.resolve(payload, crate::time_millis()) {
                        let _ = resolved;
                    }
                }
                _ => {
                    events.push(InboundEvent::Rpc {
                        rpc_id: header.rpc_id,
                        caller: header.caller,
                        callee: header.callee,
                        target: header.target,
                        args: args.to_vec(),
                    });
                }
            }
        }
        self.tcp_in.clear_inbound();
        Ok(events)
    }
}

impl Buffer for ClientBuffer {
    fn receive(&mut self) -> Result<Vec<InboundEvent>> {
        self.maybe_send_request();
        if let Phase::Requesting(_) = self.phase {
            if let Some(code) = self.poll_datagram() {
                match code {
                    ConnectionResponseCode::Accepted => self.phase = Phase::Handshaking,
                    ConnectionResponseCode::HostAlreadyAssigned => {
                        if let Phase::Requesting(admission) = &mut self.phase {
                            admission.request_as_host = false;
                        }
                    }
                    ConnectionResponseCode::Rejected
                    | ConnectionResponseCode::ServerFull
                    | ConnectionResponseCode::IncorrectAppId => self.phase = Phase::GaveUp,
                }
            }
        }

        self.poll.poll(&mut self.events, Some(std::time::Duration::from_millis(0)))?;

        let mut events = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.tcp.read(&mut buf) {
                Ok(0) => {
                    events.push(InboundEvent::LocalDisconnect);
                    break;
                }
                Ok(n) => {
                    let mut offset = 0;
                    while offset < n {
                        let consumed = self.tcp_in.ingest(&buf[offset..n], 0)?;
                        if consumed == 0 {
                            break;
                        }
                        offset += consumed;
                        if self.tcp_in.is_complete() {
                            events.extend(self.decode_inbound()?);
                        }
                    }
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(_) => {
                    events.push(InboundEvent::LocalDisconnect);
                    break;
                }
            }
        }

        self.ping_list.sweep_expired(crate::time_millis());
        events.sort_by_key(|e| !e.is_client_event());
        Ok(events)
    }

    fn send(&mut self) -> Result<()> {
        if self.tcp_out.len() > crate::packet::HEADER_SIZE {
            self.tcp_out.header.protocol_version = self.config.protocol_version;
            self.tcp_out.header.app_version = self.config.app_version;
            self.tcp_out.header.sender_client_id = self.local_id;
            self.tcp_out.header.sender_secret = self.secret;
            self.pipeline.encode(&mut self.tcp_out)?;
            let bytes = self.tcp_out.emit()?.to_vec();
            self.write_backlog.extend_from_slice(&bytes);
        }
        self.tcp_out.reset();

        if !self.write_backlog.is_empty() {
            match self.tcp.write(&self.write_backlog) {
                Ok(n) => {
                    self.write_backlog.drain(0..n);
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn enqueue_control(&mut self, _target: ControlTarget, rpc_id: RpcId, payload: Vec<u8>) -> Result<()> {
        let header = RpcHeader { rpc_id, caller: self.local_id, callee: ClientId::NONE, target: NetworkId::NONE };
        let bytes = rpc::encode_message(header, &[], None, None)?;
        let mut full = bytes;
        full.extend_from_slice(&payload);
        self.tcp_out.reserve(full.len())?.copy_from_slice(&full);
        Ok(())
    }

    fn enqueue_rpc(
        &mut self,
        rpc_id: RpcId,
        caller: ClientId,
        callee: ClientId,
        target: NetworkId,
        permission: Permission,
        args: Vec<u8>,
    ) -> Result<()> {
        if !permission.caller_allowed(caller, self.authority) || !permission.callee_allowed(callee, caller, self.authority) {
            return Err(Error::fatal(Kind::PermissionViolation));
        }
        let header = RpcHeader { rpc_id, caller, callee, target };
        let bytes = rpc::encode_message(header, &[], None, None)?;
        let mut full = bytes;
        full.extend_from_slice(&args);
        self.tcp_out.reserve(full.len())?.copy_from_slice(&full);
        Ok(())
    }

    fn disconnect(&mut self) {
        let _ = self.tcp.shutdown(std::net::Shutdown::Both);
        self.phase = Phase::GaveUp;
    }

    fn disconnect_client(&mut self, _client_id: ClientId) {
        // A client endpoint has no authority to disconnect other clients; no-op per spec §4.5.
    }

    fn migrate_host(&mut self, _new_host_id: ClientId) -> Result<()> {
        Err(Error::fatal(Kind::InvalidState))
    }

    fn ping(&mut self, target: ClientId) -> PingRequest {
        self.ping_list.start(self.local_id, target, crate::time_millis())
    }

    fn subscribe_ping(&mut self, callback: Box<dyn Fn(&PingRequest) + Send + Sync>) {
        self.ping_list.subscribe(callback);
    }

    fn local_id(&self) -> ClientId {
        self.local_id
    }

    fn authority(&self) -> ClientId {
        self.authority
    }
}

impl ClientBuffer {
    pub fn bandwidth(&self) -> &BandwidthCounters {
        &self.bandwidth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_retry_budget_is_config_driven() {
        let admission = Admission {
            last_request_time: Instant::now(),
            remaining_attempts: 10,
            request_as_host: false,
        };
        assert_eq!(admission.remaining_attempts, 10);
    }
}
