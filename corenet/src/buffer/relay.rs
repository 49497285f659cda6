//! Relay role (spec §4.5.3): identical admission to the server role, plus host selection, host
//! migration, and shutdown-when-empty policy. The relay never executes application RPCs — for
//! `rpcId >= 30` it only validates `caller == claimedCaller` and forwards.

use crate::buffer::client_table::{ClientRecord, ClientTable};
use crate::buffer::pending::{PendingConnection, PendingList};
use crate::buffer::{Buffer, ControlTarget, InboundEvent};
use crate::config::Config;
use crate::error::{Error, Kind, Result};
use crate::ids::{ClientId, Encodable, NetworkId, RpcId, StringId};
use crate::logger::Logger;
use crate::ping::{PingList, PingRequest};
use crate::rpc::{
    self, ClientEvent, ClientIdAssignment, ConnectionRequest, ConnectionResponseCode,
    HostMigrationPayload, Permission, ProtocolRegistry, RpcHeader,
};
use crate::transform::bandwidth::{BandwidthCounters, BandwidthInTransform, BandwidthOutTransform};
use crate::transform::huffman::HuffmanTransform;
use crate::transform::Pipeline;
use mio::net::{TcpListener, UdpSocket};
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

const TOKEN_LISTENER: Token = Token(0);
const TOKEN_UDP: Token = Token(1);
const TOKEN_PENDING_BASE: usize = 1 << 20;

fn client_token(id: ClientId) -> Token {
    Token(id.0 as usize)
}

/// A relay endpoint (spec §4.5.3). Structurally parallel to [`super::server::ServerBuffer`];
/// kept as a distinct type rather than a shared generic because the admission and routing
/// policies genuinely diverge (host selection, migration, non-execution forwarding).
pub struct RelayBuffer {
    config: Config,
    log: Logger,
    poll: Poll,
    events: Events,
    listener: TcpListener,
    udp: UdpSocket,
    table: ClientTable,
    pending: PendingList,
    next_pending_token: usize,
    ping_list: PingList,
    app_id: StringId,
    session_id: StringId,
    accepted_udp: HashMap<SocketAddr, Instant>,
    authority: Option<ClientId>,
    host_addr: Option<IpAddr>,
    pipeline: Pipeline,
    bandwidth: BandwidthCounters,
    registry: Arc<dyn ProtocolRegistry>,
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

impl RelayBuffer {
    pub fn bind(config: Config, log: Logger, registry: Arc<dyn ProtocolRegistry>) -> Result<RelayBuffer> {
        let mut listener = TcpListener::bind(config.tcp_addr().parse().map_err(|_| Error::fatal(Kind::InvalidValue))?)?;
        let mut udp = UdpSocket::bind(config.udp_addr().parse().map_err(|_| Error::fatal(Kind::InvalidValue))?)?;

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, TOKEN_LISTENER, Interest::READABLE)?;
        poll.registry().register(&mut udp, TOKEN_UDP, Interest::READABLE)?;

        let app_id = config.app_id()?;
        let session_id = config.session_id()?;
        let host_addr = config
            .host_addr
            .as_ref()
            .and_then(|s| s.parse::<IpAddr>().ok());
        let bandwidth = BandwidthCounters::new();
        let pipeline = build_pipeline(&config, &bandwidth);

        Ok(RelayBuffer {
            config,
            log,
            poll,
            events: Events::with_capacity(256),
            listener,
            udp,
            table: ClientTable::new(),
            pending: PendingList::new(),
            next_pending_token: TOKEN_PENDING_BASE,
            ping_list: PingList::new(),
            app_id,
            session_id,
            accepted_udp: HashMap::new(),
            authority: None,
            host_addr,
            pipeline,
            bandwidth,
            registry,
        })
    }

    pub fn bandwidth(&self) -> &BandwidthCounters {
        &self.bandwidth
    }

    /// The stream listener's bound address — useful when `config.tcp_port` was `0` and the OS
    /// picked an ephemeral port.
    pub fn tcp_local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The datagram socket's bound address, for the same reason as [`Self::tcp_local_addr`].
    pub fn udp_local_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    fn reject_datagram(&self, addr: SocketAddr, code: ConnectionResponseCode) {
        if let Err(err) = self.udp.send_to(&code.encode(), addr) {
            slog::warn!(self.log, "failed to send admission response"; "error" => %err, "addr" => %addr);
        }
    }

    /// Host selection (spec §4.5.3): if `hostAddr` was pre-declared, only that IP may become
    /// authority and admissions from elsewhere wait until it has; otherwise the first admitted
    /// client wins.
    fn accept_datagram(&mut self, addr: SocketAddr, request: ConnectionRequest) {
        if request.app_id != self.app_id || request.session_id != self.session_id {
            self.reject_datagram(addr, ConnectionResponseCode::IncorrectAppId);
            return;
        }
        if let Some(whitelist) = &self.config.whitelist {
            if !whitelist.contains(&addr.ip()) {
                self.reject_datagram(addr, ConnectionResponseCode::Rejected);
                return;
            }
        }

        if request.is_host {
            if self.authority.is_some() {
                self.reject_datagram(addr, ConnectionResponseCode::HostAlreadyAssigned);
                return;
            }
            if let Some(expected) = self.host_addr {
                if expected != addr.ip() {
                    self.reject_datagram(addr, ConnectionResponseCode::Rejected);
                    return;
                }
            }
        }

        let occupied = self.table.len() + self.accepted_udp.len();
        if occupied as u32 >= self.config.max_clients {
            self.reject_datagram(addr, ConnectionResponseCode::ServerFull);
            return;
        }

        self.accepted_udp.insert(addr, Instant::now());
        self.reject_datagram(addr, ConnectionResponseCode::Accepted);
    }

    fn poll_datagrams(&mut self) -> Result<()> {
        let mut buf = [0u8; 512];
        loop {
            match self.udp.recv_from(&mut buf) {
                Ok((n, addr)) => {
                    if let Ok(request) = ConnectionRequest::read(&mut &buf[..n]) {
                        self.accept_datagram(addr, request);
                    }
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn accept_streams(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let matched = self.accepted_udp.keys().any(|k| k.ip() == addr.ip());
                    if !matched {
                        let _ = stream.shutdown(std::net::Shutdown::Both);
                        continue;
                    }
                    let token = Token(self.next_pending_token);
                    self.next_pending_token += 1;
                    self.poll.registry().register(&mut stream, token, Interest::READABLE)?;
                    self.pending.push(PendingConnection::new(token, stream, Instant::now()));
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn admit(&mut self, token: Token) -> Result<Option<Vec<InboundEvent>>> {
        let mut conn = match self.pending.take(token) {
            Some(c) => c,
            None => return Ok(None),
        };

        let mut buf = [0u8; 512];
        loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => conn.inbound.extend_from_slice(&buf[..n]),
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }
        if conn.inbound.len() < 4 {
            self.pending.push(conn);
            return Ok(None);
        }

        let addr = conn.stream.peer_addr()?;
        let became_host = self.authority.is_none()
            && (self.host_addr.map(|h| h == addr.ip()).unwrap_or(true));
        self.accepted_udp.remove(&addr);

        let id = self.table.next_id();
        let secret = self.table.unique_secret();
        self.poll.registry().deregister(&mut conn.stream)?;
        let mut stream = conn.stream;
        self.poll.registry().register(&mut stream, client_token(id), Interest::READABLE)?;

        let record = ClientRecord::new(id, secret, stream, addr, client_token(id), self.config.buffer_size);
        self.table.insert(record);

        if became_host {
            self.authority = Some(id);
        }

        let assignment = ClientIdAssignment {
            assigned_id: id,
            authority_id: self.authority.unwrap_or(ClientId::NONE),
            client_secret: secret,
            max_clients: self.config.max_clients,
        };

        let mut assignment_bytes = Vec::with_capacity(assignment.encoded_len());
        assignment.write(&mut assignment_bytes)?;
        self.deliver_header_to_peer(
            id,
            RpcHeader { rpc_id: rpc::RPC_LOCAL_CLIENT_CONNECTED, caller: ClientId::NONE, callee: id, target: NetworkId::NONE },
            &assignment_bytes,
        )?;

        let mut events = vec![InboundEvent::LocalClientConnected(assignment)];
        for other in self.table.ids() {
            if other != id {
                let evt = ClientEvent { id: other };
                let mut bytes = Vec::with_capacity(evt.encoded_len());
                evt.write(&mut bytes)?;
                self.deliver_header_to_peer(
                    id,
                    RpcHeader { rpc_id: rpc::RPC_CLIENT_CONNECTED, caller: ClientId::NONE, callee: id, target: NetworkId::NONE },
                    &bytes,
                )?;
                events.push(InboundEvent::ClientConnected(other));
            }
        }

        let newcomer = ClientEvent { id };
        let mut newcomer_bytes = Vec::with_capacity(newcomer.encoded_len());
        newcomer.write(&mut newcomer_bytes)?;
        self.broadcast_control(ControlTarget::AllExcept(id), rpc::RPC_CLIENT_CONNECTED, newcomer_bytes)?;
        events.push(InboundEvent::ClientConnected(id));

        Ok(Some(events))
    }

    fn deliver_header_to_peer(&mut self, peer: ClientId, header: RpcHeader, payload: &[u8]) -> Result<()> {
        let bytes = rpc::encode_message(header, &[], None, None)?;
        let mut full = bytes;
        full.extend_from_slice(payload);
        if let Some(record) = self.table.get_mut(peer) {
            record.tcp_out.reserve(full.len())?.copy_from_slice(&full);
        }
        Ok(())
    }

    fn broadcast_control(&mut self, target: ControlTarget, rpc_id: RpcId, payload: Vec<u8>) -> Result<()> {
        let header = RpcHeader { rpc_id, caller: ClientId::NONE, callee: ClientId::NONE, target: NetworkId::NONE };
        let bytes = rpc::encode_message(header, &[], None, None)?;
        let mut full = bytes;
        full.extend_from_slice(&payload);

        let ids: Vec<ClientId> = self.table.ids().collect();
        for id in ids {
            let send = match target {
                ControlTarget::All => true,
                ControlTarget::One(only) => only == id,
                ControlTarget::AllExcept(excluded) => excluded != id,
            };
            if send {
                if let Some(record) = self.table.get_mut(id) {
                    record.tcp_out.reserve(full.len())?.copy_from_slice(&full);
                }
            }
        }
        Ok(())
    }

    /// Selects a fallback authority per spec §4.8: the first non-authority record, ordered by
    /// admission.
    fn fallback_authority(&self, exclude: ClientId) -> Option<ClientId> {
        self.table.first_other_than(exclude)
    }

    fn apply_migration(&mut self, new_authority: ClientId) -> Result<()> {
        self.authority = Some(new_authority);
        let payload = HostMigrationPayload { new_authority_id: new_authority };
        let mut bytes = Vec::with_capacity(payload.encoded_len());
        payload.write(&mut bytes)?;
        self.broadcast_control(ControlTarget::All, rpc::RPC_HOST_MIGRATION, bytes)
    }
}

impl Buffer for RelayBuffer {
    fn receive(&mut self) -> Result<Vec<InboundEvent>> {
        let now = Instant::now();
        for expired in self.pending.sweep_expired(now, self.config.connection_request_timeout_millis) {
            let mut stream = expired.stream;
            let _ = self.poll.registry().deregister(&mut stream);
        }
        self.accepted_udp.retain(|_, seen| now.duration_since(*seen).as_millis() < self.config.connection_request_timeout_millis as u128);

        self.poll.poll(&mut self.events, Some(std::time::Duration::from_millis(0)))?;
        let mut events = Vec::new();
        let tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();

        self.poll_datagrams()?;
        self.accept_streams()?;

        for token in tokens {
            if token == TOKEN_LISTENER || token == TOKEN_UDP {
                continue;
            }
            if token.0 >= TOKEN_PENDING_BASE {
                if let Some(admitted) = self.admit(token)? {
                    events.extend(admitted);
                }
                continue;
            }

            let id = ClientId(token.0 as u32);
            let mut buf = [0u8; 4096];
            loop {
                let read = match self.table.get_mut(id) {
                    Some(record) => record.tcp.read(&mut buf),
                    None => break,
                };
                match read {
                    Ok(0) => {
                        let was_authority = self.authority == Some(id);
                        self.disconnect_client(id);
                        events.push(InboundEvent::ClientDisconnected(id));
                        if was_authority {
                            if let Some(next) = self.fallback_authority(id) {
                                if self.apply_migration(next).is_ok() {
                                    events.push(InboundEvent::HostMigration(HostMigrationPayload { new_authority_id: next }));
                                }
                            } else if !self.config.effective_migratable() {
                                self.disconnect();
                            }
                        }
                        break;
                    }
                    Ok(n) => {
                        let mut offset = 0;
                        while offset < n {
                            let consumed = match self.table.get_mut(id) {
                                Some(record) => record.tcp_in.ingest(&buf[offset..n], 0)?,
                                None => break,
                            };
                            if consumed == 0 {
                                break;
                            }
                            offset += consumed;

                            let complete = self.table.get(id).map(|r| r.tcp_in.is_complete()).unwrap_or(false);
                            if complete {
                                let packet_header = self.table.get(id).map(|r| r.tcp_in.header);
                                let secret_ok = packet_header
                                    .map(|h| self.table.get(id).map(|r| r.secret == h.sender_secret).unwrap_or(false))
                                    .unwrap_or(false);
                                let version_ok = packet_header
                                    .map(|h| {
                                        h.protocol_version >= self.config.min_protocol_version
                                            && h.app_version >= self.config.min_app_version
                                    })
                                    .unwrap_or(false);

                                if !version_ok {
                                    slog::warn!(self.log, "protocol mismatch, dropping connection"; "client" => id.0);
                                    self.disconnect_client(id);
                                    events.push(InboundEvent::ClientDisconnected(id));
                                    break;
                                }
                                if !secret_ok {
                                    slog::warn!(self.log, "sender secret mismatch, dropping packet"; "client" => id.0);
                                    if let Some(record) = self.table.get_mut(id) {
                                        record.tcp_in.clear_inbound();
                                    }
                                    continue;
                                }

                                if let Some(record) = self.table.get_mut(id) {
                                    self.pipeline.decode(&mut record.tcp_in)?;
                                }

                                let messages: Vec<Vec<u8>> = self
                                    .table
                                    .get(id)
                                    .map(|r| r.tcp_in.iterate_messages().map(|m| m.to_vec()).collect())
                                    .unwrap_or_default();

                                for message in messages {
                                    if let Ok((header, body_offset)) = rpc::decode_header(&message) {
                                        // The relay never executes application RPCs locally; it
                                        // only validates the claimed caller, then forwards below.
                                        if header.caller != id {
                                            continue;
                                        }

                                        if header.rpc_id == rpc::RPC_PING_REQUEST {
                                            // Ping never reaches the façade on a relay (spec
                                            // §4.7): the first leg forwards to the payload's
                                            // target, the echoed reply forwards back to its
                                            // source, using that peer's own outbound packet.
                                            if let Ok(payload) =
                                                crate::rpc::PingPayload::read(&mut &message[body_offset..])
                                            {
                                                let destination = if payload.receive_time_millis == 0 {
                                                    payload.target
                                                } else {
                                                    payload.source
                                                };
                                                let _ = self.deliver_header_to_peer(
                                                    destination,
                                                    header,
                                                    &message[body_offset..],
                                                );
                                            }
                                            continue;
                                        }

                                        if header.rpc_id.is_control() {
                                            continue;
                                        }

                                        // The relay forwards application RPCs itself (spec
                                        // §4.5.3); it never surfaces them to the façade as
                                        // `InboundEvent::Rpc`, since the façade has no socket
                                        // to forward them over on a relay endpoint.
                                        let permission = match self.registry.lookup(header.rpc_id) {
                                            Some(def) => def.permission,
                                            None => {
                                                slog::warn!(self.log, "no registry entry for rpc id, dropping"; "rpc_id" => header.rpc_id.0);
                                                continue;
                                            }
                                        };
                                        if let Err(err) = self.enqueue_rpc(
                                            header.rpc_id,
                                            id,
                                            header.callee,
                                            header.target,
                                            permission,
                                            message[body_offset..].to_vec(),
                                        ) {
                                            slog::warn!(self.log, "dropped relayed rpc"; "error" => ?err, "rpc_id" => header.rpc_id.0);
                                        }
                                    }
                                }

                                if let Some(record) = self.table.get_mut(id) {
                                    record.tcp_in.clear_inbound();
                                }
                            }
                        }
                    }
                    Err(ref err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(_) => {
                        self.disconnect_client(id);
                        events.push(InboundEvent::ClientDisconnected(id));
                        break;
                    }
                }
            }
        }

        self.ping_list.sweep_expired(crate::time_millis());
        events.sort_by_key(|e| !e.is_client_event());
        Ok(events)
    }

    fn send(&mut self) -> Result<()> {
        for record in self.table.iter_mut() {
            if record.tcp_out.len() > crate::packet::HEADER_SIZE {
                record.tcp_out.header.protocol_version = self.config.protocol_version;
                record.tcp_out.header.app_version = self.config.app_version;
                record.tcp_out.header.sender_client_id = ClientId::NONE;
                record.tcp_out.header.sender_secret = 0;
                self.pipeline.encode(&mut record.tcp_out)?;
                let bytes = record.tcp_out.emit()?.to_vec();
                if record.write_backlog.is_empty() {
                    match record.tcp.write(&bytes) {
                        Ok(n) if n < bytes.len() => record.write_backlog.extend_from_slice(&bytes[n..]),
                        Ok(_) => {}
                        Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                            record.write_backlog.extend_from_slice(&bytes)
                        }
                        Err(err) => return Err(err.into()),
                    }
                } else {
                    record.write_backlog.extend_from_slice(&bytes);
                }
            }
            record.tcp_out.reset();

            if !record.write_backlog.is_empty() {
                match record.tcp.write(&record.write_backlog) {
                    Ok(n) => {
                        record.write_backlog.drain(0..n);
                    }
                    Err(ref err) if err.kind() == ErrorKind::WouldBlock => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }

    fn enqueue_control(&mut self, target: ControlTarget, rpc_id: RpcId, payload: Vec<u8>) -> Result<()> {
        self.broadcast_control(target, rpc_id, payload)
    }

    /// The relay only forwards application RPCs (spec §4.5.3); it never executes them.
    fn enqueue_rpc(
        &mut self,
        rpc_id: RpcId,
        caller: ClientId,
        callee: ClientId,
        target: NetworkId,
        permission: Permission,
        args: Vec<u8>,
    ) -> Result<()> {
        if rpc_id.is_control() {
            return Err(Error::fatal(Kind::InvalidState));
        }
        let authority = self.authority.unwrap_or(ClientId::NONE);
        if !permission.caller_allowed(caller, authority) || !permission.callee_allowed(callee, caller, authority) {
            return Err(Error::fatal(Kind::PermissionViolation));
        }

        let header = RpcHeader { rpc_id, caller, callee, target };
        if callee != ClientId::NONE {
            self.deliver_header_to_peer(callee, header, &args)?;
        } else {
            let ids: Vec<ClientId> = self.table.ids().filter(|&id| id != caller).collect();
            for id in ids {
                self.deliver_header_to_peer(id, header, &args)?;
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let ids: Vec<ClientId> = self.table.ids().collect();
        for id in ids {
            self.disconnect_client(id);
        }
    }

    fn disconnect_client(&mut self, client_id: ClientId) {
        if let Some(mut record) = self.table.remove(client_id) {
            let _ = self.poll.registry().deregister(&mut record.tcp);
            let _ = record.tcp.shutdown(std::net::Shutdown::Both);

            let evt = ClientEvent { id: client_id };
            let mut bytes = Vec::with_capacity(evt.encoded_len());
            if evt.write(&mut bytes).is_ok() {
                let _ = self.broadcast_control(ControlTarget::All, rpc::RPC_CLIENT_DISCONNECTED, bytes);
            }
        }
    }

    fn migrate_host(&mut self, new_host_id: ClientId) -> Result<()> {
        if !self.config.effective_migratable() {
            return Err(Error::fatal(Kind::InvalidState));
        }
        if self.table.get(new_host_id).is_none() {
            return Err(Error::fatal(Kind::InvalidValue));
        }
        self.apply_migration(new_host_id)
    }

    fn ping(&mut self, target: ClientId) -> PingRequest {
        self.ping_list.start(ClientId::NONE, target, crate::time_millis())
    }

    fn subscribe_ping(&mut self, callback: Box<dyn Fn(&PingRequest) + Send + Sync>) {
        self.ping_list.subscribe(callback);
    }

    fn local_id(&self) -> ClientId {
        ClientId::NONE
    }

    fn authority(&self) -> ClientId {
        self.authority.unwrap_or(ClientId::NONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_token_roundtrips_through_client_id() {
        assert_eq!(client_token(ClientId(9)).0, 9);
    }
}
