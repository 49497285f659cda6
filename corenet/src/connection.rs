//! Connection façade: the single entry point an application holds. Composes a [`Buffer`] role
//! implementation, the object [`Spawner`], and an app-supplied [`ProtocolRegistry`] into the
//! public synchronous/threaded API, and owns the dispatch ordering (client-lifecycle events
//! before application RPCs) between the wire and the app.
//!
//! Synchronous mode calls `receive`, `execute_queue`, `send` directly on the caller's own thread
//! in that order, once per tick. Threaded mode hands the [`Buffer`] to a dedicated background
//! thread that sleeps for `threadUpdateDelta` between iterations; the caller only ever touches
//! two bounded crossbeam channels — decoded events flowing out, control requests flowing in —
//! and `receive`/`send` fail with `Kind::InvalidState` since the caller's thread no longer owns
//! the sockets. `execute_queue` still runs on the caller's thread in both modes, so every
//! subscriber callback and every `ProtocolRegistry::dispatch` call happens there — except ping
//! resolution, which the ping list fires from wherever `Buffer::receive` last ran (the
//! background thread, in threaded mode).

use crate::buffer::client::ClientBuffer;
use crate::buffer::relay::RelayBuffer;
use crate::buffer::server::ServerBuffer;
use crate::buffer::{Buffer, ControlTarget, InboundEvent};
use crate::config::Config;
use crate::error::{Error, Kind, Result};
use crate::ids::{ClientId, Encodable, NetworkId, RpcId};
use crate::logger::{self, Logger};
use crate::ping::PingRequest;
use crate::rpc::{self, ArgWrite, Permission, PingPayload, ProtocolRegistry, RpcContext};
use crate::spawner::{Spawner, TypeRegistry};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Which endpoint role this façade is driving. Distinct from [`crate::config::Role`]: `Host` and
/// `Client` both produce a [`ClientBuffer`] and collapse to `EndpointKind::Client` here, since
/// the dispatch policy for an admitted client endpoint doesn't depend on whether it requested the
/// host slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    Server,
    Client,
    Relay,
}

/// A request crossing from the caller's thread to the background worker in threaded mode. Every
/// variant the caller-facing API needs that touches the socket-owning [`Buffer`] has one.
enum WorkerRequest {
    Disconnect,
    DisconnectClient(ClientId),
    MigrateHost(ClientId, Sender<Result<()>>),
    Ping(ClientId, Sender<PingRequest>),
    SubscribePing(Box<dyn Fn(&PingRequest) + Send + Sync>),
    EnqueueControl(ControlTarget, RpcId, Vec<u8>),
    EnqueueRpc {
        rpc_id: RpcId,
        caller: ClientId,
        callee: ClientId,
        target: NetworkId,
        permission: Permission,
        args: Vec<u8>,
    },
}

enum Mode {
    Synchronous(Box<dyn Buffer + Send>),
    Threaded {
        handle: Option<JoinHandle<()>>,
        stop: Arc<AtomicBool>,
        events_rx: Receiver<InboundEvent>,
        requests_tx: Sender<WorkerRequest>,
    },
}

/// Builds the outbound ping payload for a just-started (unresolved) request. Shared between the
/// synchronous `ping` path and the worker's handling of `WorkerRequest::Ping`.
fn ping_payload_bytes(request: &PingRequest) -> Result<Vec<u8>> {
    let payload = PingPayload {
        source: request.source,
        target: request.target,
        send_time_millis: request.send_time_millis,
        receive_time_millis: 0,
    };
    let mut bytes = Vec::with_capacity(payload.encoded_len());
    payload.write(&mut bytes)?;
    Ok(bytes)
}

fn apply_request(buffer: &mut dyn Buffer, request: WorkerRequest, log: &Logger) {
    match request {
        WorkerRequest::Disconnect => buffer.disconnect(),
        WorkerRequest::DisconnectClient(id) => buffer.disconnect_client(id),
        WorkerRequest::MigrateHost(id, reply) => {
            let _ = reply.send(buffer.migrate_host(id));
        }
        WorkerRequest::Ping(target, reply) => {
            let request = buffer.ping(target);
            if !request.resolved {
                match ping_payload_bytes(&request) {
                    Ok(bytes) => {
                        if let Err(err) =
                            buffer.enqueue_control(ControlTarget::One(target), rpc::RPC_PING_REQUEST, bytes)
                        {
                            crate::logger::log_exception!(log, "failed to send ping"; "error" => ?err);
                        }
                    }
                    Err(err) => crate::logger::log_exception!(log, "failed to encode ping"; "error" => ?err),
                }
            }
            let _ = reply.send(request);
        }
        WorkerRequest::SubscribePing(callback) => buffer.subscribe_ping(callback),
        WorkerRequest::EnqueueControl(target, rpc_id, payload) => {
            if let Err(err) = buffer.enqueue_control(target, rpc_id, payload) {
                crate::logger::log_exception!(log, "failed to enqueue control message"; "error" => ?err);
            }
        }
        WorkerRequest::EnqueueRpc { rpc_id, caller, callee, target, permission, args } => {
            if let Err(err) = buffer.enqueue_rpc(rpc_id, caller, callee, target, permission, args) {
                crate::logger::log_exception!(log, "failed to enqueue rpc"; "error" => ?err);
            }
        }
    }
}

/// The background worker body (threaded mode): drain requests, drive one `receive`/`send` cycle,
/// sleep out the remainder of `delta`, repeat until `stop` is set.
fn run_worker(
    mut buffer: Box<dyn Buffer + Send>,
    events_tx: Sender<InboundEvent>,
    requests_rx: Receiver<WorkerRequest>,
    delta: Duration,
    stop: Arc<AtomicBool>,
    log: Logger,
) {
    while !stop.load(Ordering::Relaxed) {
        let tick_start = Instant::now();

        while let Ok(request) = requests_rx.try_recv() {
            apply_request(buffer.as_mut(), request, &log);
        }

        match buffer.receive() {
            Ok(events) => {
                for event in events {
                    if events_tx.send(event).is_err() {
                        return;
                    }
                }
            }
            Err(ref err) if err.is_wait() => {}
            Err(err) => crate::logger::log_exception!(log, "receive failed"; "error" => ?err),
        }

        if let Err(ref err) = buffer.send() {
            if !err.is_wait() {
                crate::logger::log_exception!(log, "send failed"; "error" => ?err);
            }
        }

        let elapsed = tick_start.elapsed();
        if elapsed < delta {
            thread::sleep(delta - elapsed);
        }
    }
    buffer.disconnect();
}

/// The connection façade: the only type application code holds directly.
pub struct Connection {
    config: Config,
    log: Logger,
    registry: Arc<dyn ProtocolRegistry>,
    spawner: Spawner,
    kind: EndpointKind,
    mode: Mode,
    pending: Vec<InboundEvent>,
    local_id: ClientId,
    authority: ClientId,
    is_host: bool,
    on_client_connected: Vec<Box<dyn FnMut(ClientId)>>,
    on_client_disconnected: Vec<Box<dyn FnMut(ClientId)>>,
    on_local_connected: Vec<Box<dyn FnMut(ClientId, ClientId)>>,
    on_local_disconnect: Vec<Box<dyn FnMut()>>,
    on_host_migration: Vec<Box<dyn FnMut(ClientId)>>,
}

impl Connection {
    /// Binds a server endpoint.
    pub fn server(config: Config, log: Logger, registry: Arc<dyn ProtocolRegistry>, types: TypeRegistry) -> Result<Connection> {
        let role_log = logger::for_role(&log, "server");
        let buffer = ServerBuffer::bind(config.clone(), role_log)?;
        Connection::assemble(config, log, registry, types, Box::new(buffer), EndpointKind::Server)
    }

    /// Connects a client endpoint (`role` of `Client` or `Host`; both produce this).
    pub fn client(config: Config, log: Logger, registry: Arc<dyn ProtocolRegistry>, types: TypeRegistry) -> Result<Connection> {
        let role_log = logger::for_role(&log, "client");
        let buffer = ClientBuffer::connect(config.clone(), role_log)?;
        Connection::assemble(config, log, registry, types, Box::new(buffer), EndpointKind::Client)
    }

    /// Binds a relay endpoint.
    pub fn relay(config: Config, log: Logger, registry: Arc<dyn ProtocolRegistry>, types: TypeRegistry) -> Result<Connection> {
        let role_log = logger::for_role(&log, "relay");
        let buffer = RelayBuffer::bind(config.clone(), role_log, registry.clone())?;
        Connection::assemble(config, log, registry, types, Box::new(buffer), EndpointKind::Relay)
    }

    fn assemble(
        config: Config,
        log: Logger,
        registry: Arc<dyn ProtocolRegistry>,
        types: TypeRegistry,
        buffer: Box<dyn Buffer + Send>,
        kind: EndpointKind,
    ) -> Result<Connection> {
        // The server is always its own session's authority; a client or relay endpoint only
        // learns whether it is host once admission completes (see `dispatch`).
        let is_authority = kind == EndpointKind::Server;
        let spawner = Spawner::new(types, is_authority);

        let mode = if config.threaded {
            let (events_tx, events_rx) = crossbeam_channel::unbounded();
            let (requests_tx, requests_rx) = crossbeam_channel::bounded(256);
            let stop = Arc::new(AtomicBool::new(false));
            let delta = Duration::from_millis(config.thread_update_delta_millis);
            let worker_log = logger::for_role(&log, "worker");
            let worker_stop = stop.clone();
            let handle = thread::Builder::new()
                .name("corenet-worker".into())
                .spawn(move || run_worker(buffer, events_tx, requests_rx, delta, worker_stop, worker_log))?;
            Mode::Threaded { handle: Some(handle), stop, events_rx, requests_tx }
        } else {
            Mode::Synchronous(buffer)
        };

        Ok(Connection {
            config,
            log,
            registry,
            spawner,
            kind,
            mode,
            pending: Vec::new(),
            local_id: ClientId::NONE,
            authority: ClientId::NONE,
            is_host: kind == EndpointKind::Server,
            on_client_connected: Vec::new(),
            on_client_disconnected: Vec::new(),
            on_local_connected: Vec::new(),
            on_local_disconnect: Vec::new(),
            on_host_migration: Vec::new(),
        })
    }

    pub fn local_id(&self) -> ClientId {
        self.local_id
    }

    pub fn authority(&self) -> ClientId {
        self.authority
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Threaded { .. })
    }

    /// Drains the socket(s) once. Synchronous mode only.
    pub fn receive(&mut self) -> Result<()> {
        match &mut self.mode {
            Mode::Synchronous(buffer) => {
                let events = buffer.receive()?;
                self.pending.extend(events);
                Ok(())
            }
            Mode::Threaded { .. } => Err(Error::fatal(Kind::InvalidState)),
        }
    }

    /// Flushes every queued outbound message. Synchronous mode only.
    pub fn send(&mut self) -> Result<()> {
        match &mut self.mode {
            Mode::Synchronous(buffer) => buffer.send(),
            Mode::Threaded { .. } => Err(Error::fatal(Kind::InvalidState)),
        }
    }

    /// Drains whatever events are ready (the pending list in synchronous mode, the worker's
    /// events channel in threaded mode) and dispatches each in order.
    pub fn execute_queue(&mut self) {
        let events: Vec<InboundEvent> = match &mut self.mode {
            Mode::Synchronous(_) => std::mem::take(&mut self.pending),
            Mode::Threaded { events_rx, .. } => {
                let mut events = Vec::new();
                while let Ok(event) = events_rx.try_recv() {
                    events.push(event);
                }
                events
            }
        };

        for event in events {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::LocalClientConnected(assignment) => {
                self.local_id = assignment.assigned_id;
                self.authority = assignment.authority_id;
                self.is_host = self.authority == self.local_id;
                self.spawner.set_authority(self.is_host);
                for callback in &mut self.on_local_connected {
                    callback(assignment.assigned_id, assignment.authority_id);
                }
            }
            InboundEvent::ClientConnected(id) => {
                // The session authority replays every live object's spawn to the newcomer
                // before any app callback runs, so late-join reconciliation (spec §4.6) always
                // happens ahead of whatever the app does in response to the connection.
                if self.kind == EndpointKind::Server || self.is_host {
                    if let Err(err) = self.replay_spawns_to(id) {
                        crate::logger::log_exception!(self.log, "failed to replay spawns to new client"; "error" => ?err);
                    }
                }
                for callback in &mut self.on_client_connected {
                    callback(id);
                }
            }
            InboundEvent::ClientDisconnected(id) => {
                for callback in &mut self.on_client_disconnected {
                    callback(id);
                }
            }
            InboundEvent::ObjectSpawn(payload) => {
                // The wire payload carries only type tag and id; ownership of a remotely
                // reconciled object is not tracked beyond "not locally owned".
                if let Err(err) = self.spawner.apply_remote_spawn(payload, ClientId::NONE) {
                    crate::logger::log_exception!(self.log, "failed to apply remote spawn"; "error" => ?err);
                }
            }
            InboundEvent::ObjectDespawn(payload) => {
                if let Err(err) = self.spawner.apply_remote_despawn(payload.id) {
                    crate::logger::log_exception!(self.log, "failed to apply remote despawn"; "error" => ?err);
                }
            }
            InboundEvent::HostMigration(payload) => {
                self.authority = payload.new_authority_id;
                self.is_host = self.authority == self.local_id;
                self.spawner.set_authority(self.is_host);
                for callback in &mut self.on_host_migration {
                    callback(payload.new_authority_id);
                }
            }
            InboundEvent::LocalDisconnect => {
                for callback in &mut self.on_local_disconnect {
                    callback();
                }
            }
            InboundEvent::Rpc { rpc_id, caller, callee, target, args } => {
                self.dispatch_rpc(rpc_id, caller, callee, target, args);
            }
        }
    }

    /// Routing policy for an already-decoded application RPC. A relay forwards RPCs itself inside
    /// its buffer's `receive` loop and never emits `InboundEvent::Rpc`, so this branch is never
    /// reached on a relay endpoint; it exists only so the match stays exhaustive over
    /// `EndpointKind`. A server re-broadcasts through `enqueue_rpc` and, for the permission
    /// classes that call for local execution, also dispatches into the registry. A client just
    /// dispatches; it is always the final hop.
    fn dispatch_rpc(&mut self, rpc_id: RpcId, caller: ClientId, callee: ClientId, target: NetworkId, args: Vec<u8>) {
        let def = match self.registry.lookup(rpc_id) {
            Some(def) => def,
            None => {
                crate::logger::log_exception!(self.log, "no registry entry for rpc id"; "rpc_id" => rpc_id.0);
                return;
            }
        };

        match self.kind {
            EndpointKind::Relay => {}
            EndpointKind::Server => {
                let should_execute_locally = matches!(
                    def.permission,
                    Permission::ClientsToAuthority
                ) || (matches!(def.permission, Permission::ClientsToAll | Permission::AnyToAll)
                    && callee == ClientId::NONE);

                if let Err(err) = self.enqueue_rpc_internal(rpc_id, caller, callee, target, def.permission, args.clone()) {
                    crate::logger::log_exception!(self.log, "failed to relay rpc"; "error" => ?err);
                }

                if should_execute_locally {
                    let ctx = RpcContext { caller, callee, target };
                    if let Err(err) = self.registry.dispatch(rpc_id, ctx, &args) {
                        crate::logger::log_exception!(self.log, "rpc dispatch failed"; "error" => ?err);
                    }
                }
            }
            EndpointKind::Client => {
                let ctx = RpcContext { caller, callee, target };
                if let Err(err) = self.registry.dispatch(rpc_id, ctx, &args) {
                    crate::logger::log_exception!(self.log, "rpc dispatch failed"; "error" => ?err);
                }
            }
        }
    }

    fn enqueue_control_internal(&mut self, target: ControlTarget, rpc_id: RpcId, payload: Vec<u8>) -> Result<()> {
        match &mut self.mode {
            Mode::Synchronous(buffer) => buffer.enqueue_control(target, rpc_id, payload),
            Mode::Threaded { requests_tx, .. } => requests_tx
                .send(WorkerRequest::EnqueueControl(target, rpc_id, payload))
                .map_err(|_| Error::fatal(Kind::InvalidState)),
        }
    }

    fn enqueue_rpc_internal(
        &mut self,
        rpc_id: RpcId,
        caller: ClientId,
        callee: ClientId,
        target: NetworkId,
        permission: Permission,
        args: Vec<u8>,
    ) -> Result<()> {
        match &mut self.mode {
            Mode::Synchronous(buffer) => buffer.enqueue_rpc(rpc_id, caller, callee, target, permission, args),
            Mode::Threaded { requests_tx, .. } => requests_tx
                .send(WorkerRequest::EnqueueRpc { rpc_id, caller, callee, target, permission, args })
                .map_err(|_| Error::fatal(Kind::InvalidState)),
        }
    }

    /// Calls a user RPC (`rpcId >= 30`). `args` skips whichever positions the registry marks as
    /// injected (caller/callee ids recovered from the header on the receiving side).
    pub fn call(&mut self, rpc_id: RpcId, callee: ClientId, target: NetworkId, args: &[&dyn ArgWrite]) -> Result<()> {
        if rpc_id.is_control() {
            return Err(Error::fatal(Kind::InvalidState));
        }
        let def = self.registry.lookup(rpc_id).ok_or_else(|| Error::fatal(Kind::DecodeFailure))?;
        let caller = self.local_id;
        if !def.permission.caller_allowed(caller, self.authority) || !def.permission.callee_allowed(callee, caller, self.authority)
        {
            return Err(Error::fatal(Kind::PermissionViolation));
        }
        let payload = rpc::encode_args(args, def.caller_injection_index, def.callee_injection_index)?;
        self.enqueue_rpc_internal(rpc_id, caller, callee, target, def.permission, payload)
    }

    /// Spawns a replicated object. Fails with `PermissionViolation` unless this
    /// endpoint is the session's authority.
    pub fn spawn(&mut self, type_tag: u8) -> Result<NetworkId> {
        let owner = self.local_id;
        let (_, payload) = self.spawner.spawn_local(type_tag, owner)?;
        let mut bytes = Vec::with_capacity(payload.encoded_len());
        payload.write(&mut bytes)?;
        self.enqueue_control_internal(ControlTarget::All, rpc::RPC_NETWORK_OBJECT_SPAWN, bytes)?;
        Ok(payload.id)
    }

    pub fn despawn(&mut self, id: NetworkId) -> Result<()> {
        let payload = self.spawner.despawn_local(id)?;
        let mut bytes = Vec::with_capacity(payload.encoded_len());
        payload.write(&mut bytes)?;
        self.enqueue_control_internal(ControlTarget::All, rpc::RPC_NETWORK_OBJECT_DESPAWN, bytes)
    }

    /// Replays every live object's spawn message to a single peer — used when an app wants to
    /// re-send late-join reconciliation outside the automatic admission-time replay (e.g. after
    /// re-subscribing a lazily-constructed view of the object table).
    pub fn replay_spawns_to(&mut self, peer: ClientId) -> Result<()> {
        let payloads: Vec<_> = self.spawner.live_spawn_payloads().collect();
        for payload in payloads {
            let mut bytes = Vec::with_capacity(payload.encoded_len());
            payload.write(&mut bytes)?;
            self.enqueue_control_internal(ControlTarget::One(peer), rpc::RPC_NETWORK_OBJECT_SPAWN, bytes)?;
        }
        Ok(())
    }

    /// Starts a ping. A self-ping resolves immediately; otherwise the wire request is
    /// sent and the returned [`PingRequest`] resolves later through a subscribed callback (or
    /// [`PingRequest::resolved`]/`failed` after the timeout, observed on the next poll).
    pub fn ping(&mut self, target: ClientId) -> Result<PingRequest> {
        match &mut self.mode {
            Mode::Synchronous(buffer) => {
                let request = buffer.ping(target);
                if !request.resolved {
                    let bytes = ping_payload_bytes(&request)?;
                    buffer.enqueue_control(ControlTarget::One(target), rpc::RPC_PING_REQUEST, bytes)?;
                }
                Ok(request)
            }
            Mode::Threaded { requests_tx, .. } => {
                let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
                requests_tx
                    .send(WorkerRequest::Ping(target, reply_tx))
                    .map_err(|_| Error::fatal(Kind::InvalidState))?;
                reply_rx.recv().map_err(|_| Error::fatal(Kind::InvalidState))
            }
        }
    }

    /// Registers a callback fired whenever any outstanding ping resolves or times out. In
    /// threaded mode this runs on the background thread — keep the callback quick and avoid
    /// touching anything the caller's thread also mutates without synchronization.
    pub fn subscribe_ping(&mut self, callback: impl Fn(&PingRequest) + Send + Sync + 'static) -> Result<()> {
        let boxed: Box<dyn Fn(&PingRequest) + Send + Sync> = Box::new(callback);
        match &mut self.mode {
            Mode::Synchronous(buffer) => {
                buffer.subscribe_ping(boxed);
                Ok(())
            }
            Mode::Threaded { requests_tx, .. } => requests_tx
                .send(WorkerRequest::SubscribePing(boxed))
                .map_err(|_| Error::fatal(Kind::InvalidState)),
        }
    }

    pub fn subscribe_client_connected(&mut self, callback: impl FnMut(ClientId) + 'static) {
        self.on_client_connected.push(Box::new(callback));
    }

    pub fn subscribe_client_disconnected(&mut self, callback: impl FnMut(ClientId) + 'static) {
        self.on_client_disconnected.push(Box::new(callback));
    }

    /// `callback(assignedId, authorityId)`.
    pub fn subscribe_local_connected(&mut self, callback: impl FnMut(ClientId, ClientId) + 'static) {
        self.on_local_connected.push(Box::new(callback));
    }

    pub fn subscribe_local_disconnect(&mut self, callback: impl FnMut() + 'static) {
        self.on_local_disconnect.push(Box::new(callback));
    }

    /// `callback(newAuthorityId)`.
    pub fn subscribe_host_migration(&mut self, callback: impl FnMut(ClientId) + 'static) {
        self.on_host_migration.push(Box::new(callback));
    }

    pub fn disconnect(&mut self) {
        match &mut self.mode {
            Mode::Synchronous(buffer) => buffer.disconnect(),
            Mode::Threaded { requests_tx, .. } => {
                let _ = requests_tx.send(WorkerRequest::Disconnect);
            }
        }
    }

    pub fn disconnect_client(&mut self, client_id: ClientId) {
        match &mut self.mode {
            Mode::Synchronous(buffer) => buffer.disconnect_client(client_id),
            Mode::Threaded { requests_tx, .. } => {
                let _ = requests_tx.send(WorkerRequest::DisconnectClient(client_id));
            }
        }
    }

    /// Relay-only. Fails with `InvalidState` on a server or client endpoint.
    pub fn migrate_host(&mut self, new_host_id: ClientId) -> Result<()> {
        match &mut self.mode {
            Mode::Synchronous(buffer) => buffer.migrate_host(new_host_id),
            Mode::Threaded { requests_tx, .. } => {
                let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
                requests_tx
                    .send(WorkerRequest::MigrateHost(new_host_id, reply_tx))
                    .map_err(|_| Error::fatal(Kind::InvalidState))?;
                reply_rx.recv().map_err(|_| Error::fatal(Kind::InvalidState))?
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Mode::Threaded { stop, handle, .. } = &mut self.mode {
            stop.store(true, Ordering::Relaxed);
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcDef;

    struct NoopRegistry;
    impl ProtocolRegistry for NoopRegistry {
        fn lookup(&self, id: RpcId) -> Option<RpcDef> {
            if id == RpcId(30) {
                Some(RpcDef { permission: Permission::ClientsToAll, caller_injection_index: None, callee_injection_index: None })
            } else {
                None
            }
        }

        fn dispatch(&self, _id: RpcId, _ctx: RpcContext, _args: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ping_payload_for_unresolved_request_carries_zero_receive_time() {
        let request = PingRequest {
            source: ClientId(1),
            target: ClientId(2),
            send_time_millis: 100,
            receive_time_millis: 0,
            response_time_millis: 0,
            resolved: false,
            failed: false,
        };
        let bytes = ping_payload_bytes(&request).unwrap();
        let decoded = PingPayload::read(&mut &bytes[..]).unwrap();
        assert_eq!(decoded.receive_time_millis, 0);
        assert_eq!(decoded.send_time_millis, 100);
    }

    #[test]
    fn registry_lookup_rejects_unknown_rpc() {
        let registry = NoopRegistry;
        assert!(registry.lookup(RpcId(999)).is_none());
        assert!(registry.lookup(RpcId(30)).is_some());
    }
}
