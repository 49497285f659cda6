//! Buffer role (spec §4.5): three implementations of a common contract — server, client, relay
//! — each owning socket I/O, admission, the client table, and ping routing for one endpoint.
//!
//! The per-role state machines are kept deliberately thin networking shells around the wire
//! layer (`packet`, `rpc`) and the stateful helpers in this module (`client_table`, `pending`):
//! all three roles share the exact same admission handshake, differing only in who is allowed to
//! become authority and what happens to application RPCs once admitted.

pub mod client;
pub mod client_table;
pub mod pending;
pub mod relay;
pub mod server;

use crate::error::Result;
use crate::ids::{ClientId, NetworkId, RpcId};
use crate::ping::PingRequest;
use crate::rpc::{ClientIdAssignment, DespawnPayload, HostMigrationPayload, Permission, SpawnPayload};

/// An event decoded off the wire and handed to the connection façade for dispatch (spec §2 data
/// flow). `Rpc` covers both reserved ids the façade hasn't already folded into a structured
/// variant (currently none remain unfolded) and every user id (`>= 30`).
#[derive(Debug, Clone)]
pub enum InboundEvent {
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    LocalClientConnected(ClientIdAssignment),
    ObjectSpawn(SpawnPayload),
    ObjectDespawn(DespawnPayload),
    HostMigration(HostMigrationPayload),
    LocalDisconnect,
    Rpc { rpc_id: RpcId, caller: ClientId, callee: ClientId, target: NetworkId, args: Vec<u8> },
}

impl InboundEvent {
    /// Client-event messages (connect/disconnect/host-migration/spawn/despawn) are dispatched
    /// strictly before application RPCs received in the same batch (spec §5 ordering guarantee).
    pub fn is_client_event(&self) -> bool {
        !matches!(self, InboundEvent::Rpc { .. })
    }
}

/// Who an outbound control message is addressed to. Control messages bypass the RPC permission
/// table entirely (spec §4.5.2 permissions only govern ids `>= 30`).
#[derive(Debug, Clone, Copy)]
pub enum ControlTarget {
    All,
    AllExcept(ClientId),
    One(ClientId),
}

/// Common contract every role implements (spec §4.5).
pub trait Buffer {
    /// Drains both sockets non-blocking and returns every decoded inbound event in arrival
    /// order, client-event messages first (see [`InboundEvent::is_client_event`]).
    fn receive(&mut self) -> Result<Vec<InboundEvent>>;

    /// Flushes every per-peer outbound packet.
    fn send(&mut self) -> Result<()>;

    /// Queues a reserved control message. `payload` is the already-encoded argument region.
    fn enqueue_control(&mut self, target: ControlTarget, rpc_id: RpcId, payload: Vec<u8>) -> Result<()>;

    /// Queues an application RPC (`rpc_id >= 30`), permission-checked and relay-routed per
    /// §4.5.1/§4.5.2.
    fn enqueue_rpc(
        &mut self,
        rpc_id: RpcId,
        caller: ClientId,
        callee: ClientId,
        target: NetworkId,
        permission: Permission,
        args: Vec<u8>,
    ) -> Result<()>;

    fn disconnect(&mut self);
    fn disconnect_client(&mut self, client_id: ClientId);

    /// Only meaningful for the relay role; other roles return `Err(Kind::InvalidState)`.
    fn migrate_host(&mut self, new_host_id: ClientId) -> Result<()>;

    fn ping(&mut self, target: ClientId) -> PingRequest;

    /// Registers a callback fired whenever a ping resolves or times out, on whichever thread
    /// calls [`Buffer::receive`] (the background worker, in threaded mode).
    fn subscribe_ping(&mut self, callback: Box<dyn Fn(&PingRequest) + Send + Sync>);

    fn local_id(&self) -> ClientId;
    fn authority(&self) -> ClientId;
}
