//! Connection runtime for real-time multiplayer sessions.
//!
//! Three interoperable endpoint roles — server, client, relay — exchange typed RPCs and
//! spawn/despawn notifications for a shared set of replicated objects over one TCP stream and
//! one UDP flow per peer. This crate owns the wire framing, the per-role state machines, RPC
//! dispatch and relay, the replicated-object spawner, ping, and host migration. It does not own
//! scene-graph replication, matchmaking, or RPC-table code generation — those are external
//! collaborators that hand this crate a `ProtocolRegistry` and consume its spawn/despawn and RPC
//! events.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod container;
pub mod error;
pub mod ids;
pub mod logger;
pub mod packet;
pub mod ping;
pub mod rpc;
pub mod spawner;
pub mod transform;

pub use config::{Config, Role};
pub use error::{Error, Result};
pub use ids::{ClientId, NetworkId, RpcId, StringId};

/// Current wall-clock time in milliseconds, the resolution every timestamped wire field and
/// ping/admission deadline in this crate uses.
#[inline]
pub fn time_millis() -> i64 {
    flux::time::timestamp_millis()
}
