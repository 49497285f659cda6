//! RPC wire layout, permission enforcement, and the reserved control-message table (spec §3,
//! §4.4, §6). The argument codec itself is deliberately thin: per REDESIGN FLAGS, reflection-
//! driven argument encoding is replaced with a caller-supplied ordered argument list
//! ([`ArgWrite`] objects) on the write side, and an app-owned [`ProtocolRegistry`] that already
//! knows its own RPC argument shapes on the read side — this crate never inspects argument
//! types at runtime.

use crate::error::{Error, Kind, Result};
use crate::ids::{ClientId, Encodable, NetworkId, RpcId, StringId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

/// Ids below [`RpcId::FIRST_USER_RPC`] are reserved; each has a fixed meaning and transport
/// (spec §6).
pub const RPC_NONE: RpcId = RpcId(0);
pub const RPC_CLIENT_CONNECTED: RpcId = RpcId(1);
pub const RPC_LOCAL_CLIENT_CONNECTED: RpcId = RpcId(2);
pub const RPC_CLIENT_DISCONNECTED: RpcId = RpcId(3);
pub const RPC_NETWORK_OBJECT_SPAWN: RpcId = RpcId(4);
pub const RPC_NETWORK_OBJECT_DESPAWN: RpcId = RpcId(5);
pub const RPC_CONNECTION_REQUEST: RpcId = RpcId(6);
pub const RPC_HOST_MIGRATION: RpcId = RpcId(7);
pub const RPC_PING_REQUEST: RpcId = RpcId(8);

/// Object-safe sibling of [`Encodable`] so callers can pass a heterogeneous argument list by
/// reference (`&[&dyn ArgWrite]`) without this crate knowing their concrete types.
pub trait ArgWrite {
    fn arg_len(&self) -> usize;
    fn write_arg(&self, stream: &mut dyn Write) -> Result<()>;
}

impl<T: Encodable> ArgWrite for T {
    fn arg_len(&self) -> usize {
        self.encoded_len()
    }

    fn write_arg(&self, stream: &mut dyn Write) -> Result<()> {
        self.write(stream)
    }
}

/// `[u32 rpcId][u32 callerId][u32 calleeId][u32 targetNetworkId][args…]`. The target field is
/// omitted for reserved (control) ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcHeader {
    pub rpc_id: RpcId,
    pub caller: ClientId,
    pub callee: ClientId,
    pub target: NetworkId,
}

/// Writes every argument in `args`, skipping whichever positions are injected from the
/// header/context on the receiving side rather than encoded on the wire. Shared by
/// [`encode_message`] (full header + args) and callers that already hold a header-less argument
/// region, such as the connection façade re-encoding a user RPC call.
pub fn encode_args(
    args: &[&dyn ArgWrite],
    caller_injection_index: Option<usize>,
    callee_injection_index: Option<usize>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (index, arg) in args.iter().enumerate() {
        if Some(index) == caller_injection_index || Some(index) == callee_injection_index {
            continue;
        }
        arg.write_arg(&mut out)?;
    }
    Ok(out)
}

/// Writes the RPC header followed by every argument in `args`, skipping whichever positions are
/// injected from the header/context on the receiving side rather than encoded on the wire.
pub fn encode_message(
    header: RpcHeader,
    args: &[&dyn ArgWrite],
    caller_injection_index: Option<usize>,
    callee_injection_index: Option<usize>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(header.rpc_id.0)?;
    out.write_u32::<LittleEndian>(header.caller.0)?;
    out.write_u32::<LittleEndian>(header.callee.0)?;
    if !header.rpc_id.is_control() {
        out.write_u32::<LittleEndian>(header.target.0)?;
    }
    out.extend_from_slice(&encode_args(args, caller_injection_index, callee_injection_index)?);
    Ok(out)
}

/// Parses the fixed RPC header and returns it along with the byte offset where the argument
/// region begins.
pub fn decode_header(bytes: &[u8]) -> Result<(RpcHeader, usize)> {
    let mut cursor = Cursor::new(bytes);
    let rpc_id = RpcId(cursor.read_u32::<LittleEndian>()?);
    let caller = ClientId(cursor.read_u32::<LittleEndian>()?);
    let callee = ClientId(cursor.read_u32::<LittleEndian>()?);
    let target = if rpc_id.is_control() {
        NetworkId::NONE
    } else {
        NetworkId(cursor.read_u32::<LittleEndian>()?)
    };
    Ok((RpcHeader { rpc_id, caller, callee, target }, cursor.position() as usize))
}

/// RPC permission classes (spec §4.5.2), enforced on send and again on relay.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Permission {
    AuthorityToClients,
    ClientsToAuthority,
    ClientsToClients,
    ClientsToAll,
    AnyToAll,
}

impl Permission {
    /// Whether `caller` is allowed to originate an RPC of this class, given the session's
    /// current authority id (`ClientId::NONE` for a server session).
    pub fn caller_allowed(self, caller: ClientId, authority: ClientId) -> bool {
        match self {
            Permission::AuthorityToClients => caller == authority,
            Permission::ClientsToAuthority | Permission::ClientsToClients | Permission::ClientsToAll => {
                caller != authority
            }
            Permission::AnyToAll => true,
        }
    }

    /// Whether `callee` is a valid target for this class.
    pub fn callee_allowed(self, callee: ClientId, caller: ClientId, authority: ClientId) -> bool {
        match self {
            Permission::AuthorityToClients => callee != authority,
            Permission::ClientsToAuthority => callee == authority,
            Permission::ClientsToClients => callee != authority && callee != caller,
            Permission::ClientsToAll | Permission::AnyToAll => true,
        }
    }
}

/// Per-`rpcId` metadata an app's generated registry supplies. The core only needs enough to
/// enforce permissions and relay policy; argument decoding/dispatch stays with the app.
#[derive(Debug, Clone, Copy)]
pub struct RpcDef {
    pub permission: Permission,
    pub caller_injection_index: Option<usize>,
    pub callee_injection_index: Option<usize>,
}

/// Context handed to a registry's dispatch routine: the parts of the header that are recovered
/// rather than re-read from the argument bytes.
#[derive(Debug, Clone, Copy)]
pub struct RpcContext {
    pub caller: ClientId,
    pub callee: ClientId,
    pub target: NetworkId,
}

/// The RPC table collaborator named in spec §9: maps `rpcId` to its permission metadata and
/// dispatches decoded argument bytes to application code. Produced externally (by a code
/// generator or hand-written registration); this crate only consumes it.
pub trait ProtocolRegistry: Send + Sync {
    fn lookup(&self, id: RpcId) -> Option<RpcDef>;
    fn dispatch(&self, id: RpcId, ctx: RpcContext, args: &[u8]) -> Result<()>;
}

/// `ConnectionRequest` payload sent as the first admission datagram (spec §3, §4.5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub app_id: StringId,
    pub session_id: StringId,
    pub is_host: bool,
}

impl Encodable for ConnectionRequest {
    const FIXED_SIZE: Option<usize> = None;

    fn encoded_len(&self) -> usize {
        self.app_id.encoded_len() + self.session_id.encoded_len() + 1
    }

    fn write<W: Write>(&self, stream: &mut W) -> Result<()> {
        self.app_id.write(stream)?;
        self.session_id.write(stream)?;
        self.is_host.write(stream)
    }

    fn read<R: std::io::Read>(stream: &mut R) -> Result<Self> {
        Ok(ConnectionRequest {
            app_id: StringId::read(stream)?,
            session_id: StringId::read(stream)?,
            is_host: bool::read(stream)?,
        })
    }
}

/// Response to the admission datagram: 4 little-endian bytes (spec §6).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionResponseCode {
    Accepted,
    ServerFull,
    IncorrectAppId,
    HostAlreadyAssigned,
    Rejected,
}

impl ConnectionResponseCode {
    pub fn encode(self) -> [u8; 4] {
        let value: i32 = match self {
            ConnectionResponseCode::Accepted => 0,
            ConnectionResponseCode::ServerFull => 1,
            ConnectionResponseCode::IncorrectAppId => 2,
            ConnectionResponseCode::HostAlreadyAssigned => 3,
            ConnectionResponseCode::Rejected => 4,
        };
        value.to_le_bytes()
    }

    pub fn decode(bytes: [u8; 4]) -> Result<ConnectionResponseCode> {
        Ok(match i32::from_le_bytes(bytes) {
            0 => ConnectionResponseCode::Accepted,
            1 => ConnectionResponseCode::ServerFull,
            2 => ConnectionResponseCode::IncorrectAppId,
            3 => ConnectionResponseCode::HostAlreadyAssigned,
            4 => ConnectionResponseCode::Rejected,
            _ => return Err(Error::fatal(Kind::DecodeFailure)),
        })
    }
}

/// `LocalClientConnected` payload (spec §3: `ClientIdAssignment`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIdAssignment {
    pub assigned_id: ClientId,
    pub authority_id: ClientId,
    pub client_secret: u32,
    pub max_clients: u32,
}

impl Encodable for ClientIdAssignment {
    const FIXED_SIZE: Option<usize> = Some(16);

    fn encoded_len(&self) -> usize {
        16
    }

    fn write<W: Write>(&self, stream: &mut W) -> Result<()> {
        self.assigned_id.write(stream)?;
        self.authority_id.write(stream)?;
        self.client_secret.write(stream)?;
        self.max_clients.write(stream)
    }

    fn read<R: std::io::Read>(stream: &mut R) -> Result<Self> {
        Ok(ClientIdAssignment {
            assigned_id: ClientId::read(stream)?,
            authority_id: ClientId::read(stream)?,
            client_secret: u32::read(stream)?,
            max_clients: u32::read(stream)?,
        })
    }
}

/// `ClientConnected` / `ClientDisconnected` payload: just the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientEvent {
    pub id: ClientId,
}

impl Encodable for ClientEvent {
    const FIXED_SIZE: Option<usize> = Some(4);

    fn encoded_len(&self) -> usize {
        4
    }

    fn write<W: Write>(&self, stream: &mut W) -> Result<()> {
        self.id.write(stream)
    }

    fn read<R: std::io::Read>(stream: &mut R) -> Result<Self> {
        Ok(ClientEvent { id: ClientId::read(stream)? })
    }
}

/// `NetworkObjectSpawn` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnPayload {
    pub type_tag: u8,
    pub id: NetworkId,
}

impl Encodable for SpawnPayload {
    const FIXED_SIZE: Option<usize> = Some(5);

    fn encoded_len(&self) -> usize {
        5
    }

    fn write<W: Write>(&self, stream: &mut W) -> Result<()> {
        self.type_tag.write(stream)?;
        self.id.write(stream)
    }

    fn read<R: std::io::Read>(stream: &mut R) -> Result<Self> {
        Ok(SpawnPayload { type_tag: u8::read(stream)?, id: NetworkId::read(stream)? })
    }
}

/// `NetworkObjectDespawn` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DespawnPayload {
    pub id: NetworkId,
}

impl Encodable for DespawnPayload {
    const FIXED_SIZE: Option<usize> = Some(4);

    fn encoded_len(&self) -> usize {
        4
    }

    fn write<W: Write>(&self, stream: &mut W) -> Result<()> {
        self.id.write(stream)
    }

    fn read<R: std::io::Read>(stream: &mut R) -> Result<Self> {
        Ok(DespawnPayload { id: NetworkId::read(stream)? })
    }
}

/// `HostMigration` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMigrationPayload {
    pub new_authority_id: ClientId,
}

impl Encodable for HostMigrationPayload {
    const FIXED_SIZE: Option<usize> = Some(4);

    fn encoded_len(&self) -> usize {
        4
    }

    fn write<W: Write>(&self, stream: &mut W) -> Result<()> {
        self.new_authority_id.write(stream)
    }

    fn read<R: std::io::Read>(stream: &mut R) -> Result<Self> {
        Ok(HostMigrationPayload { new_authority_id: ClientId::read(stream)? })
    }
}

/// Wire payload for RPC id 8, shared by the outbound ping and its echoed reply — the target
/// fills in `receive_time_millis` before sending the same shape back (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPayload {
    pub source: ClientId,
    pub target: ClientId,
    pub send_time_millis: i64,
    pub receive_time_millis: i64,
}

impl Encodable for PingPayload {
    const FIXED_SIZE: Option<usize> = Some(24);

    fn encoded_len(&self) -> usize {
        24
    }

    fn write<W: Write>(&self, stream: &mut W) -> Result<()> {
        self.source.write(stream)?;
        self.target.write(stream)?;
        self.send_time_millis.write(stream)?;
        self.receive_time_millis.write(stream)
    }

    fn read<R: std::io::Read>(stream: &mut R) -> Result<Self> {
        Ok(PingPayload {
            source: ClientId::read(stream)?,
            target: ClientId::read(stream)?,
            send_time_millis: i64::read(stream)?,
            receive_time_millis: i64::read(stream)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_message_omits_target() {
        let header = RpcHeader {
            rpc_id: RPC_CLIENT_CONNECTED,
            caller: ClientId::NONE,
            callee: ClientId(5),
            target: NetworkId::NONE,
        };
        let payload = ClientEvent { id: ClientId(5) };
        let bytes = encode_message(header, &[&payload], None, None).unwrap();
        assert_eq!(bytes.len(), 12 + payload.encoded_len());

        let (decoded, offset) = decode_header(&bytes).unwrap();
        assert_eq!(decoded.rpc_id, RPC_CLIENT_CONNECTED);
        assert_eq!(offset, 12);
    }

    #[test]
    fn user_message_includes_target_and_skips_injected_args() {
        let header = RpcHeader {
            rpc_id: RpcId(30),
            caller: ClientId(1),
            callee: ClientId(2),
            target: NetworkId(9),
        };
        let caller_arg = ClientId(1);
        let payload_arg = 42u32;
        let bytes =
            encode_message(header, &[&caller_arg, &payload_arg], Some(0), None).unwrap();

        let (decoded, offset) = decode_header(&bytes).unwrap();
        assert_eq!(decoded.target, NetworkId(9));
        assert_eq!(&bytes[offset..], &42u32.to_le_bytes());
    }

    #[test]
    fn permission_table_matches_spec() {
        let authority = ClientId(1);
        let client_a = ClientId(2);
        let client_b = ClientId(3);

        assert!(Permission::AuthorityToClients.caller_allowed(authority, authority));
        assert!(!Permission::AuthorityToClients.caller_allowed(client_a, authority));

        assert!(Permission::ClientsToAuthority.caller_allowed(client_a, authority));
        assert!(Permission::ClientsToAuthority.callee_allowed(authority, client_a, authority));
        assert!(!Permission::ClientsToAuthority.callee_allowed(client_b, client_a, authority));

        assert!(Permission::ClientsToClients.callee_allowed(client_b, client_a, authority));
        assert!(!Permission::ClientsToClients.callee_allowed(client_a, client_a, authority));
        assert!(!Permission::ClientsToClients.callee_allowed(authority, client_a, authority));

        assert!(Permission::AnyToAll.caller_allowed(authority, authority));
        assert!(Permission::AnyToAll.caller_allowed(client_a, authority));
    }

    #[test]
    fn connection_response_code_roundtrip() {
        for code in [
            ConnectionResponseCode::Accepted,
            ConnectionResponseCode::ServerFull,
            ConnectionResponseCode::IncorrectAppId,
            ConnectionResponseCode::HostAlreadyAssigned,
            ConnectionResponseCode::Rejected,
        ] {
            assert_eq!(ConnectionResponseCode::decode(code.encode()).unwrap(), code);
        }
    }
}
