//! Pending-admission tracking (spec §4.1 two-phase admission): a socket that has completed a TCP
//! accept but not yet sent a valid `ConnectionRequest` is not yet a client and has no `ClientId`.
//! This list is what the server and relay sweep once per `receive` pass to reject handshakes that
//! never complete in time (spec §6 `connectionRequestTimeoutMillis`).

use mio::net::TcpStream;
use mio::Token;
use std::time::Instant;

pub struct PendingConnection {
    pub token: Token,
    pub stream: TcpStream,
    pub accepted_at: Instant,
    /// Bytes read so far while waiting for a complete `ConnectionRequest` header + body.
    pub inbound: Vec<u8>,
}

impl PendingConnection {
    pub fn new(token: Token, stream: TcpStream, accepted_at: Instant) -> PendingConnection {
        PendingConnection { token, stream, accepted_at, inbound: Vec::new() }
    }

    pub fn is_expired(&self, now: Instant, timeout_millis: u64) -> bool {
        now.duration_since(self.accepted_at).as_millis() as u64 >= timeout_millis
    }
}

/// The set of sockets currently mid-handshake, keyed by mio `Token` so poll events route
/// straight to the right entry without a linear scan.
pub struct PendingList {
    connections: Vec<PendingConnection>,
}

impl PendingList {
    pub fn new() -> PendingList {
        PendingList { connections: Vec::new() }
    }

    pub fn push(&mut self, conn: PendingConnection) {
        self.connections.push(conn);
    }

    pub fn find_mut(&mut self, token: Token) -> Option<&mut PendingConnection> {
        self.connections.iter_mut().find(|c| c.token == token)
    }

    /// Removes and returns the connection for `token`, if still pending (i.e. not already
    /// admitted or already timed out and evicted).
    pub fn take(&mut self, token: Token) -> Option<PendingConnection> {
        let index = self.connections.iter().position(|c| c.token == token)?;
        Some(self.connections.remove(index))
    }

    /// Evicts and returns every connection that has outstayed `timeout_millis`, for the caller to
    /// deregister from the poll and drop.
    pub fn sweep_expired(&mut self, now: Instant, timeout_millis: u64) -> Vec<PendingConnection> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.connections.len() {
            if self.connections[i].is_expired(now, timeout_millis) {
                expired.push(self.connections.remove(i));
            } else {
                i += 1;
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for PendingList {
    fn default() -> Self {
        PendingList::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expiry_uses_elapsed_duration() {
        let accepted_at = Instant::now();
        let later = accepted_at + Duration::from_millis(5_000);
        let conn_accepted_at = accepted_at;
        assert!(later.duration_since(conn_accepted_at).as_millis() as u64 >= 4_000);
    }
}
