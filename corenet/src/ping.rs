//! Ping subsystem (spec §4.7): round-trip latency measurement riding the reserved RPC id 8 over
//! the stream transport. `PingList` is the small stateful helper named in spec §2 item 9 — one
//! outstanding request per target, expiring after [`PING_TIMEOUT_MILLIS`].

use crate::ids::ClientId;
use crate::rpc::PingPayload;
use std::collections::HashMap;

pub const PING_TIMEOUT_MILLIS: i64 = 3000;

/// A single outstanding (or resolved) ping (spec §3 `PingRequest`).
#[derive(Debug, Clone, Copy)]
pub struct PingRequest {
    pub source: ClientId,
    pub target: ClientId,
    pub send_time_millis: i64,
    pub receive_time_millis: i64,
    pub response_time_millis: i64,
    pub resolved: bool,
    pub failed: bool,
}

impl PingRequest {
    /// Round-trip time in milliseconds. Only meaningful once `resolved` and not `failed`.
    #[inline]
    pub fn ping_millis(&self) -> i64 {
        self.response_time_millis - self.send_time_millis
    }

    fn new(source: ClientId, target: ClientId, now_millis: i64) -> PingRequest {
        PingRequest {
            source,
            target,
            send_time_millis: now_millis,
            receive_time_millis: 0,
            response_time_millis: 0,
            resolved: false,
            failed: false,
        }
    }

    /// `ping(self)` is a local short-circuit: all three times collapse to `now` and the request
    /// resolves immediately without touching a socket (spec §4.7).
    fn new_self(source: ClientId, now_millis: i64) -> PingRequest {
        PingRequest {
            source,
            target: source,
            send_time_millis: now_millis,
            receive_time_millis: now_millis,
            response_time_millis: now_millis,
            resolved: true,
            failed: false,
        }
    }
}

/// Tracks outstanding ping requests keyed by target, and the ordered subscriber list fired when
/// a request resolves — the "event delegate" pattern (spec §9 REDESIGN FLAGS) collapsed to an
/// explicit `subscribe`d callback list owned by the connection rather than a language delegate.
pub struct PingList {
    requests: HashMap<ClientId, PingRequest>,
    on_resolved: Vec<Box<dyn Fn(&PingRequest) + Send + Sync>>,
}

impl PingList {
    pub fn new() -> PingList {
        PingList { requests: HashMap::new(), on_resolved: Vec::new() }
    }

    pub fn subscribe(&mut self, callback: Box<dyn Fn(&PingRequest) + Send + Sync>) {
        self.on_resolved.push(callback);
    }

    /// Starts a ping from `source` to `target`. Self-pings resolve immediately in-place; the
    /// caller is still responsible for not enqueueing a wire RPC in that case (see
    /// [`PingRequest::resolved`]).
    pub fn start(&mut self, source: ClientId, target: ClientId, now_millis: i64) -> PingRequest {
        let request = if target == source {
            PingRequest::new_self(source, now_millis)
        } else {
            PingRequest::new(source, target, now_millis)
        };

        self.requests.insert(target, request);
        if request.resolved {
            self.notify(&request);
        }
        request
    }

    /// The target endpoint stamps `receiveTime` and echoes the payload back unchanged except for
    /// that field (spec §4.7). Produces the outbound echo payload.
    pub fn echo(payload: PingPayload, now_millis: i64) -> PingPayload {
        PingPayload { receive_time_millis: now_millis, ..payload }
    }

    /// The source endpoint resolves the request on receipt of the echoed payload.
    pub fn resolve(&mut self, payload: PingPayload, now_millis: i64) -> Option<PingRequest> {
        let mut request = self.requests.remove(&payload.target)?;
        request.receive_time_millis = payload.receive_time_millis;
        request.response_time_millis = now_millis;
        request.resolved = true;
        request.failed = false;
        self.notify(&request);
        Some(request)
    }

    /// Sweeps requests older than [`PING_TIMEOUT_MILLIS`], marking them failed and resolved and
    /// firing the callback list. Called once per dispatch pass alongside the pending-admission
    /// sweep.
    pub fn sweep_expired(&mut self, now_millis: i64) {
        let expired: Vec<ClientId> = self
            .requests
            .iter()
            .filter(|(_, req)| !req.resolved && now_millis - req.send_time_millis >= PING_TIMEOUT_MILLIS)
            .map(|(target, _)| *target)
            .collect();

        for target in expired {
            if let Some(mut request) = self.requests.remove(&target) {
                request.resolved = true;
                request.failed = true;
                self.notify(&request);
            }
        }
    }

    fn notify(&self, request: &PingRequest) {
        for callback in &self.on_resolved {
            callback(request);
        }
    }
}

impl Default for PingList {
    fn default() -> Self {
        PingList::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_ping_resolves_immediately_with_zero_latency() {
        let mut list = PingList::new();
        let request = list.start(ClientId(1), ClientId(1), 1_000);
        assert!(request.resolved);
        assert!(!request.failed);
        assert_eq!(request.ping_millis(), 0);
    }

    #[test]
    fn remote_ping_resolves_on_echo() {
        let mut list = PingList::new();
        let started = list.start(ClientId(2), ClientId(3), 1_000);
        assert!(!started.resolved);

        let echoed = PingList::echo(
            PingPayload {
                source: ClientId(2),
                target: ClientId(3),
                send_time_millis: started.send_time_millis,
                receive_time_millis: 0,
            },
            1_050,
        );
        assert_eq!(echoed.receive_time_millis, 1_050);

        let resolved = list.resolve(echoed, 1_090).unwrap();
        assert!(resolved.resolved);
        assert!(!resolved.failed);
        assert_eq!(resolved.ping_millis(), 90);
    }

    #[test]
    fn expired_requests_fail_after_timeout() {
        let mut list = PingList::new();
        list.start(ClientId(2), ClientId(3), 0);

        list.sweep_expired(PING_TIMEOUT_MILLIS - 1);
        assert!(list.requests.contains_key(&ClientId(3)));

        list.sweep_expired(PING_TIMEOUT_MILLIS);
        assert!(!list.requests.contains_key(&ClientId(3)));
    }

    #[test]
    fn resolved_callback_fires() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        let mut list = PingList::new();
        list.subscribe(Box::new(move |_req| fired_clone.store(true, Ordering::SeqCst)));
        list.start(ClientId(1), ClientId(1), 0);

        assert!(fired.load(Ordering::SeqCst));
    }
}
