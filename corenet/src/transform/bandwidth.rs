//! Bandwidth accounting stages (spec §4.2 reserved priorities 0 and 200). Two distinct stages
//! share one counter pair: [`BandwidthInTransform`] sits at
//! [`super::PRIORITY_BANDWIDTH_IN`] so its `decode` is the *last* thing undone — it sees the
//! fully decompressed message region. [`BandwidthOutTransform`] sits at
//! [`super::PRIORITY_BANDWIDTH_OUT`] so its `encode` is the *last* thing applied — it sees the
//! bytes nearest the wire. Neither stage touches the bytes, it only counts them.

use super::Transform;
use crate::error::Result;
use crate::packet::Packet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct BandwidthCounters {
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl BandwidthCounters {
    pub fn new() -> BandwidthCounters {
        BandwidthCounters::default()
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received_bytes(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Incoming recorder: priority 0, counts on `decode` only.
pub struct BandwidthInTransform {
    counters: BandwidthCounters,
}

impl BandwidthInTransform {
    pub fn new(counters: BandwidthCounters) -> BandwidthInTransform {
        BandwidthInTransform { counters }
    }
}

impl Transform for BandwidthInTransform {
    fn priority(&self) -> i32 {
        super::PRIORITY_BANDWIDTH_IN
    }

    fn name(&self) -> &'static str {
        "bandwidth_in"
    }

    fn encode(&self, _packet: &mut Packet, input: Vec<u8>) -> Result<Vec<u8>> {
        Ok(input)
    }

    fn decode(&self, _packet: &mut Packet, input: Vec<u8>) -> Result<Vec<u8>> {
        self.counters.received.fetch_add(input.len() as u64, Ordering::Relaxed);
        Ok(input)
    }
}

/// Outgoing recorder: priority 200, counts on `encode` only.
pub struct BandwidthOutTransform {
    counters: BandwidthCounters,
}

impl BandwidthOutTransform {
    pub fn new(counters: BandwidthCounters) -> BandwidthOutTransform {
        BandwidthOutTransform { counters }
    }
}

impl Transform for BandwidthOutTransform {
    fn priority(&self) -> i32 {
        super::PRIORITY_BANDWIDTH_OUT
    }

    fn name(&self) -> &'static str {
        "bandwidth_out"
    }

    fn encode(&self, _packet: &mut Packet, input: Vec<u8>) -> Result<Vec<u8>> {
        self.counters.sent.fetch_add(input.len() as u64, Ordering::Relaxed);
        Ok(input)
    }

    fn decode(&self, _packet: &mut Packet, input: Vec<u8>) -> Result<Vec<u8>> {
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Transport;

    #[test]
    fn counts_bytes_on_their_own_direction_only() {
        let counters = BandwidthCounters::new();
        let incoming = BandwidthInTransform::new(counters.clone());
        let outgoing = BandwidthOutTransform::new(counters.clone());
        let mut packet = Packet::new_outbound(Transport::Stream, 1024);

        outgoing.encode(&mut packet, vec![0u8; 10]).unwrap();
        incoming.encode(&mut packet, vec![0u8; 99]).unwrap();
        assert_eq!(counters.sent_bytes(), 10);
        assert_eq!(counters.received_bytes(), 0);

        incoming.decode(&mut packet, vec![0u8; 4]).unwrap();
        outgoing.decode(&mut packet, vec![0u8; 77]).unwrap();
        assert_eq!(counters.received_bytes(), 4);
        assert_eq!(counters.sent_bytes(), 10);
    }
}
