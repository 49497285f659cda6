//! Pluggable transform pipeline (spec §4.2): an ordered list of byte-to-byte stages applied to
//! a packet's message region, `encode` running low-to-high priority just before the packet is
//! emitted and `decode` running high-to-low just after it is fully ingested. Three priority
//! slots are reserved so the built-ins and app-supplied stages compose predictably:
//!
//! - [`PRIORITY_BANDWIDTH_IN`] (0): records the pre-compression (logical) byte count — the
//!   last stage undone on decode, so it sees the fully decompressed bytes.
//! - [`PRIORITY_COMPRESSION`] (100): the canonical Huffman compressor (see [`huffman`]).
//! - [`PRIORITY_BANDWIDTH_OUT`] (200): records the post-compression (wire) byte count — the
//!   first stage undone on decode, so it sees the bytes nearest the wire.
//!
//! Everything between 0 and 200 is free for app-supplied stages registered via
//! [`Pipeline::register`].

pub mod bandwidth;
pub mod huffman;

use crate::error::Result;
use crate::packet::Packet;

pub const PRIORITY_BANDWIDTH_IN: i32 = 0;
pub const PRIORITY_COMPRESSION: i32 = 100;
pub const PRIORITY_BANDWIDTH_OUT: i32 = 200;

/// A single pipeline stage. `encode` runs on the outbound message region before the packet is
/// emitted; `decode` runs on the inbound message region after a full packet has been ingested.
/// Stages that have nothing to do (e.g. compression skipped because it didn't shrink anything)
/// return the input unchanged and flip no flag — the pipeline doesn't force a stage to mark
/// itself active.
pub trait Transform: Send + Sync {
    fn priority(&self) -> i32;
    fn name(&self) -> &'static str;
    fn encode(&self, packet: &mut Packet, input: Vec<u8>) -> Result<Vec<u8>>;
    fn decode(&self, packet: &mut Packet, input: Vec<u8>) -> Result<Vec<u8>>;
}

/// Stages sorted by priority, ascending. Encode runs low-to-high; decode runs high-to-low, so
/// the byte transformation applied last on the way out is the first one undone on the way in.
pub struct Pipeline {
    stages: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline { stages: Vec::new() }
    }

    pub fn register(&mut self, stage: Box<dyn Transform>) {
        let priority = stage.priority();
        let position = self.stages.iter().position(|s| s.priority() > priority);
        match position {
            Some(index) => self.stages.insert(index, stage),
            None => self.stages.push(stage),
        }
    }

    pub fn encode(&self, packet: &mut Packet) -> Result<()> {
        let mut data = packet.message_region().to_vec();
        for stage in &self.stages {
            data = stage.encode(packet, data)?;
        }
        packet.set_message_region(&data);
        Ok(())
    }

    pub fn decode(&self, packet: &mut Packet) -> Result<()> {
        let mut data = packet.message_region().to_vec();
        for stage in self.stages.iter().rev() {
            data = stage.decode(packet, data)?;
        }
        packet.set_message_region(&data);
        Ok(())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, Transport};

    struct Reverse;
    impl Transform for Reverse {
        fn priority(&self) -> i32 {
            50
        }
        fn name(&self) -> &'static str {
            "reverse"
        }
        fn encode(&self, _packet: &mut Packet, mut input: Vec<u8>) -> Result<Vec<u8>> {
            input.reverse();
            Ok(input)
        }
        fn decode(&self, _packet: &mut Packet, mut input: Vec<u8>) -> Result<Vec<u8>> {
            input.reverse();
            Ok(input)
        }
    }

    #[test]
    fn pipeline_roundtrips_through_custom_stage() {
        let mut pipeline = Pipeline::new();
        pipeline.register(Box::new(Reverse));

        let mut packet = Packet::new_outbound(Transport::Stream, 1024);
        packet.reserve(4).unwrap().copy_from_slice(b"data");
        packet.emit().unwrap();

        pipeline.encode(&mut packet).unwrap();
        pipeline.decode(&mut packet).unwrap();

        let messages: Vec<_> = packet.iterate_messages().collect();
        assert_eq!(messages, vec![&b"data"[..]]);
    }
}
