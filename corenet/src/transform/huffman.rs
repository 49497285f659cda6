//! Canonical Huffman compressor (spec §4.3), registered at [`super::PRIORITY_COMPRESSION`].
//!
//! Wire format of a compressed message region:
//!
//! ```text
//! i32 originalMessageLength
//! i32 compressedBitLength   // bit count of the *data* stream, tree excluded
//! u8  uniqueSymbolCount
//! <tree bits><data bits>    // one continuous bitstream, byte-aligned only at the very end
//! ```
//!
//! The tree is serialized pre-order: a `1` bit marks a leaf followed by its 8-bit symbol, a `0`
//! bit marks an internal node followed by its left then right subtree. Because the full tree is
//! on the wire, the decoder never needs a separate canonical-length table — it walks the same
//! tree bit by bit to decode each symbol.
//!
//! If the compressed form (header included) is not strictly shorter than the input, the stage
//! leaves the input untouched and clears the packet's compression flag — this is why `encode`
//! must run after the message region is finalized but before the packet header is written.

use super::Transform;
use crate::error::{Error, Kind, Result};
use crate::packet::Packet;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::io::Cursor;

const HEADER_LEN: usize = 4 + 4 + 1;

#[derive(Debug, Clone, Eq, PartialEq)]
enum Node {
    Leaf(u8),
    Internal(Box<Node>, Box<Node>),
}

struct HeapItem(u32, u32, Node);

impl Eq for HeapItem {}
impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0).then_with(|| other.1.cmp(&self.1))
    }
}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn build_tree(symbols: &[u8], freq: &[u32; 256]) -> Node {
    let mut heap = BinaryHeap::new();
    let mut seq = 0u32;
    for &symbol in symbols {
        heap.push(HeapItem(freq[symbol as usize].max(1), seq, Node::Leaf(symbol)));
        seq += 1;
    }
    while heap.len() > 1 {
        let a = heap.pop().expect("checked len > 1");
        let b = heap.pop().expect("checked len > 1");
        heap.push(HeapItem(a.0 + b.0, seq, Node::Internal(Box::new(a.2), Box::new(b.2))));
        seq += 1;
    }
    heap.pop().expect("at least one symbol").2
}

fn assign_codes(node: &Node, prefix: Vec<bool>, codes: &mut HashMap<u8, Vec<bool>>) {
    match node {
        Node::Leaf(symbol) => {
            codes.insert(*symbol, if prefix.is_empty() { vec![false] } else { prefix });
        }
        Node::Internal(left, right) => {
            let mut left_prefix = prefix.clone();
            left_prefix.push(false);
            assign_codes(left, left_prefix, codes);

            let mut right_prefix = prefix;
            right_prefix.push(true);
            assign_codes(right, right_prefix, codes);
        }
    }
}

fn count_leaves(node: &Node) -> usize {
    match node {
        Node::Leaf(_) => 1,
        Node::Internal(left, right) => count_leaves(left) + count_leaves(right),
    }
}

struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    fn new() -> BitWriter {
        BitWriter { bytes: Vec::new(), bit_len: 0 }
    }

    fn push_bit(&mut self, bit: bool) {
        let byte_index = self.bit_len / 8;
        if byte_index == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte_index] |= 1 << (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    fn bit_len(&self) -> usize {
        self.bit_len
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> BitReader<'a> {
        BitReader { bytes, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<bool> {
        let byte_index = self.pos / 8;
        if byte_index >= self.bytes.len() {
            return Err(Error::fatal(Kind::DecodeFailure));
        }
        let bit = (self.bytes[byte_index] >> (self.pos % 8)) & 1 != 0;
        self.pos += 1;
        Ok(bit)
    }
}

fn write_tree(node: &Node, writer: &mut BitWriter) {
    match node {
        Node::Leaf(symbol) => {
            writer.push_bit(true);
            for i in 0..8 {
                writer.push_bit((symbol >> i) & 1 != 0);
            }
        }
        Node::Internal(left, right) => {
            writer.push_bit(false);
            write_tree(left, writer);
            write_tree(right, writer);
        }
    }
}

fn read_tree(reader: &mut BitReader) -> Result<Node> {
    if reader.read_bit()? {
        let mut symbol = 0u8;
        for i in 0..8 {
            if reader.read_bit()? {
                symbol |= 1 << i;
            }
        }
        Ok(Node::Leaf(symbol))
    } else {
        let left = read_tree(reader)?;
        let right = read_tree(reader)?;
        Ok(Node::Internal(Box::new(left), Box::new(right)))
    }
}

fn decode_symbol(root: &Node, reader: &mut BitReader) -> Result<(u8, usize)> {
    let mut node = root;
    let mut consumed = 0;
    loop {
        match node {
            Node::Leaf(symbol) => return Ok((*symbol, consumed)),
            Node::Internal(left, right) => {
                node = if reader.read_bit()? { right } else { left };
                consumed += 1;
            }
        }
    }
}

pub struct HuffmanTransform;

impl Transform for HuffmanTransform {
    fn priority(&self) -> i32 {
        super::PRIORITY_COMPRESSION
    }

    fn name(&self) -> &'static str {
        "huffman"
    }

    fn encode(&self, packet: &mut Packet, input: Vec<u8>) -> Result<Vec<u8>> {
        if input.is_empty() {
            packet.header.set_compression_enabled(false);
            return Ok(input);
        }

        let mut freq = [0u32; 256];
        for &byte in &input {
            freq[byte as usize] += 1;
        }

        let mut symbols: Vec<u8> = (0u16..256).filter(|&i| freq[i as usize] > 0).map(|i| i as u8).collect();
        if symbols.len() == 1 {
            let dummy = if symbols[0] == 0 { 1 } else { 0 };
            symbols.push(dummy);
        }

        let tree = build_tree(&symbols, &freq);
        let mut codes = HashMap::new();
        assign_codes(&tree, Vec::new(), &mut codes);

        let mut writer = BitWriter::new();
        write_tree(&tree, &mut writer);
        let tree_bit_len = writer.bit_len();

        for &byte in &input {
            for &bit in &codes[&byte] {
                writer.push_bit(bit);
            }
        }
        let data_bit_len = writer.bit_len() - tree_bit_len;

        let mut out = Vec::with_capacity(HEADER_LEN + writer.bytes.len());
        out.write_i32::<LittleEndian>(input.len() as i32)?;
        out.write_i32::<LittleEndian>(data_bit_len as i32)?;
        out.write_u8(symbols.len() as u8)?;
        out.extend_from_slice(&writer.bytes);

        if out.len() >= input.len() {
            packet.header.set_compression_enabled(false);
            return Ok(input);
        }

        packet.header.set_compression_enabled(true);
        Ok(out)
    }

    fn decode(&self, packet: &mut Packet, input: Vec<u8>) -> Result<Vec<u8>> {
        if !packet.header.compression_enabled() {
            return Ok(input);
        }
        if input.len() < HEADER_LEN {
            return Err(Error::fatal(Kind::DecodeFailure));
        }

        let mut cursor = Cursor::new(&input);
        let original_len = cursor.read_i32::<LittleEndian>()? as usize;
        let data_bit_len = cursor.read_i32::<LittleEndian>()? as usize;
        let unique_symbol_count = cursor.read_u8()? as usize;

        let mut reader = BitReader::new(&input[HEADER_LEN..]);
        let tree = read_tree(&mut reader)?;
        if count_leaves(&tree) != unique_symbol_count {
            return Err(Error::fatal(Kind::DecodeFailure));
        }

        let mut output = Vec::with_capacity(original_len);
        let mut bits_consumed = 0;
        while bits_consumed < data_bit_len {
            let (symbol, consumed) = decode_symbol(&tree, &mut reader)?;
            output.push(symbol);
            bits_consumed += consumed;
        }

        if output.len() != original_len || bits_consumed != data_bit_len {
            return Err(Error::fatal(Kind::DecodeFailure));
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, Transport};

    fn roundtrip(data: &[u8]) -> (Vec<u8>, bool) {
        let transform = HuffmanTransform;
        let mut packet = Packet::new_outbound(Transport::Stream, 4096);

        let encoded = transform.encode(&mut packet, data.to_vec()).unwrap();
        let was_compressed = packet.header.compression_enabled();

        let decoded = transform.decode(&mut packet, encoded).unwrap();
        (decoded, was_compressed)
    }

    #[test]
    fn compresses_repetitive_payload() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_vec();
        let (decoded, compressed) = roundtrip(&data);
        assert_eq!(decoded, data);
        assert!(compressed);
    }

    #[test]
    fn skips_compression_when_not_shorter() {
        let data = vec![7u8];
        let (decoded, compressed) = roundtrip(&data);
        assert_eq!(decoded, data);
        assert!(!compressed);
    }

    #[test]
    fn handles_single_distinct_symbol() {
        let data = vec![9u8; 200];
        let (decoded, _) = roundtrip(&data);
        assert_eq!(decoded, data);
    }

    #[test]
    fn handles_empty_payload() {
        let (decoded, compressed) = roundtrip(&[]);
        assert!(decoded.is_empty());
        assert!(!compressed);
    }

    #[test]
    fn handles_all_256_byte_values() {
        let data: Vec<u8> = (0..=255u8).cycle().take(2000).collect();
        let (decoded, _) = roundtrip(&data);
        assert_eq!(decoded, data);
    }
}
