#[macro_use]
extern crate criterion;

extern crate corenet;

use corenet::packet::{Packet, Transport};
use corenet::transform::huffman::HuffmanTransform;
use corenet::transform::Transform;
use criterion::black_box;
use criterion::Criterion;

fn compress_repetitive(c: &mut Criterion) {
    let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog ".iter().cycle().take(4096).copied().collect();

    c.bench_function("huffman encode repetitive", move |b| {
        let transform = HuffmanTransform;
        b.iter(|| {
            let mut packet = Packet::new_outbound(Transport::Stream, 8192);
            black_box(transform.encode(&mut packet, data.clone()).unwrap());
        })
    });
}

fn compress_random(c: &mut Criterion) {
    let data: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();

    c.bench_function("huffman encode high entropy", move |b| {
        let transform = HuffmanTransform;
        b.iter(|| {
            let mut packet = Packet::new_outbound(Transport::Stream, 8192);
            black_box(transform.encode(&mut packet, data.clone()).unwrap());
        })
    });
}

fn decode_roundtrip(c: &mut Criterion) {
    let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog ".iter().cycle().take(4096).copied().collect();
    let transform = HuffmanTransform;
    let mut packet = Packet::new_outbound(Transport::Stream, 8192);
    let encoded = transform.encode(&mut packet, data.clone()).unwrap();

    c.bench_function("huffman decode repetitive", move |b| {
        b.iter(|| {
            black_box(transform.decode(&mut packet, encoded.clone()).unwrap());
        })
    });
}

criterion_group!(benches, compress_repetitive, compress_random, decode_roundtrip);
criterion_main!(benches);
