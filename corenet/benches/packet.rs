#[macro_use]
extern crate criterion;

extern crate corenet;

use corenet::packet::{Packet, Transport};
use criterion::black_box;
use criterion::Criterion;

fn build_and_emit(c: &mut Criterion) {
    let payload = vec![7u8; 256];

    c.bench_function("build small packet", move |b| {
        b.iter(|| {
            let mut packet = Packet::new_outbound(Transport::Stream, 4096);
            packet.reserve(payload.len()).unwrap().copy_from_slice(&payload);
            black_box(packet.emit().unwrap());
        })
    });
}

fn build_fragmented(c: &mut Criterion) {
    let payload = vec![9u8; 4000];

    c.bench_function("build fragmented packet", move |b| {
        b.iter(|| {
            let mut packet = Packet::new_outbound(Transport::Stream, 512);
            packet.reserve(payload.len()).unwrap().copy_from_slice(&payload);
            black_box(packet.emit().unwrap());
        })
    });
}

fn ingest_roundtrip(c: &mut Criterion) {
    let payload = vec![3u8; 512];
    let mut producer = Packet::new_outbound(Transport::Stream, 4096);
    producer.reserve(payload.len()).unwrap().copy_from_slice(&payload);
    let wire = producer.emit().unwrap().to_vec();

    c.bench_function("ingest full packet", move |b| {
        b.iter(|| {
            let mut packet = Packet::new_inbound(Transport::Stream, 4096);
            packet.ingest(&wire, 0).unwrap();
            black_box(packet.is_complete());
        })
    });
}

criterion_group!(benches, build_and_emit, build_fragmented, ingest_roundtrip);
criterion_main!(benches);
