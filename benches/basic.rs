use criterion::{criterion_group, criterion_main, Criterion};
use persistent_serial::{LineFramer, Packet, PacketBuffer};
use std::hint::black_box;
use std::time::Duration;

fn sample_stream() -> Vec<u8> {
    (0..500)
        .map(|i| format!("{{\"seq\":{i},\"temp\":21.5,\"rh\":40}}\r\n"))
        .collect::<String>()
        .into_bytes()
}

pub fn bench_framing(c: &mut Criterion) {
    let stream = sample_stream();
    c.bench_function("frame_500_lines_in_64_byte_chunks", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            let mut count = 0;
            for chunk in stream.chunks(64) {
                count += framer.push(black_box(chunk)).len();
            }
            black_box(count);
        })
    });
}

pub fn bench_packet_buffer(c: &mut Criterion) {
    let packets: Vec<Packet> = (0..1000).map(|i| Packet::new(format!("line {i}"))).collect();
    c.bench_function("buffer_push_1000_with_eviction", |b| {
        b.iter(|| {
            let mut buffer = PacketBuffer::new();
            for packet in &packets {
                black_box(buffer.push(packet.clone()));
            }
            black_box(buffer.len());
        })
    });
}

pub fn bench_decode(c: &mut Criterion) {
    let json = Packet::new(r#"{"seq":1,"temp":21.5}"#);
    let fields = Packet::new("1, 2, 3, 4, 5");
    c.bench_function("decode_json_and_fields", |b| {
        b.iter(|| {
            black_box(json.decode());
            black_box(fields.decode());
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_framing, bench_packet_buffer, bench_decode
}
criterion_main!(benches);
