use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use bacnet_mstp::datalink::mstp::{create_frame, FrameReceiver, FrameType, MstpFrame, MSTP_MAX_FRAME_SIZE};
use bacnet_mstp::util::{crc16_mstp, crc8_mstp_header};

fn encode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_frame");
    for size in [0usize, 32, 128, 501] {
        let payload = vec![0xA5u8; size];
        let mut buffer = [0u8; MSTP_MAX_FRAME_SIZE];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                create_frame(
                    &mut buffer,
                    FrameType::BacnetDataNotExpectingReply,
                    black_box(5),
                    black_box(1),
                    black_box(payload),
                )
            })
        });
    }
    group.finish();
}

fn decode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for size in [0usize, 32, 128, 501] {
        let payload = vec![0x3Cu8; size];
        let mut buffer = [0u8; MSTP_MAX_FRAME_SIZE];
        let len = create_frame(&mut buffer, FrameType::BacnetDataNotExpectingReply, 5, 1, &payload)
            .expect("frame fits");
        let wire = buffer[..len].to_vec();
        group.throughput(Throughput::Bytes(len as u64));

        group.bench_with_input(BenchmarkId::new("decode", size), &wire, |b, wire| {
            b.iter(|| MstpFrame::decode(black_box(wire)))
        });

        group.bench_with_input(BenchmarkId::new("receiver", size), &wire, |b, wire| {
            let mut receiver = FrameReceiver::new();
            b.iter(|| {
                for &byte in wire.iter() {
                    black_box(receiver.receive_byte(byte, 0));
                }
                receiver.take_frame()
            })
        });
    }
    group.finish();
}

fn crc_benchmark(c: &mut Criterion) {
    let header = [0x06, 0x02, 0x01, 0x01, 0xF5];
    let data = [0x5Au8; 501];
    c.bench_function("crc8_header", |b| b.iter(|| crc8_mstp_header(black_box(&header))));
    c.bench_function("crc16_501_bytes", |b| b.iter(|| crc16_mstp(black_box(&data))));
}

criterion_group!(benches, encode_benchmark, decode_benchmark, crc_benchmark);
criterion_main!(benches);
