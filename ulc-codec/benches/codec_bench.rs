//! Codec benchmarks: block encoding across transform sizes and the
//! decode path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ulc_codec::{UlcDecoder, UlcEncoder, UlcEncoderConfig};

/// A busy two-channel test signal: tone mix plus a click per block.
fn create_test_block(block_size: usize) -> Vec<f32> {
    let mut block = vec![0.0f32; 2 * block_size];
    for ch in 0..2 {
        for i in 0..block_size {
            let t = i as f32 / 44100.0;
            block[ch * block_size + i] = 0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                + 0.2 * (2.0 * std::f32::consts::PI * 3700.0 * t).sin();
        }
        block[ch * block_size + block_size / 3] += 0.5;
    }
    block
}

fn bench_encode_cbr(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_cbr");

    for block_size in [512usize, 1024, 2048, 4096] {
        let samples = create_test_block(block_size);

        group.throughput(Throughput::Elements(block_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(block_size),
            &samples,
            |b, samples| {
                let mut encoder = UlcEncoder::new(UlcEncoderConfig {
                    sample_rate: 44100,
                    channels: 2,
                    block_size,
                    ..UlcEncoderConfig::default()
                })
                .expect("create encoder");
                let mut dst = vec![0u8; encoder.max_block_bytes()];

                b.iter(|| {
                    let _ = encoder.encode_block_cbr(black_box(samples), &mut dst, 128.0);
                });
            },
        );
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let block_size = 2048;
    let samples = create_test_block(block_size);

    let mut encoder = UlcEncoder::new(UlcEncoderConfig {
        sample_rate: 44100,
        channels: 2,
        block_size,
        ..UlcEncoderConfig::default()
    })
    .expect("create encoder");
    let mut packet = vec![0u8; encoder.max_block_bytes()];
    let bits = encoder
        .encode_block_cbr(&samples, &mut packet, 128.0)
        .expect("encode");
    packet.truncate(bits.div_ceil(8));

    c.bench_function("decode_block", |b| {
        let mut decoder = UlcDecoder::new(2, block_size).expect("create decoder");
        let mut out = vec![0.0f32; 2 * block_size];
        b.iter(|| {
            let _ = decoder.decode_block(black_box(&packet), &mut out);
        });
    });
}

criterion_group!(benches, bench_encode_cbr, bench_decode);
criterion_main!(benches);
