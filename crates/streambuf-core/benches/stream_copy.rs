use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use streambuf_core::{MemReader, MemSink, Stream};

fn benchmark_stream_paths(c: &mut Criterion) {
    let sizes: [usize; 4] = [64, 256, 1024, 4096];
    let mut group = c.benchmark_group("stream_paths");

    for size in sizes {
        let src = vec![0xAB_u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("bulk_read", size), &size, |b, &_size| {
            b.iter(|| {
                let mut s = Stream::new(MemReader::with_chunk(src.clone(), 256));
                let mut dst = vec![0_u8; size];
                let n = s.read(&mut dst);
                black_box((n, dst));
            });
        });

        group.bench_with_input(BenchmarkId::new("getc_loop", size), &size, |b, &_size| {
            b.iter(|| {
                let mut s = Stream::new(MemReader::with_chunk(src.clone(), 256));
                let mut acc = 0_u64;
                while let Ok(byte) = s.getc() {
                    acc = acc.wrapping_add(u64::from(byte));
                }
                black_box(acc);
            });
        });

        group.bench_with_input(BenchmarkId::new("bulk_write", size), &size, |b, &_size| {
            b.iter(|| {
                let mut s = Stream::new(MemSink::with_capacity(256));
                let n = s.write(black_box(&src));
                let _ = s.flush();
                black_box(n);
            });
        });
    }

    group.finish();
}

fn benchmark_pushback(c: &mut Criterion) {
    c.bench_function("pushback_cycle", |b| {
        let data = vec![0x5C_u8; 1024];
        b.iter(|| {
            let mut s = Stream::new(MemReader::with_chunk(data.clone(), 128));
            for _ in 0..64 {
                let byte = s.getc().unwrap();
                let _ = s.putback(byte ^ 1);
                let _ = s.getc();
            }
            black_box(s);
        });
    });
}

criterion_group!(benches, benchmark_stream_paths, benchmark_pushback);
criterion_main!(benches);
