//! Benchmarks for frame identification, composition and rotation.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use serum_decode::{
    archive::{
        Archive,
        synth::{CurrentBuilder, LegacyBuilder},
    },
    engine::Engine,
    schema::{PlaybackConfig, RequestFlags},
};

/// Raw 4-shade frame whose first pixels spell `id` in base 4.
fn raw_frame(width: u32, height: u32, id: u32) -> Vec<u8> {
    let mut raw: Vec<u8> = (0..width * height).map(|i| ((i / 7) % 3) as u8).collect();
    for (digit, px) in raw.iter_mut().take(8).enumerate() {
        *px = ((id >> (2 * digit)) & 3) as u8;
    }
    raw
}

fn current_archive(nframes: u32) -> Vec<u8> {
    let (width, height) = (128, 32);
    let mut builder = CurrentBuilder::new(width, height, nframes, 4);
    let colors: Vec<u16> = (0..width * height).map(|i| (i * 37) as u16).collect();
    for id in 0..nframes {
        builder.match_frame(id, &raw_frame(width, height, id), None, false);
        builder.colors(id, &colors);
        builder.rotation(id, 0, &[0, 37, 74, 111], 30);
        builder.extra_frame(id, 0xF800);
    }
    builder.build()
}

fn legacy_archive(nframes: u32) -> Vec<u8> {
    let (width, height) = (128, 32);
    let mut builder = LegacyBuilder::new(width, height, nframes, 4);
    let colors: Vec<u8> = (0..width * height).map(|i| (i % 16) as u8).collect();
    for id in 0..nframes {
        builder.match_frame(id, &raw_frame(width, height, id), None, false);
        builder.colors(id, &colors);
        builder.rotation(id, 0, 1, 4, 30);
    }
    builder.build()
}

fn bench_colorize(c: &mut Criterion) {
    let mut group = c.benchmark_group("colorize");

    for nframes in [16, 256, 1024] {
        for (label, bytes) in [
            ("legacy", legacy_archive(nframes)),
            ("current", current_archive(nframes)),
        ] {
            let config = PlaybackConfig::default();
            let archive = Archive::from_bytes(&bytes, config.request).unwrap();
            let mut engine = Engine::new(config).unwrap();
            engine.load_archive(archive);

            // Alternate between the first and the last frame so every call is a fresh match
            let frames = [raw_frame(128, 32, 0), raw_frame(128, 32, nframes - 1)];
            let mut tick = 0u64;

            group.bench_with_input(
                BenchmarkId::new(label, format!("{} frames", nframes)),
                &nframes,
                |b, _| {
                    b.iter(|| {
                        tick += 1;
                        let frame = &frames[(tick % 2) as usize];
                        black_box(engine.colorize_at(black_box(frame), tick * 16));
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_rotate(c: &mut Criterion) {
    let mut group = c.benchmark_group("rotate");

    let request = RequestFlags::default();
    let archive = Archive::from_bytes(&current_archive(4), request).unwrap();
    let mut engine = Engine::new(PlaybackConfig::default()).unwrap();
    engine.load_archive(archive);
    engine.colorize_at(&raw_frame(128, 32, 0), 0);
    let mut now = 0u64;

    group.bench_function("current 128x32 + 256x64", |b| {
        b.iter(|| {
            now += 30;
            black_box(engine.rotate_at(now));
        });
    });

    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");
    group.sample_size(20);

    let bytes = current_archive(1024);
    group.bench_function("source 1024 frames", |b| {
        b.iter(|| Archive::from_bytes(black_box(&bytes), RequestFlags::default()).unwrap());
    });

    let archive = Archive::from_bytes(&bytes, RequestFlags::default()).unwrap();
    let mut cache = Vec::new();
    archive.write_cache_to(&mut cache).unwrap();
    group.bench_function("cache 1024 frames", |b| {
        b.iter(|| Archive::read_cache_from(black_box(cache.as_slice())).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_colorize, bench_rotate, bench_load);
criterion_main!(benches);
