use avimux::fourcc;
use avimux::index::{audio_chunk_at, AudioIndexEntry, LegacyIndex, SuperIndex};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_index(c: &mut Criterion) {
    c.bench_function("legacy_index_append_64k", |b| {
        b.iter(|| {
            let mut idx = LegacyIndex::default();
            for i in 0..65_536u64 {
                idx.push(fourcc::VIDEO_CHUNK, 0x10, black_box(2048 + i * 4104), 4096);
            }
            idx.len()
        })
    });

    c.bench_function("std_index_serialize_4096", |b| {
        let mut si = SuperIndex::new(fourcc::Fourcc::std_index(0), fourcc::VIDEO_CHUNK);
        for i in 0..4096u64 {
            si.current_mut().push(i % 10 == 0, 2048 + i * 4104, 4096);
        }
        b.iter(|| si.current().to_bytes().len())
    });

    let index: Vec<AudioIndexEntry> = (0..100_000u64)
        .map(|i| AudioIndexEntry { pos: 2048 + i * 40, len: 32, tot: i * 32 })
        .collect();
    c.bench_function("audio_binary_search", |b| {
        b.iter(|| audio_chunk_at(black_box(&index), black_box(1_600_000)))
    });
}

criterion_group!(benches, bench_index);
criterion_main!(benches);
