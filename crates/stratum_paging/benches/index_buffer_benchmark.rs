//! Benchmark for index-buffer generation and page window rebuilds.
//!
//! Run with: cargo bench --package stratum_paging --bench index_buffer_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stratum_paging::{IndexBufferManager, PageCoord, PageGrid, TableLodSpec, TerrainConfig};

fn benchmark_cold_stitch(c: &mut Criterion) {
    let mut group = c.benchmark_group("stitch_generation");
    for n in [16_u32, 64] {
        group.bench_function(format!("cold_{n}_all_shapes"), |b| {
            b.iter(|| {
                let manager = IndexBufferManager::new();
                for north in [0, n / 2, n, 2 * n] {
                    for east in [0, n / 2, n, 2 * n] {
                        black_box(manager.stitch_indices(n, north, east).unwrap());
                    }
                }
            });
        });
    }
    group.finish();
}

fn benchmark_cached_lookup(c: &mut Criterion) {
    let manager = IndexBufferManager::new();
    let _ = manager.stitch_indices(32, 64, 16).unwrap();
    c.bench_function("stitch_cached_lookup", |b| {
        b.iter(|| black_box(manager.stitch_indices(black_box(32), 64, 16).unwrap()));
    });
}

fn benchmark_page_grid(c: &mut Criterion) {
    let config = TerrainConfig::default();
    let lod = TableLodSpec::new(config.lod.clone()).unwrap();
    c.bench_function("page_grid_radius_4", |b| {
        b.iter(|| black_box(PageGrid::build(PageCoord::new(3, 3), 4, 256.0, &lod).unwrap()));
    });
}

criterion_group!(benches, benchmark_cold_stitch, benchmark_cached_lookup, benchmark_page_grid);
criterion_main!(benches);
