//! # Heightfield Integration Test
//!
//! Height read/write properties over in-memory datasets.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stratum_mosaic::{HeightfieldMosaic, MemoryCodec, MosaicConfig, MosaicEvent, MosaicLayout, MosaicStorage};

fn heightfield(tag: &str, tiles: u32, size: u32, mps: u32, max_m: f64, default_mm: f32) -> HeightfieldMosaic {
    let layout = MosaicLayout {
        name: "height".to_owned(),
        mosaic_type: "Heightfield".to_owned(),
        file_ext: "png".to_owned(),
        size_x_tiles: tiles,
        size_z_tiles: tiles,
        tile_size_samples: size,
        meters_per_sample: mps,
        min_height_m: 0.0,
        max_height_m: max_m,
    };
    let root = std::env::temp_dir().join(format!("stratum_hf_it_{tag}_{}", std::process::id()));
    let storage = MosaicStorage::in_memory(root, Arc::new(MemoryCodec::new()));
    let config = MosaicConfig {
        preload_radius: 1,
        default_height_mm: default_mm,
    };
    HeightfieldMosaic::create(layout, storage, &config).unwrap()
}

/// Test: the 2x2-tile scenario with mid-range heights.
#[test]
fn test_two_by_two_mid_range_scenario() {
    let max_m = 100.0;
    let mut hf = heightfield("scenario", 2, 4, 1, max_m, 50_000.0);
    let mid_mm = hf.sample_height_mm(0, 0).unwrap();
    assert!((mid_mm - 50_000.0).abs() < 1.0);

    hf.set_world_height_mm(0.0, 0.0, 100_000.0).unwrap();
    assert_eq!(hf.world_height_mm(0.0, 0.0).unwrap(), 100_000.0);

    let expected = (100_000.0 + 3.0 * f64::from(mid_mm)) / 4.0;
    let got = f64::from(hf.world_height_mm(0.5, 0.5).unwrap());
    assert!((got - expected).abs() < 0.05, "{got} vs {expected}");
}

/// Test: on-grid writes read back exactly on a 1 mm quantization grid.
#[test]
fn test_random_on_grid_writes_are_exact() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut hf = heightfield("exact", 2, 16, 2, 65.535, 0.0);

    for _ in 0..200 {
        let x = f64::from(rng.gen_range(-16_i32..16) * 2);
        let z = f64::from(rng.gen_range(-16_i32..16) * 2);
        let h = rng.gen_range(0_u32..=65_535) as f32;
        hf.set_world_height_mm(x, z, h).unwrap();
        assert_eq!(hf.world_height_mm(x, z).unwrap(), h);
    }
}

/// Test: off-grid reads are the bilinear blend of the surrounding samples.
#[test]
fn test_random_off_grid_reads_are_bilinear() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut hf = heightfield("bilinear", 2, 8, 1, 65.535, 0.0);
    for z in 0..16 {
        for x in 0..16 {
            hf.set_sample_height_mm(x, z, rng.gen_range(0_u32..60_000) as f32).unwrap();
        }
    }

    for _ in 0..200 {
        let wx: f64 = rng.gen_range(-8.0..6.99);
        let wz: f64 = rng.gen_range(-8.0..6.99);
        let (sx, sz) = ((wx + 8.0).floor() as i64, (wz + 8.0).floor() as i64);
        let (fx, fz) = (wx + 8.0 - sx as f64, wz + 8.0 - sz as f64);
        let h00 = f64::from(hf.sample_height_mm(sx, sz).unwrap());
        let h10 = f64::from(hf.sample_height_mm(sx + 1, sz).unwrap());
        let h01 = f64::from(hf.sample_height_mm(sx, sz + 1).unwrap());
        let h11 = f64::from(hf.sample_height_mm(sx + 1, sz + 1).unwrap());
        let expected = h00 * (1.0 - fx) * (1.0 - fz) + h10 * fx * (1.0 - fz) + h01 * (1.0 - fx) * fz + h11 * fx * fz;
        let got = f64::from(hf.world_height_mm(wx, wz).unwrap());
        assert!((got - expected).abs() < 0.05, "({wx}, {wz}): {got} vs {expected}");
    }
}

/// Test: off-grid writes across tile seams re-read the request.
#[test]
fn test_off_grid_write_across_tile_seam() {
    let mut hf = heightfield("seam", 2, 8, 1, 65.535, 10_000.0);
    let events = hf.subscribe();
    // World (-0.5, -0.5) sits between all four tiles.
    hf.set_world_height_mm(-0.5, -0.5, 20_000.0).unwrap();
    let got = hf.world_height_mm(-0.5, -0.5).unwrap();
    assert!((got - 20_000.0).abs() <= 1.0, "{got}");
    assert_eq!(hf.mosaic().dirty_tiles().count(), 4);

    let changed = events
        .try_iter()
        .filter(|e| matches!(e, MosaicEvent::TileChanged { .. }))
        .count();
    assert_eq!(changed, 4);
}

/// Test: a resampled delta grid moves heights by its weighted average.
#[test]
fn test_adjust_world_samples_coarser_input() {
    let mut hf = heightfield("coarse", 1, 16, 1, 65.535, 1_000.0);
    let events = hf.subscribe();
    // 2x2 deltas every 2 m starting on sample (4, 4).
    hf.adjust_world_samples_mm(-4.0, -4.0, 2.0, 2, &[400.0, 400.0, 400.0, 400.0])
        .unwrap();
    assert_eq!(hf.sample_height_mm(4, 4).unwrap(), 1_400.0);
    assert_eq!(hf.sample_height_mm(6, 6).unwrap(), 1_400.0);
    // Skipped samples between inputs receive no weight.
    assert_eq!(hf.sample_height_mm(5, 5).unwrap(), 1_000.0);

    let changed: Vec<MosaicEvent> = events
        .try_iter()
        .filter(|e| matches!(e, MosaicEvent::TileChanged { .. }))
        .collect();
    assert_eq!(
        changed,
        vec![MosaicEvent::TileChanged {
            world_x_m: -4.0,
            world_z_m: -4.0,
            size_x_m: 3.0,
            size_z_m: 3.0,
        }]
    );
}
