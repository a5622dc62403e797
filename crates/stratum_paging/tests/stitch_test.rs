//! # Stitch Integration Test
//!
//! Page windows under several LOD tables: neighbor links must be mutual and
//! every tile's edge shape must produce a stitch buffer of predicted size.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stratum_paging::{
    predicted_stitch_triangles, Direction, IndexBufferManager, LodLevel, PageCoord, PageGrid,
    TableLodSpec, TileNeighbor, TileRef,
};

fn table(levels: &[(u32, u32)]) -> TableLodSpec {
    TableLodSpec::new(
        levels
            .iter()
            .map(|&(max_pages_from_camera, tiles_per_page)| LodLevel {
                max_pages_from_camera,
                tiles_per_page,
            })
            .collect(),
    )
    .unwrap()
}

fn tables() -> Vec<TableLodSpec> {
    vec![
        table(&[(u32::MAX, 4)]),
        table(&[(0, 8), (1, 4), (2, 2), (u32::MAX, 1)]),
        table(&[(1, 16), (3, 8), (u32::MAX, 4)]),
    ]
}

fn refs(neighbor: TileNeighbor) -> Vec<TileRef> {
    match neighbor {
        TileNeighbor::None => Vec::new(),
        TileNeighbor::Equal(r) | TileNeighbor::Coarser(r) => vec![r],
        TileNeighbor::Finer(a, b) => vec![a, b],
    }
}

/// Test: if A sees B across an edge, B sees A across the opposite edge.
#[test]
fn test_neighbor_links_are_mutual() {
    let mut rng = StdRng::seed_from_u64(19);
    for lod in tables() {
        for _ in 0..5 {
            let camera = PageCoord::new(rng.gen_range(-50..50), rng.gen_range(-50..50));
            let radius = rng.gen_range(1..4);
            let grid = PageGrid::build(camera, radius, 128.0, &lod).unwrap();
            for (slot, page) in grid.pages().enumerate() {
                for tile in page.tiles() {
                    let me = TileRef {
                        page: slot,
                        x: tile.x(),
                        z: tile.z(),
                    };
                    for direction in Direction::ALL {
                        for other in refs(tile.neighbor(direction)) {
                            let back = grid.tile(other).unwrap().neighbor(direction.opposite());
                            assert!(
                                refs(back).contains(&me),
                                "{me:?} -> {other:?} ({direction:?}) not mutual"
                            );
                        }
                    }
                }
            }
        }
    }
}

/// Test: every tile in a window gets a stitch buffer of the predicted size.
#[test]
fn test_every_tile_stitches() {
    let manager = IndexBufferManager::new();
    for lod in tables() {
        let grid = PageGrid::build(PageCoord::new(3, -7), 3, 256.0, &lod).unwrap();
        for n in [2, 8, 32] {
            for (slot, page) in grid.pages().enumerate() {
                for tile in page.tiles() {
                    let r = TileRef {
                        page: slot,
                        x: tile.x(),
                        z: tile.z(),
                    };
                    let (north, east) = grid.stitch_edges(r, n).unwrap();
                    let indices = manager.stitch_indices(n, north, east).unwrap();
                    let predicted = predicted_stitch_triangles(n, north, east).unwrap();
                    assert_eq!(indices.len(), predicted as usize * 3);
                }
            }
        }
    }
    let (tiles, stitches) = manager.cached_counts();
    assert_eq!(tiles, 0);
    assert!(stitches > 3);
}

/// Test: the window edge has no neighbors and no stitch on that side.
#[test]
fn test_window_edge_tiles() {
    let lod = table(&[(0, 4), (u32::MAX, 2)]);
    let grid = PageGrid::build(PageCoord::ORIGIN, 1, 64.0, &lod).unwrap();
    let corner = grid.slot(PageCoord::new(1, 1)).unwrap();
    let r = TileRef {
        page: corner,
        x: 1,
        z: 1,
    };
    assert_eq!(grid.stitch_edges(r, 8).unwrap(), (0, 0));
    let manager = IndexBufferManager::new();
    assert!(manager.stitch_indices(8, 0, 0).unwrap().is_empty());
}
