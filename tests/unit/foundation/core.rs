use super::*;

#[test]
fn align_up_rounds_to_multiples() {
    assert_eq!(align_up(0, 8), 0);
    assert_eq!(align_up(1, 8), 8);
    assert_eq!(align_up(8, 8), 8);
    assert_eq!(align_up(9, 8), 16);
    assert_eq!(align_up(257, 256), 512);
}

#[test]
fn grid_size_rejects_empty_dimensions() {
    assert!(GridSize::new(0, 4).is_err());
    assert!(GridSize::new(4, 0).is_err());
    let g = GridSize::new(256, 128).unwrap();
    assert_eq!(g.cell_count(), 256 * 128);
    assert_eq!(g.byte_len(), 256 * 128 * 4);
}

#[test]
fn groups_include_partial_edge_tiles() {
    let g = GridSize::new(256, 256).unwrap();
    assert_eq!(g.groups_for_tile(16), [16, 16]);

    let g = GridSize::new(20, 33).unwrap();
    assert_eq!(g.groups_for_tile(16), [2, 3]);

    let g = GridSize::new(1, 1).unwrap();
    assert_eq!(g.groups_for_tile(16), [1, 1]);
}

#[test]
fn index_is_row_major() {
    let g = GridSize::new(5, 3).unwrap();
    assert_eq!(g.index(0, 0), 0);
    assert_eq!(g.index(4, 0), 4);
    assert_eq!(g.index(0, 1), 5);
    assert_eq!(g.index(2, 2), 12);
}
