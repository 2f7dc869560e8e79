use super::*;

#[test]
fn extents_match_patterns() {
    assert_eq!(SeedPattern::Block.extent(), (2, 2));
    assert_eq!(SeedPattern::Blinker.extent(), (3, 1));
    assert_eq!(SeedPattern::Glider.extent(), (3, 3));
    assert_eq!(SeedPattern::RPentomino.extent(), (3, 3));
}

#[test]
fn blinker_is_centered_in_small_grid() {
    let size = GridSize::new(5, 3).unwrap();
    assert_eq!(SeedPattern::Blinker.centered_origin(size).unwrap(), (1, 1));

    let cells = SeedPattern::Blinker.centered_grid(size).unwrap();
    let alive: Vec<usize> = cells
        .iter()
        .enumerate()
        .filter(|(_, c)| **c != 0)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(alive, vec![6, 7, 8]);
}

#[test]
fn default_seed_leaves_everything_else_dead() {
    let size = GridSize::new(256, 256).unwrap();
    let cells = SeedPattern::default().centered_grid(size).unwrap();
    assert_eq!(cells.iter().filter(|c| **c != 0).count(), 5);
    assert_eq!(cells[0], 0);
    assert_eq!(cells[cells.len() - 1], 0);
}

#[test]
fn oversized_pattern_is_a_config_error() {
    let size = GridSize::new(2, 2).unwrap();
    let err = SeedPattern::Glider.centered_grid(size).unwrap_err();
    assert!(err.to_string().contains("does not fit"));
}
