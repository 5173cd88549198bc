//! State transitions of the index and the errors guarding them.

use annforest::{AnnIndex, IndexOptions, IndexState, LoadMode, MetricKind, VectorError};

use crate::common::{TestDir, built_index, loaded_index, random_vectors};

#[test]
fn test_build_twice_fails() {
    let vectors = random_vectors(50, 4, 10);
    let mut index = built_index(&vectors, MetricKind::Angular, 3);

    let err = index.build(3).unwrap_err();
    assert!(matches!(err, VectorError::AlreadyBuilt));
    assert_eq!(err.status_code(), "ALREADY_BUILT");
    assert_eq!(index.n_trees(), 3);
}

#[test]
fn test_build_empty_index_fails() {
    let mut index = AnnIndex::new(4, MetricKind::Euclidean).unwrap();
    assert!(matches!(index.build(5), Err(VectorError::EmptyIndex)));
    assert_eq!(index.state(), IndexState::Empty);
}

#[test]
fn test_zero_dimension_rejected() {
    assert!(matches!(
        AnnIndex::new(0, MetricKind::Angular),
        Err(VectorError::InvalidDimension { .. })
    ));
}

#[test]
fn test_query_after_unload_fails() {
    let vectors = random_vectors(50, 4, 11);
    let mut index = built_index(&vectors, MetricKind::Angular, 2);
    index.unload();

    assert_eq!(index.state(), IndexState::Empty);
    assert!(matches!(
        index.get_nns_by_item(0, 5, None, false),
        Err(VectorError::NotBuilt { .. })
    ));
    assert!(matches!(
        index.get_item_vector(0),
        Err(VectorError::OutOfRange { .. })
    ));

    // An unloaded index accepts new items
    index.add_item(0, &[1.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(index.state(), IndexState::Loaded);
}

#[test]
fn test_unbuild_allows_more_items() {
    let vectors = random_vectors(40, 4, 12);
    let mut index = built_index(&vectors, MetricKind::Euclidean, 2);

    index.unbuild().unwrap();
    assert_eq!(index.n_trees(), 0);
    index.add_item(40, &[5.0, 5.0, 5.0, 5.0]).unwrap();
    index.build(4).unwrap();

    assert_eq!(index.get_n_items(), 41);
    let result = index
        .get_nns_by_vector(&[5.0, 5.0, 5.0, 5.0], 1, Some(1000), false)
        .unwrap();
    assert_eq!(result.ids(), vec![40]);
}

#[test]
fn test_dimension_mismatch() {
    let vectors = random_vectors(20, 4, 13);
    let mut loaded = loaded_index(&vectors, IndexOptions::default());

    assert!(matches!(
        loaded.add_item(99, &[1.0, 2.0]),
        Err(VectorError::DimensionMismatch {
            expected: 4,
            actual: 2
        })
    ));
    assert_eq!(loaded.get_n_items(), 20);

    loaded.build(2).unwrap();
    assert!(matches!(
        loaded.get_nns_by_vector(&[1.0], 3, None, false),
        Err(VectorError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_out_of_range_item() {
    let vectors = random_vectors(10, 3, 14);
    let index = built_index(&vectors, MetricKind::Angular, 2);

    assert!(matches!(
        index.get_nns_by_item(10, 3, None, false),
        Err(VectorError::OutOfRange { item: 10, count: 10 })
    ));
    assert!(matches!(
        index.get_distance(0, 11),
        Err(VectorError::OutOfRange { .. })
    ));
}

#[test]
fn test_load_replaces_built_state() {
    let dir = TestDir::new();
    let path = dir.file("other.ann");
    let saved = built_index(&random_vectors(30, 4, 15), MetricKind::Angular, 3);
    saved.save(&path).unwrap();

    let mut index = built_index(&random_vectors(80, 4, 16), MetricKind::Angular, 1);
    index.load(&path, LoadMode::Heap).unwrap();

    assert_eq!(index.state(), IndexState::Restored);
    assert_eq!(index.get_n_items(), 30);
    assert_eq!(index.n_trees(), 3);
}

#[test]
fn test_failed_load_keeps_index() {
    let dir = TestDir::new();
    let mut index = built_index(&random_vectors(30, 4, 17), MetricKind::Angular, 2);

    let err = index
        .load(dir.file("missing.ann"), LoadMode::Mapped)
        .unwrap_err();
    assert!(matches!(err, VectorError::Io { .. }));
    assert_eq!(index.state(), IndexState::Built);
    assert_eq!(index.get_n_items(), 30);
}

#[test]
fn test_index_is_shareable_across_threads() {
    let vectors = random_vectors(300, 8, 18);
    let index = built_index(&vectors, MetricKind::Euclidean, 5);

    let results: Vec<Vec<u32>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let index = &index;
                scope.spawn(move || index.get_nns_by_item(i, 5, None, false).unwrap().ids())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (i, ids) in results.iter().enumerate() {
        let again = index.get_nns_by_item(i as u32, 5, None, false).unwrap().ids();
        assert_eq!(ids, &again);
    }
}
