//! Save and restore through both load modes.

use std::fs;

use annforest::vector::{HEADER_SIZE, read_header};
use annforest::{AnnIndex, IndexState, LoadMode, MetricKind, VectorError};

use crate::common::{TestDir, built_index, random_vectors};

#[test]
fn test_restored_indices_answer_like_the_original() {
    let dir = TestDir::new();
    let path = dir.file("forest.ann");
    let vectors = random_vectors(700, 12, 20);
    let queries = random_vectors(10, 12, 21);

    for metric in [MetricKind::Angular, MetricKind::Euclidean] {
        let original = built_index(&vectors, metric, 6);
        original.save(&path).unwrap();

        let heap = AnnIndex::open(&path, LoadMode::Heap).unwrap();
        let mapped = AnnIndex::open(&path, LoadMode::Mapped).unwrap();
        assert_eq!(heap.state(), IndexState::Restored);
        assert_eq!(mapped.n_nodes(), original.n_nodes());

        for query in &queries {
            let expected = original.get_nns_by_vector(query, 15, Some(120), true).unwrap();
            assert_eq!(
                heap.get_nns_by_vector(query, 15, Some(120), true).unwrap(),
                expected
            );
            assert_eq!(
                mapped.get_nns_by_vector(query, 15, Some(120), true).unwrap(),
                expected
            );
        }
        assert_eq!(
            mapped.get_nns_by_item(7, 10, None, false).unwrap(),
            original.get_nns_by_item(7, 10, None, false).unwrap()
        );
    }
}

#[test]
fn test_item_vectors_survive_round_trip() {
    let dir = TestDir::new();
    let path = dir.file("vectors.ann");
    let vectors = random_vectors(50, 5, 22);
    built_index(&vectors, MetricKind::Euclidean, 2)
        .save(&path)
        .unwrap();

    for mode in [LoadMode::Heap, LoadMode::Mapped] {
        let restored = AnnIndex::open(&path, mode).unwrap();
        assert_eq!(restored.get_n_items(), 50);
        assert_eq!(restored.dimension(), 5);
        for (id, vector) in vectors.iter().enumerate() {
            assert_eq!(&restored.get_item_vector(id as u32).unwrap(), vector);
        }
    }
}

#[test]
fn test_resave_is_byte_identical() {
    let dir = TestDir::new();
    let first = dir.file("first.ann");
    let second = dir.file("second.ann");
    let third = dir.file("third.ann");

    built_index(&random_vectors(120, 6, 23), MetricKind::Angular, 4)
        .save(&first)
        .unwrap();
    AnnIndex::open(&first, LoadMode::Mapped)
        .unwrap()
        .save(&second)
        .unwrap();
    AnnIndex::open(&first, LoadMode::Heap)
        .unwrap()
        .save(&third)
        .unwrap();

    let bytes = fs::read(&first).unwrap();
    assert_eq!(bytes, fs::read(&second).unwrap());
    assert_eq!(bytes, fs::read(&third).unwrap());
}

#[test]
fn test_save_over_mapped_file() {
    let dir = TestDir::new();
    let path = dir.file("live.ann");
    built_index(&random_vectors(60, 4, 24), MetricKind::Euclidean, 2)
        .save(&path)
        .unwrap();

    let mapped = AnnIndex::open(&path, LoadMode::Mapped).unwrap();
    let before = mapped.get_nns_by_item(0, 5, None, true).unwrap();

    built_index(&random_vectors(90, 4, 25), MetricKind::Euclidean, 3)
        .save(&path)
        .unwrap();

    // The existing mapping still sees the file it opened
    assert_eq!(mapped.get_nns_by_item(0, 5, None, true).unwrap(), before);
    assert_eq!(read_header(&path).unwrap().item_count, 90);
}

#[test]
fn test_truncated_file_is_corrupt() {
    let dir = TestDir::new();
    let path = dir.file("cut.ann");
    built_index(&random_vectors(40, 4, 26), MetricKind::Angular, 2)
        .save(&path)
        .unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

    for mode in [LoadMode::Heap, LoadMode::Mapped] {
        let err = AnnIndex::open(&path, mode).unwrap_err();
        assert!(matches!(err, VectorError::CorruptFile { .. }), "{err}");
    }

    fs::write(&path, &bytes[..HEADER_SIZE / 2]).unwrap();
    assert!(matches!(
        AnnIndex::open(&path, LoadMode::Heap),
        Err(VectorError::CorruptFile { .. })
    ));
}

#[test]
fn test_foreign_file_is_corrupt() {
    let dir = TestDir::new();
    let path = dir.file("notes.ann");
    fs::write(&path, vec![b'x'; 256]).unwrap();

    let err = AnnIndex::open(&path, LoadMode::Mapped).unwrap_err();
    assert_eq!(err.status_code(), "CORRUPT_FILE");
}

#[test]
fn test_header_describes_forest() {
    let dir = TestDir::new();
    let path = dir.file("header.ann");
    let index = built_index(&random_vectors(100, 7, 27), MetricKind::Euclidean, 5);
    index.save(&path).unwrap();

    let header = read_header(&path).unwrap();
    assert_eq!(header.dimension.get(), 7);
    assert_eq!(header.metric, MetricKind::Euclidean);
    assert_eq!(header.item_count, 100);
    assert_eq!(header.node_count, index.n_nodes() as u64);
    assert_eq!(header.roots.len(), 5);
}
