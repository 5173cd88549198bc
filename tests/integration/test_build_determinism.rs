//! Seeded builds produce the same forest regardless of thread count.

use std::fs;

use annforest::{IndexOptions, MetricKind};

use crate::common::{TestDir, loaded_index, random_vectors};

fn options(seed: u64, build_threads: usize) -> IndexOptions {
    IndexOptions {
        metric: MetricKind::Angular,
        seed,
        build_threads,
        verbose: false,
    }
}

#[test]
fn test_thread_count_does_not_change_forest() {
    let dir = TestDir::new();
    let vectors = random_vectors(800, 10, 30);

    let mut files = Vec::new();
    for threads in [1, 2, 4] {
        let mut index = loaded_index(&vectors, options(7, threads));
        index.build(8).unwrap();
        let path = dir.file(&format!("threads_{threads}.ann"));
        index.save(&path).unwrap();
        files.push(fs::read(&path).unwrap());
    }

    assert_eq!(files[0], files[1]);
    assert_eq!(files[0], files[2]);
}

#[test]
fn test_seed_controls_forest() {
    let vectors = random_vectors(300, 6, 31);

    let build = |seed| {
        let mut index = loaded_index(&vectors, options(seed, 1));
        index.build(3).unwrap();
        index
    };
    let a = build(1);
    let b = build(1);
    let c = build(2);

    let query = &vectors[0];
    let first = a.get_nns_by_vector(query, 10, Some(30), false).unwrap();
    assert_eq!(first, b.get_nns_by_vector(query, 10, Some(30), false).unwrap());
    assert_eq!(a.n_nodes(), b.n_nodes());

    let dir = TestDir::new();
    a.save(dir.file("a.ann")).unwrap();
    c.save(dir.file("c.ann")).unwrap();
    assert_ne!(
        fs::read(dir.file("a.ann")).unwrap(),
        fs::read(dir.file("c.ann")).unwrap()
    );
}

#[test]
fn test_set_seed_before_build() {
    let vectors = random_vectors(200, 4, 32);

    let mut seeded = loaded_index(&vectors, options(0, 1));
    seeded.set_seed(99).unwrap();
    seeded.build(2).unwrap();

    let mut direct = loaded_index(&vectors, options(99, 1));
    direct.build(2).unwrap();

    let dir = TestDir::new();
    seeded.save(dir.file("seeded.ann")).unwrap();
    direct.save(dir.file("direct.ann")).unwrap();
    assert_eq!(
        fs::read(dir.file("seeded.ann")).unwrap(),
        fs::read(dir.file("direct.ann")).unwrap()
    );
}

#[test]
fn test_default_tree_count_scales_with_items() {
    let small = random_vectors(16, 4, 33);
    let large = random_vectors(1024, 4, 34);

    let mut a = loaded_index(&small, options(1, 1));
    a.build(0).unwrap();
    let mut b = loaded_index(&large, options(1, 1));
    b.build(0).unwrap();

    assert_eq!(a.n_trees(), annforest::vector::default_tree_count(16));
    assert!(b.n_trees() > a.n_trees());
}
