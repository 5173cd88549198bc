//! Query behavior of built forests against an exhaustive scan.

use annforest::MetricKind;

use crate::common::{built_index, exact_neighbors, random_vectors, recall};

#[test]
fn test_nearest_corner() {
    let vectors = vec![
        vec![0.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![10.0, 10.0],
    ];
    let index = built_index(&vectors, MetricKind::Euclidean, 1);

    let result = index
        .get_nns_by_vector(&[0.1, 0.1], 1, Some(1000), true)
        .unwrap();
    assert_eq!(result.ids(), vec![0]);
    let distance = result.distances.unwrap()[0];
    assert!((distance - 0.02f32.sqrt()).abs() < 1e-5);
}

#[test]
fn test_query_by_item_excludes_itself() {
    let vectors = random_vectors(400, 8, 1);
    let index = built_index(&vectors, MetricKind::Angular, 8);

    for item in [0u32, 57, 399] {
        let result = index.get_nns_by_item(item, 10, None, false).unwrap();
        assert_eq!(result.len(), 10);
        assert!(!result.ids().contains(&item), "item {item} returned itself");
    }
}

#[test]
fn test_results_sorted_by_distance() {
    let vectors = random_vectors(500, 12, 2);
    for metric in [MetricKind::Angular, MetricKind::Euclidean] {
        let index = built_index(&vectors, metric, 6);
        let result = index
            .get_nns_by_vector(&vectors[3], 25, Some(300), true)
            .unwrap();
        let distances = result.distances.unwrap();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));

        // Reported distances agree with get_distance
        for (item, distance) in result.items.iter().zip(&distances) {
            let direct = index.get_distance(3, item.get()).unwrap();
            assert!((direct - distance).abs() < 1e-4);
        }
    }
}

#[test]
fn test_full_budget_matches_exhaustive_scan() {
    let vectors = random_vectors(600, 10, 3);
    for metric in [MetricKind::Angular, MetricKind::Euclidean] {
        let index = built_index(&vectors, metric, 4);
        let query = &vectors[11];

        let found = index
            .get_nns_by_vector(query, 10, Some(usize::MAX), false)
            .unwrap()
            .ids();
        let expected = exact_neighbors(&vectors, metric, query, 10, None);
        assert_eq!(found, expected, "{metric} forest missed exact neighbors");
    }
}

#[test]
fn test_recall_grows_with_budget() {
    let vectors = random_vectors(2000, 16, 4);
    let queries = random_vectors(20, 16, 99);
    let index = built_index(&vectors, MetricKind::Euclidean, 10);

    let mean_recall = |search_k: usize| {
        let total: f64 = queries
            .iter()
            .map(|q| {
                let found = index
                    .get_nns_by_vector(q, 10, Some(search_k), false)
                    .unwrap()
                    .ids();
                let expected = exact_neighbors(&vectors, MetricKind::Euclidean, q, 10, None);
                recall(&found, &expected)
            })
            .sum();
        total / queries.len() as f64
    };

    let budgets = [10, 100, 1000, 2000];
    let recalls: Vec<f64> = budgets.iter().map(|&b| mean_recall(b)).collect();
    for pair in recalls.windows(2) {
        assert!(pair[0] <= pair[1], "recall dropped: {recalls:?}");
    }
    assert_eq!(recalls[3], 1.0);
}

#[test]
fn test_short_results() {
    let vectors = random_vectors(5, 3, 5);
    let index = built_index(&vectors, MetricKind::Angular, 2);

    let result = index
        .get_nns_by_vector(&[1.0, 0.0, 0.0], 10, Some(1000), false)
        .unwrap();
    assert_eq!(result.len(), 5);

    let none = index.get_nns_by_vector(&[1.0, 0.0, 0.0], 0, None, true).unwrap();
    assert!(none.is_empty());
    assert_eq!(none.distances, Some(Vec::new()));
}

#[test]
fn test_distance_properties() {
    let vectors = random_vectors(30, 6, 6);
    let angular = built_index(&vectors, MetricKind::Angular, 1);
    let euclidean = built_index(&vectors, MetricKind::Euclidean, 1);

    for i in 0..30u32 {
        for j in 0..30u32 {
            let a = angular.get_distance(i, j).unwrap();
            assert!((0.0..=2.0).contains(&a));
            assert_eq!(a, angular.get_distance(j, i).unwrap());

            let e = euclidean.get_distance(i, j).unwrap();
            assert!(e >= 0.0);
            assert_eq!(e, euclidean.get_distance(j, i).unwrap());
        }
        assert!(euclidean.get_distance(i, i).unwrap().abs() < 1e-6);
    }
}

#[test]
fn test_sparse_ids_are_zero_filled() {
    let mut index = annforest::AnnIndex::new(3, MetricKind::Euclidean).unwrap();
    index.add_item(4, &[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(index.get_n_items(), 5);
    assert_eq!(index.get_item_vector(2).unwrap(), vec![0.0, 0.0, 0.0]);

    index.build(2).unwrap();
    let result = index
        .get_nns_by_vector(&[1.0, 2.0, 3.0], 1, Some(100), false)
        .unwrap();
    assert_eq!(result.ids(), vec![4]);
}

#[test]
fn test_duplicate_vectors_build_and_query() {
    let vectors = vec![vec![0.5f32; 4]; 200];
    let index = built_index(&vectors, MetricKind::Angular, 3);

    let result = index.get_nns_by_item(0, 5, Some(1000), true).unwrap();
    assert_eq!(result.len(), 5);
    assert!(result.distances.unwrap().iter().all(|d| d.abs() < 1e-3));
}
