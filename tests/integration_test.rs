//! Integration tests for the index facade

use hnsw_index::{Index, IndexConfig, IndexError, Metric};

#[test]
fn test_basic_workflow() {
    let index = Index::l2sq(3, 8).unwrap();

    index.add(1, &[1.0, 0.0, 0.0]).unwrap();
    index.add(2, &[0.0, 1.0, 0.0]).unwrap();
    index.add(3, &[0.0, 0.0, 1.0]).unwrap();
    assert_eq!(index.size(), 3);

    let results = index.search(&[1.0, 0.1, 0.0], 2).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results.labels[0], 1);

    assert!(index.remove(2));
    assert_eq!(index.size(), 2);
    let results = index.search(&[0.0, 1.0, 0.0], 3).unwrap();
    assert!(!results.labels.contains(&2));
}

#[test]
fn test_different_metrics() {
    let indexes = vec![
        Index::l2sq(3, 4).unwrap(),
        Index::cos(3, 4).unwrap(),
        Index::ip(3, 4).unwrap(),
        Index::hamming(3, 4).unwrap(),
    ];

    for index in indexes {
        index.add(1, &[1.0, 2.0, 3.0]).unwrap();
        index.add(2, &[-3.0, 0.5, -1.0]).unwrap();

        let results = index.search(&[1.0, 2.0, 3.0], 1).unwrap();
        assert_eq!(results.labels, vec![1], "metric {}", index.metric());
    }
}

#[test]
fn test_results_sorted_and_distances_match_metric() {
    let index = Index::ip(2, 4).unwrap();
    let data = [(10u64, [0.6f32, 0.8]), (11, [1.0, 0.0]), (12, [0.0, 1.0]), (13, [-1.0, 0.0])];
    for (label, v) in &data {
        index.add(*label, v).unwrap();
    }

    let query = [0.8, 0.6];
    let results = index.search(&query, 4).unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.distances.windows(2).all(|w| w[0] <= w[1]));
    for (label, distance) in results.iter() {
        let stored = index.get(label).unwrap();
        let expected = Metric::InnerProduct.distance(&query, stored.as_slice()).unwrap();
        assert!((distance - expected).abs() < 1e-6);
    }
    assert_eq!(results.labels[3], 13);
}

#[test]
fn test_hamming_counts_differing_components() {
    let index = Index::hamming(4, 4).unwrap();
    index.add(1, &[1.0, 0.0, 1.0, 0.0]).unwrap();
    index.add(2, &[1.0, 1.0, 1.0, 1.0]).unwrap();

    let results = index.search(&[1.0, 0.0, 1.0, 1.0], 2).unwrap();
    assert_eq!(results.labels, vec![1, 2]);
    assert_eq!(results.distances, vec![1.0, 1.0]);
}

#[test]
fn test_dimension_mismatch() {
    let index = Index::l2sq(4, 8).unwrap();
    let err = index.add(1, &[1.0, 2.0]).unwrap_err();
    assert!(matches!(err, IndexError::DimensionMismatch { expected: 4, actual: 2 }));
    assert_eq!(index.size(), 0);
}

#[test]
fn test_remove_everything_then_reuse() {
    let index = Index::l2sq(2, 4).unwrap();
    for i in 0..25u64 {
        index.add(i, &[i as f32, -(i as f32)]).unwrap();
    }
    for i in 0..25u64 {
        assert!(index.remove(i));
        assert!(index.unreachable_labels().is_empty());
    }
    assert!(index.is_empty());
    assert!(index.search(&[0.0, 0.0], 5).unwrap().is_empty());
    assert_eq!(index.stats().entry_label, None);

    index.add(99, &[1.0, 1.0]).unwrap();
    assert_eq!(index.search(&[0.0, 0.0], 5).unwrap().labels, vec![99]);
}

#[test]
fn test_removal_keeps_graph_connected() {
    let index = Index::new(IndexConfig::new(3, Metric::L2Sq).with_connectivity(4).with_seed(9)).unwrap();
    for i in 0..200u64 {
        let x = i as f32;
        index.add(i, &[x.sin(), x.cos(), (x * 0.1).sin()]).unwrap();
    }
    for i in (0..200u64).filter(|i| i % 3 != 0) {
        assert!(index.remove(i));
    }

    assert_eq!(index.size(), 67);
    assert!(index.unreachable_labels().is_empty());
    for label in index.labels() {
        let v = index.get(label).unwrap();
        // A beam wider than the index visits every reachable node
        let hit = index.search_with_ef(v.as_slice(), 1, 256).unwrap();
        assert_eq!(hit.distances[0], 0.0);
    }
}

#[test]
fn test_config_from_json() {
    let json = br#"{"dimensions": 8, "metric": "cosine", "connectivity": 12, "seed": 5}"#;
    let config = IndexConfig::from_json(json).unwrap();
    let index = Index::new(config).unwrap();
    assert_eq!(index.dimensions(), 8);
    assert_eq!(index.connectivity(), 12);
    assert_eq!(index.metric(), Metric::Cosine);
    assert_eq!(index.config().ef_search, IndexConfig::default().ef_search);
}

#[test]
fn test_metric_from_str() {
    assert_eq!("l2sq".parse::<Metric>().unwrap(), Metric::L2Sq);
    assert_eq!("cos".parse::<Metric>().unwrap(), Metric::Cosine);
    assert_eq!("ip".parse::<Metric>().unwrap(), Metric::InnerProduct);
    assert!(matches!(
        "manhattan".parse::<Metric>(),
        Err(IndexError::InvalidConfiguration(_))
    ));
}
