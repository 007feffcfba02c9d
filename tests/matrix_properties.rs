//! Matrix Property Suite
//!
//! Checks every matrix answer against values recomputed straight from the
//! stacked records, over seeded random tables.

use std::collections::{BTreeSet, HashMap};

use occurrence_matrix::{
    Axis, Cell, CompareMode, DateStamp, MatrixArchive, MatrixError, SparseFrequencyMatrix, StackedTable, TableType,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

type Record = (String, String, u64);

fn random_records(seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    let species = rng.gen_range(2..15);
    let datasets = rng.gen_range(2..10);
    let mut records = Vec::new();
    for s in 0..species {
        for d in 0..datasets {
            // Small values so ties are common
            if (s == 0 && d == 0) || rng.gen_bool(0.35) {
                records.push((format!("sp{}", s), format!("ds{}", d), rng.gen_range(1..=4)));
            }
        }
    }
    records
}

fn build(records: &[Record]) -> SparseFrequencyMatrix {
    let mut table = StackedTable::new(["species", "dataset", "count"]);
    for (s, d, c) in records {
        table
            .push_record([Cell::from(s.as_str()), Cell::from(d.as_str()), Cell::from(*c as i64)])
            .unwrap();
    }
    SparseFrequencyMatrix::build_from_stacked(
        &table,
        "species",
        "dataset",
        "count",
        TableType::SpeciesDatasetMatrix,
        DateStamp::from_ymd(2024, 2, 1).unwrap(),
    )
    .unwrap()
}

/// label -> [(other label, value)] for one axis
fn vectors(records: &[Record], axis: Axis) -> HashMap<String, Vec<(String, u64)>> {
    let mut vectors: HashMap<String, Vec<(String, u64)>> = HashMap::new();
    for (s, d, c) in records {
        let (own, other) = match axis {
            Axis::Row => (s, d),
            Axis::Column => (d, s),
        };
        vectors.entry(own.clone()).or_default().push((other.clone(), *c));
    }
    vectors
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

#[test]
fn test_shape_matches_distinct_labels() {
    for seed in 0..20 {
        let records = random_records(seed);
        let matrix = build(&records);
        let species: BTreeSet<_> = records.iter().map(|r| &r.0).collect();
        let datasets: BTreeSet<_> = records.iter().map(|r| &r.1).collect();
        assert_eq!(matrix.shape(), (species.len(), datasets.len()), "seed {}", seed);
        assert_eq!(matrix.nnz(), records.len());
    }
}

#[test]
fn test_sums_match_stacked_records() {
    for seed in 0..20 {
        let records = random_records(seed);
        let matrix = build(&records);
        for axis in [Axis::Row, Axis::Column] {
            for (label, entries) in vectors(&records, axis) {
                let expected: u64 = entries.iter().map(|(_, v)| v).sum();
                assert_eq!(matrix.sum_vector(&label, axis).unwrap(), expected, "seed {} {}", seed, label);
            }
        }
    }
}

#[test]
fn test_extremes_report_exact_tie_sets() {
    for seed in 0..20 {
        let records = random_records(seed);
        let matrix = build(&records);
        for axis in [Axis::Row, Axis::Column] {
            for (label, entries) in vectors(&records, axis) {
                for want_max in [true, false] {
                    let values = entries.iter().map(|(_, v)| *v);
                    let target = if want_max { values.max() } else { values.min() }.unwrap();
                    let expected: BTreeSet<String> =
                        entries.iter().filter(|(_, v)| *v == target).map(|(l, _)| l.clone()).collect();

                    let (value, labels) = matrix.extreme_value_and_labels(&label, axis, want_max).unwrap();
                    assert_eq!(value, target);
                    assert_eq!(labels.len(), expected.len(), "no duplicates in tie set");
                    assert_eq!(labels.into_iter().collect::<BTreeSet<_>>(), expected);
                }
            }
        }
    }
}

#[test]
fn test_axis_summary_matches_recomputation() {
    for seed in 0..20 {
        let records = random_records(seed);
        let matrix = build(&records);
        for axis in [Axis::Row, Axis::Column] {
            let vectors = vectors(&records, axis);
            let totals: Vec<u64> = vectors.values().map(|e| e.iter().map(|(_, v)| v).sum()).collect();
            let counts: Vec<usize> = vectors.values().map(|e| e.len()).collect();

            let summary = matrix.axis_summary(axis);
            assert_eq!(summary.vector_count, vectors.len());
            assert_eq!(summary.grand_total, totals.iter().sum::<u64>());
            assert_eq!(summary.total_min, *totals.iter().min().unwrap());
            assert_eq!(summary.total_max, *totals.iter().max().unwrap());
            assert_eq!(summary.count_min, *counts.iter().min().unwrap());
            assert_eq!(summary.count_max, *counts.iter().max().unwrap());

            let mean = totals.iter().sum::<u64>() as f64 / totals.len() as f64;
            assert!((summary.total_mean - mean).abs() < 1e-9);
            assert_eq!(summary.total_median, median(totals.iter().map(|t| *t as f64).collect()));
            assert_eq!(summary.count_median, median(counts.iter().map(|c| *c as f64).collect()));
        }
    }
}

#[test]
fn test_comparison_agrees_with_its_parts() {
    for seed in 0..10 {
        let matrix = build(&random_records(seed));
        for axis in [Axis::Row, Axis::Column] {
            let all = matrix.axis_summary(axis);
            for label in matrix.index(axis).labels() {
                let stats = matrix.vector_stats(label, axis).unwrap();
                let report = matrix.compare_to_others(label, axis, CompareMode::default()).unwrap();

                let values = report.values.unwrap();
                assert_eq!(values.total, stats.total);
                assert_eq!((values.all_min, values.all_max), (all.total_min, all.total_max));
                assert_eq!((values.all_mean, values.all_median), (all.total_mean, all.total_median));

                let counts = report.counts.unwrap();
                assert_eq!(counts.count, stats.nonzero_count);
                assert_eq!((counts.all_min, counts.all_max), (all.count_min, all.count_max));
                assert_eq!((counts.all_mean, counts.all_median), (all.count_mean, all.count_median));
            }
        }
    }
}

#[test]
fn test_archive_round_trip() {
    let dir = tempdir().unwrap();
    for seed in 0..5 {
        let matrix = build(&random_records(seed));
        let path = MatrixArchive::save(&matrix, dir.path(), 3).unwrap();
        let restored = MatrixArchive::load(&path, &dir.path().join("out"), true)
            .unwrap()
            .into_matrix()
            .unwrap();

        assert_eq!(restored.shape(), matrix.shape());
        assert_eq!(restored.rows().labels(), matrix.rows().labels());
        assert_eq!(restored.columns().labels(), matrix.columns().labels());
        let triples = |m: &SparseFrequencyMatrix| -> BTreeSet<(String, String, u64)> {
            m.labeled_triples().map(|(r, c, v)| (r.to_string(), c.to_string(), v)).collect()
        };
        assert_eq!(triples(&restored), triples(&matrix));
    }
}

#[test]
fn test_small_scenario_survives_round_trip() {
    let records: Vec<Record> = vec![
        ("A".into(), "D1".into(), 5),
        ("A".into(), "D2".into(), 3),
        ("B".into(), "D1".into(), 7),
    ];
    let dir = tempdir().unwrap();
    let path = MatrixArchive::save(&build(&records), dir.path(), 3).unwrap();
    let matrix = MatrixArchive::load(&path, dir.path(), true).unwrap().into_matrix().unwrap();

    assert_eq!(matrix.shape(), (2, 2));
    assert_eq!(matrix.sum_vector("A", Axis::Row).unwrap(), 8);
    assert_eq!(matrix.extreme_value_and_labels("D1", Axis::Column, true).unwrap(), (7, vec!["B".to_string()]));
    assert_eq!(matrix.extreme_value_and_labels("D2", Axis::Column, false).unwrap(), (3, vec!["A".to_string()]));
}

#[test]
fn test_two_way_tie() {
    let records: Vec<Record> = vec![("A".into(), "D1".into(), 10), ("B".into(), "D1".into(), 10)];
    let matrix = build(&records);
    for want_max in [true, false] {
        let (value, labels) = matrix.extreme_value_and_labels("D1", Axis::Column, want_max).unwrap();
        assert_eq!(value, 10);
        assert_eq!(labels, vec!["A".to_string(), "B".to_string()]);
    }
}

#[test]
fn test_random_labels_boundary() {
    let matrix = build(&random_records(3));
    let (rows, columns) = matrix.shape();
    assert_eq!(matrix.random_labels(rows, Axis::Row).unwrap().len(), rows);
    assert!(matches!(
        matrix.random_labels(columns + 1, Axis::Column),
        Err(MatrixError::InsufficientLabels { .. })
    ));
}

#[test]
fn test_invalid_axis() {
    assert!(matches!(Axis::try_from(2), Err(MatrixError::InvalidAxis(2))));
}
