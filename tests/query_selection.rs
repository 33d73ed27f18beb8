use preflearn::preference_dataset::load_queries;
use preflearn::query_selector::SelectionPolicy;
use preflearn::{PrefError, Query, QuerySelector, Selector};
use std::fs;

fn write_pool(dir: &std::path::Path, size: usize) -> std::path::PathBuf {
    let path = dir.join("queries.jsonl");
    let lines: Vec<String> = (0..size)
        .map(|i| serde_json::to_string(&Query::from_features(vec![i as f64, 1.0])).unwrap())
        .collect();
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn most_recent_selection_from_generated_pool() {
    let dir = tempfile::tempdir().unwrap();
    let pool = load_queries(write_pool(dir.path(), 6)).unwrap();

    let mut selector = Selector::from_policy(SelectionPolicy::MostRecent, None);
    let selected = selector.select_queries(&pool, 3).unwrap();

    let firsts: Vec<f64> = selected.iter().map(|q| q.steps[0][0]).collect();
    assert_eq!(firsts, vec![3.0, 4.0, 5.0]);
}

#[test]
fn random_selection_from_generated_pool() {
    let dir = tempfile::tempdir().unwrap();
    let pool = load_queries(write_pool(dir.path(), 4)).unwrap();

    let mut selector = Selector::from_policy(SelectionPolicy::Random, Some(2024));
    let selected = selector.select_queries(&pool, 12).unwrap();

    assert_eq!(selected.len(), 12);
    assert!(selected.iter().all(|q| pool.contains(q)));
}

#[test]
fn random_selection_rejects_empty_pool() {
    let dir = tempfile::tempdir().unwrap();
    let pool = load_queries(write_pool(dir.path(), 0)).unwrap();
    assert!(pool.is_empty());

    let mut selector = Selector::from_policy(SelectionPolicy::Random, Some(1));
    assert!(matches!(
        selector.select_queries(&pool, 2),
        Err(PrefError::EmptyQueryPool)
    ));
}

#[test]
fn malformed_queries_are_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queries.jsonl");
    fs::write(&path, "{\"steps\":[[1.0, 2.0],[3.0]]}\n").unwrap();

    let err = load_queries(&path).unwrap_err();
    assert!(err.to_string().contains("queries[0]"));
}
