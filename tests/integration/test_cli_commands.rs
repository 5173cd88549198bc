//! End-to-end runs of the `annforest` binary: build, query, info and the
//! exit codes scripts rely on.

use std::path::Path;
use std::process::Command;

use serde_json::Value;

use crate::common::TestDir;

const POINTS: &str = r#"{"id": 0, "vector": [0.0, 0.0]}
{"id": 1, "vector": [1.0, 0.0]}
{"id": 2, "vector": [0.0, 1.0]}

{"id": 3, "vector": [5.0, 5.0]}
"#;

/// Runs the binary inside `workspace`, returning (exit code, stdout, stderr).
fn run_cli(workspace: &Path, args: &[&str]) -> (i32, String, String) {
    let config = workspace.join("settings.toml");
    let output = Command::new(env!("CARGO_BIN_EXE_annforest"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .current_dir(workspace)
        .env_remove("RUST_LOG")
        .output()
        .expect("run annforest CLI");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

/// Builds `points.ann` from [`POINTS`] and returns the scratch directory.
fn built_workspace() -> TestDir {
    let dir = TestDir::new();
    std::fs::write(dir.file("points.jsonl"), POINTS).unwrap();

    let (code, stdout, stderr) = run_cli(
        dir.path(),
        &[
            "build", "-i", "points.jsonl", "-o", "points.ann", "-m", "euclidean", "-t", "3",
        ],
    );
    assert_eq!(code, 0, "build failed: {stderr}");
    assert!(stdout.contains("Indexed 4 items into 3 trees"), "{stdout}");
    assert!(dir.file("points.ann").exists());
    assert!(!dir.file("points.ann.tmp").exists());
    dir
}

#[test]
fn test_build_then_query_by_vector() {
    let dir = built_workspace();

    let modes: [&[&str]; 2] = [&[], &["--mmap"]];
    for extra in modes {
        let mut args = vec!["query", "-i", "points.ann", "--vector", "0.1,0.1", "-k", "1", "--json"];
        args.extend_from_slice(extra);
        let (code, stdout, stderr) = run_cli(dir.path(), &args);
        assert_eq!(code, 0, "query failed: {stderr}");

        let hits: Value = serde_json::from_str(&stdout).expect("query prints JSON");
        let hits = hits.as_array().expect("JSON array of hits");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["item"], 0);
        assert!(hits[0].get("distance").is_none());
    }
}

#[test]
fn test_query_by_item_with_distances() {
    let dir = built_workspace();

    let (code, stdout, stderr) = run_cli(
        dir.path(),
        &["query", "-i", "points.ann", "--item", "0", "-k", "3", "--distances", "--json"],
    );
    assert_eq!(code, 0, "query failed: {stderr}");

    let hits: Value = serde_json::from_str(&stdout).expect("query prints JSON");
    let hits = hits.as_array().expect("JSON array of hits");
    let items: Vec<u64> = hits.iter().map(|hit| hit["item"].as_u64().unwrap()).collect();
    assert_eq!(items.len(), 3);
    assert!(!items.contains(&0), "query item must not be returned: {items:?}");
    assert_eq!(items[2], 3);

    let first = hits[0]["distance"].as_f64().expect("distance present");
    assert!((first - 1.0).abs() < 1e-5);
}

#[test]
fn test_query_table_output() {
    let dir = built_workspace();

    let (code, stdout, _) = run_cli(
        dir.path(),
        &["query", "-i", "points.ann", "--vector", "4.5,5", "-k", "1", "--distances"],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("Rank"));
    assert!(stdout.contains("Distance"));
}

#[test]
fn test_info_reports_header() {
    let dir = built_workspace();

    let (code, stdout, stderr) = run_cli(dir.path(), &["info", "-i", "points.ann", "--json"]);
    assert_eq!(code, 0, "info failed: {stderr}");

    let info: Value = serde_json::from_str(&stdout).expect("info prints JSON");
    assert_eq!(info["dimension"], 2);
    assert_eq!(info["metric"], "euclidean");
    assert_eq!(info["items"], 4);
    assert_eq!(info["trees"], 3);
}

#[test]
fn test_unknown_item_exits_not_found() {
    let dir = built_workspace();

    let (code, _, stderr) = run_cli(dir.path(), &["query", "-i", "points.ann", "--item", "99"]);
    assert_eq!(code, 3);
    assert!(stderr.contains("Not found:"), "{stderr}");
}

#[test]
fn test_wrong_query_dimension_exits_invalid_input() {
    let dir = built_workspace();

    let (code, _, stderr) = run_cli(
        dir.path(),
        &["query", "-i", "points.ann", "--vector", "1,2,3"],
    );
    assert_eq!(code, 4);
    assert!(stderr.contains("Invalid input:"), "{stderr}");
}

#[test]
fn test_corrupt_index_exits_blocking() {
    let dir = built_workspace();
    std::fs::write(dir.file("points.ann"), b"not an index").unwrap();

    let (code, _, _) = run_cli(dir.path(), &["query", "-i", "points.ann", "--item", "0"]);
    assert_eq!(code, 2);
}

#[test]
fn test_missing_input_exits_general_error() {
    let dir = TestDir::new();

    let (code, _, stderr) = run_cli(
        dir.path(),
        &["build", "-i", "absent.jsonl", "-o", "out.ann"],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("absent.jsonl"), "{stderr}");
}

#[test]
fn test_unsupported_settings_version_exits_config_error() {
    let dir = TestDir::new();
    std::fs::write(dir.file("settings.toml"), "version = 99\n").unwrap();

    let (code, _, stderr) = run_cli(dir.path(), &["info", "-i", "points.ann"]);
    assert_eq!(code, 6);
    assert!(stderr.contains("unsupported settings version 99"), "{stderr}");
}
