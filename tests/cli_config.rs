//! CLI and Configuration Tests
//!
//! Drives the command implementations against temporary files:
//! - Argument parsing
//! - Configuration loading and validation
//! - Aggregation to JSON lines and to frame files
//! - Explain with indexes and hints
//! - `$out` output and skip-mode runs

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use aeropipe::cli::{
    aggregate_to, explain, load_config, read_frames, CliErrorCode, Cli, Command, Output, RunArgs,
};
use aeropipe::value::JsonMode;
use aeropipe::{ErrorMode, Value};
use clap::Parser;
use serde_json::json;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn write_json(&self, name: &str, value: serde_json::Value) -> PathBuf {
        self.write(name, &value.to_string())
    }

    fn run_args(&self, docs: &[serde_json::Value], pipeline: serde_json::Value) -> RunArgs {
        let lines: Vec<String> = docs.iter().map(|d| d.to_string()).collect();
        RunArgs {
            input: self.write("input.jsonl", &lines.join("\n")),
            pipeline: self.write_json("pipeline.json", pipeline),
            indexes: None,
            config: None,
            hint: None,
            collscan: false,
        }
    }
}

fn json_lines(bytes: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn sales() -> Vec<serde_json::Value> {
    vec![
        json!({"_id": 1, "item": "tea", "qty": 2, "price": 1.5}),
        json!({"_id": 2, "item": "coffee", "qty": 1, "price": 3.0}),
        json!({"_id": 3, "item": "tea", "qty": 4, "price": 1.5}),
    ]
}

// =============================================================================
// Argument Parsing
// =============================================================================

/// aggregate accepts the shared run arguments
#[test]
fn test_parse_aggregate_args() {
    let cli = Cli::try_parse_from([
        "aeropipe",
        "aggregate",
        "--input",
        "docs.jsonl",
        "--pipeline",
        "p.json",
        "--hint",
        "age_1",
        "--canonical",
    ])
    .unwrap();
    match cli.command {
        Command::Aggregate { run, canonical, frames } => {
            assert_eq!(run.input, PathBuf::from("docs.jsonl"));
            assert_eq!(run.hint.as_deref(), Some("age_1"));
            assert!(canonical);
            assert!(frames.is_none());
        }
        other => panic!("unexpected command {:?}", other),
    }
}

/// --hint and --collscan are mutually exclusive
#[test]
fn test_hint_conflicts_with_collscan() {
    let result = Cli::try_parse_from([
        "aeropipe",
        "explain",
        "--input",
        "d",
        "--pipeline",
        "p",
        "--hint",
        "x",
        "--collscan",
    ]);
    assert!(result.is_err());
}

// =============================================================================
// Configuration
// =============================================================================

/// No path means defaults
#[test]
fn test_load_config_defaults() {
    let config = load_config(None).unwrap();
    assert_eq!(config.error_mode, ErrorMode::Abort);
}

/// A config file overrides selected fields
#[test]
fn test_load_config_file() {
    let ws = Workspace::new();
    let path = ws.write_json(
        "config.json",
        json!({"error_mode": "skip", "max_blocking_stage_bytes": 4096}),
    );
    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.error_mode, ErrorMode::Skip);
    assert_eq!(config.max_blocking_stage_bytes, 4096);
    assert_eq!(config.default_text_language, "english");
}

/// Invalid values surface as configuration errors
#[test]
fn test_load_config_rejects_invalid() {
    let ws = Workspace::new();
    let path = ws.write_json("config.json", json!({"max_blocking_stage_bytes": 0}));
    let err = load_config(Some(&path)).unwrap_err();
    assert_eq!(err.code(), &CliErrorCode::ConfigError);

    let missing = ws.dir.path().join("missing.json");
    assert!(load_config(Some(&missing)).is_err());
}

// =============================================================================
// Aggregate
// =============================================================================

/// Output is one relaxed JSON document per line
#[test]
fn test_aggregate_json_lines() {
    let ws = Workspace::new();
    let run = ws.run_args(
        &sales(),
        json!([
            {"$group": {"_id": "$item", "qty": {"$sum": "$qty"}}},
            {"$sort": {"_id": 1}}
        ]),
    );
    let mut out = Vec::new();
    let written = aggregate_to(&run, Output::Json(JsonMode::Relaxed), &mut out).unwrap();
    assert_eq!(written, 2);
    assert_eq!(
        json_lines(&out),
        vec![json!({"_id": "coffee", "qty": 1}), json!({"_id": "tea", "qty": 6})]
    );
}

/// Canonical output keeps numeric subtypes
#[test]
fn test_aggregate_canonical() {
    let ws = Workspace::new();
    let run = ws.run_args(
        &[json!({"_id": 1, "n": 5})],
        json!([{"$project": {"_id": 0, "n": 1}}]),
    );
    let mut out = Vec::new();
    aggregate_to(&run, Output::Json(JsonMode::Canonical), &mut out).unwrap();
    assert_eq!(json_lines(&out), vec![json!({"n": {"$numberInt": "5"}})]);
}

/// Frames written by aggregate decode back to the same documents
#[test]
fn test_aggregate_frames_round_trip() {
    let ws = Workspace::new();
    let run = ws.run_args(&sales(), json!([{"$match": {"item": "tea"}}]));
    let path = ws.dir.path().join("out.frames");
    let mut file = fs::File::create(&path).unwrap();
    let written = aggregate_to(&run, Output::Frames, &mut file).unwrap();
    file.flush().unwrap();
    assert_eq!(written, 2);

    let docs = read_frames(&path).unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].get("_id"), Some(&Value::Int32(1)));
    assert_eq!(docs[1].get("qty"), Some(&Value::Int32(4)));
}

/// With $out the target collection's contents are printed
#[test]
fn test_aggregate_prints_out_target() {
    let ws = Workspace::new();
    let run = ws.run_args(
        &sales(),
        json!([
            {"$match": {"qty": {"$gte": 2}}},
            {"$project": {"item": 1}},
            {"$out": "big"}
        ]),
    );
    let mut out = Vec::new();
    aggregate_to(&run, Output::Json(JsonMode::Relaxed), &mut out).unwrap();
    assert_eq!(
        json_lines(&out),
        vec![json!({"_id": 1, "item": "tea"}), json!({"_id": 3, "item": "tea"})]
    );
}

/// Skip mode drops failing documents instead of aborting
#[test]
fn test_aggregate_skip_mode() {
    let ws = Workspace::new();
    let mut run = ws.run_args(
        &[json!({"_id": 1, "d": 2}), json!({"_id": 2, "d": 0})],
        json!([{"$project": {"r": {"$divide": [4, "$d"]}}}]),
    );
    let mut out = Vec::new();
    let err = aggregate_to(&run, Output::Json(JsonMode::Relaxed), &mut out).unwrap_err();
    assert_eq!(err.code(), &CliErrorCode::EngineError);

    run.config = Some(ws.write_json("config.json", json!({"error_mode": "skip"})));
    let mut out = Vec::new();
    let written = aggregate_to(&run, Output::Json(JsonMode::Relaxed), &mut out).unwrap();
    assert_eq!(written, 1);
    assert_eq!(json_lines(&out), vec![json!({"_id": 1, "r": 2.0})]);
}

/// A duplicate _id in the input is an input error
#[test]
fn test_duplicate_input_rejected() {
    let ws = Workspace::new();
    let run = ws.run_args(&[json!({"_id": 1}), json!({"_id": 1})], json!([]));
    let err = aggregate_to(&run, Output::Json(JsonMode::Relaxed), &mut Vec::new()).unwrap_err();
    assert_eq!(err.code(), &CliErrorCode::InputError);
    assert!(err.message().contains("input document 1"));
}

/// An invalid stage is an engine error
#[test]
fn test_invalid_pipeline_rejected() {
    let ws = Workspace::new();
    let run = ws.run_args(&sales(), json!([{"$limit": 0}]));
    let err = aggregate_to(&run, Output::Json(JsonMode::Relaxed), &mut Vec::new()).unwrap_err();
    assert_eq!(err.code(), &CliErrorCode::EngineError);
    assert!(err.message().contains("AGG_INVALID_STAGE_SPEC"));
}

// =============================================================================
// Explain
// =============================================================================

/// Indexes from the index file are used by the plan
#[test]
fn test_explain_with_index_file() {
    let ws = Workspace::new();
    let mut run = ws.run_args(&sales(), json!([{"$match": {"item": "coffee"}}]));
    run.indexes = Some(ws.write_json(
        "indexes.json",
        json!([{"key": {"item": 1}, "options": {"name": "by_item"}}]),
    ));

    let plan = explain(&run).unwrap();
    assert_eq!(plan.strategy, "IXSCAN");
    assert_eq!(plan.index_used.as_deref(), Some("by_item"));
    assert_eq!(plan.estimated_cost, 1);
    assert!(plan.to_string().starts_with("=== EXPLAIN PLAN ==="));

    run.collscan = true;
    let forced = explain(&run).unwrap();
    assert_eq!(forced.strategy, "COLLSCAN");
    assert_eq!(forced.index_used, None);
}

/// A malformed index file is an input error
#[test]
fn test_explain_rejects_bad_index_file() {
    let ws = Workspace::new();
    let mut run = ws.run_args(&sales(), json!([]));
    run.indexes = Some(ws.write_json("indexes.json", json!({"key": {"item": 1}})));
    let err = explain(&run).unwrap_err();
    assert_eq!(err.code(), &CliErrorCode::InputError);
}
