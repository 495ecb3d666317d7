use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use affix_core::codec::types::{RECORD_INSTANCE_AFFIXES, SLOTS_VERSION_CURRENT};
use affix_core::reader::RecordWriter;
use affix_core::token::make_affix_token;
use serde_json::Value;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn catalog_path() -> String {
    workspace_root()
        .join("tests/fixtures/runtime_config.json")
        .to_string_lossy()
        .to_string()
}

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_affix-ledger"))
        .args(args)
        .output()
        .expect("failed to run affix-ledger CLI")
}

fn temp_output_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{}_{}.bin", std::process::id(), nanos))
}

/// A single-entry v2 stream: base 00012EB7, unique 1, one token.
fn legacy_stream(id: &str) -> Vec<u8> {
    let mut payload = RecordWriter::new();
    payload
        .write_u32(1)
        .write_u32(0x0001_2EB7)
        .write_u16(1)
        .write_u64(make_affix_token(id));
    let mut out = RecordWriter::new();
    out.write_record(RECORD_INSTANCE_AFFIXES, 2, payload.as_bytes());
    out.into_bytes()
}

#[test]
fn token_prints_fnv_hash() {
    let output = run_cli(&["token", "arc_lightning"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "0xA941C712A77418A6"
    );

    let output = run_cli(&["token", "--json", "arc_lightning"]);
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["id"], "arc_lightning");
    assert_eq!(json["token"], "0xA941C712A77418A6");
}

#[test]
fn inspect_json_reports_migrated_stream() {
    let path = temp_output_path("affix_ledger_inspect");
    fs::write(&path, legacy_stream("arc_lightning")).unwrap();
    let path_str = path.to_string_lossy().to_string();
    let catalog = catalog_path();

    let output = run_cli(&["--catalog", &catalog, "--json", &path_str]);
    let _ = fs::remove_file(&path);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["load"]["records"][0]["status"], "migrated");
    assert_eq!(json["load"]["migrated_versions"][0], 2);
    assert_eq!(json["instances"][0]["key"], "00012EB7:0001");
    assert_eq!(json["instances"][0]["affixes"][0]["id"], "arc_lightning");
    assert_eq!(json["evaluated"][0], "00012EB7:0001");
    assert!(json["layout"]["sections"].as_array().is_some());
}

#[test]
fn output_rewrites_stream_in_current_layout() {
    let input = temp_output_path("affix_ledger_in");
    let output_path = temp_output_path("affix_ledger_out");
    fs::write(&input, legacy_stream("of_haste")).unwrap();
    let input_str = input.to_string_lossy().to_string();
    let output_str = output_path.to_string_lossy().to_string();

    let output = run_cli(&[&input_str, "--output", &output_str]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let written = fs::read(&output_path).expect("output should be written");
    assert_eq!(&written[0..4], &RECORD_INSTANCE_AFFIXES.to_le_bytes());
    assert_eq!(&written[4..8], &SLOTS_VERSION_CURRENT.to_le_bytes());

    let reread = run_cli(&["--json", "--slots", &output_str]);
    let _ = fs::remove_file(&input);
    let _ = fs::remove_file(&output_path);
    assert!(reread.status.success());
    let json: Value = serde_json::from_slice(&reread.stdout).unwrap();
    assert_eq!(json["load"]["records"][0]["status"], "applied");
    assert_eq!(json["load"]["migrated_versions"].as_array().unwrap().len(), 0);
    assert_eq!(json["instances"][0]["affixes"][0]["token"], format!("0x{:016X}", make_affix_token("of_haste")));
}

#[test]
fn strip_unknown_requires_catalog_and_removes_tokens() {
    let path = temp_output_path("affix_ledger_strip");
    fs::write(&path, legacy_stream("retired_affix")).unwrap();
    let path_str = path.to_string_lossy().to_string();

    let rejected = run_cli(&["--strip-unknown", &path_str]);
    assert!(!rejected.status.success());

    let catalog = catalog_path();
    let output = run_cli(&["--catalog", &catalog, "--strip-unknown", "--json", "--slots", &path_str]);
    let _ = fs::remove_file(&path);
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["instances"].as_array().unwrap().len(), 0);
}

#[test]
fn corrupted_stream_prints_state_and_exits_nonzero() {
    let mut bytes = legacy_stream("arc_lightning");
    bytes.extend_from_slice(&[0x49, 0x52]);
    let path = temp_output_path("affix_ledger_corrupt");
    fs::write(&path, bytes).unwrap();
    let path_str = path.to_string_lossy().to_string();

    let output = run_cli(&["--json", &path_str]);
    let _ = fs::remove_file(&path);
    assert_eq!(output.status.code(), Some(3));
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["load"]["corruption"].is_string());
    assert_eq!(json["instances"][0]["key"], "00012EB7:0001");
}

#[test]
fn preview_is_stable_across_runs() {
    let catalog = catalog_path();
    let args = [
        "preview",
        "--catalog",
        &catalog,
        "--base",
        "12EB7",
        "--unique",
        "7",
        "--item-type",
        "weapon",
        "--json",
    ];
    let first = run_cli(&args);
    let second = run_cli(&args);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert_eq!(first.stdout, second.stdout);

    let json: Value = serde_json::from_slice(&first.stdout).unwrap();
    assert_eq!(json["key"], "00012EB7:0007");
    let affixes = json["affixes"].as_array().unwrap();
    assert!(!affixes.is_empty() && affixes.len() <= 3);
}

#[test]
fn preview_rejects_unknown_item_type() {
    let catalog = catalog_path();
    let output = run_cli(&[
        "preview",
        "--catalog",
        &catalog,
        "--base",
        "12EB7",
        "--unique",
        "7",
        "--item-type",
        "potion",
    ]);
    assert!(!output.status.success());
}

#[test]
fn missing_stream_path_is_a_usage_error() {
    let output = run_cli(&[]);
    assert_eq!(output.status.code(), Some(2));
}
