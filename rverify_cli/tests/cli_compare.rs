use assert_cmd::Command as AssertCommand;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Temp directory holding input files plus an isolated config home
struct Fixture {
    dir: TempDir,
    config_home: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            dir: TempDir::new().expect("Failed to create temp directory"),
            config_home: TempDir::new().expect("Failed to create config directory"),
        }
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_rverify_cli"));
        cmd.env("XDG_CONFIG_HOME", self.config_home.path())
            .env("APPDATA", self.config_home.path())
            .env("HOME", self.config_home.path())
            .env("RUST_LOG", "warn");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("failed to run rverify_cli")
    }
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("non-utf8 temp path")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("stdout not utf-8");
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid json output ({}): {}", e, stdout))
}

#[test]
fn test_identical_json_exits_zero() {
    let fixture = Fixture::new();
    let expected = fixture.file("e.json", r#"{"a": 1, "b": [1, 2]}"#);
    let actual = fixture.file("a.json", r#"{"b": [1, 2], "a": 1}"#);

    let output = fixture.run(&["compare", "-t", "json", arg(&expected), arg(&actual), "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let report = stdout_json(&output);
    assert_eq!(report["result"], "IDENTICAL");
    assert_eq!(report["diffs"].as_array().unwrap().len(), 0);
}

#[test]
fn test_differences_exit_with_two() {
    let fixture = Fixture::new();
    let expected = fixture.file("e.json", r#"{"a": 1, "b": "x"}"#);
    let actual = fixture.file("a.json", r#"{"a": 2, "b": "x"}"#);

    let output = fixture.run(&["compare", "-t", "JSON", arg(&expected), arg(&actual), "--json"]);
    assert_eq!(output.status.code(), Some(2));
    let report = stdout_json(&output);
    assert_eq!(report["result"], "MODIFIED");
    assert_eq!(report["diffs"][0]["path"], "$.a");
    assert_eq!(report["diffs"][0]["expected_value"], "1");
    assert_eq!(report["diffs"][0]["actual_value"], "2");
}

#[test]
fn test_rules_from_command_line() {
    let fixture = Fixture::new();
    let expected = fixture.file("e.json", r#"{"id": 1, "stamp": "2024-01-01"}"#);
    let actual = fixture.file("a.json", r#"{"id": 1, "stamp": "2025-06-30"}"#);

    AssertCommand::cargo_bin("rverify_cli")
        .unwrap()
        .env("XDG_CONFIG_HOME", fixture.config_home.path())
        .env("HOME", fixture.config_home.path())
        .args(["compare", "-t", "json", arg(&expected), arg(&actual)])
        .args(["--rule", "ignore_properties=stamp"])
        .assert()
        .code(0);

    AssertCommand::cargo_bin("rverify_cli")
        .unwrap()
        .env("XDG_CONFIG_HOME", fixture.config_home.path())
        .env("HOME", fixture.config_home.path())
        .args(["compare", "-t", "json", arg(&expected), arg(&actual)])
        .assert()
        .code(2);
}

#[test]
fn test_human_readable_xml_report() {
    let fixture = Fixture::new();
    let expected = fixture.file("e.xml", r#"<root><item id="1"/><gone/></root>"#);
    let actual = fixture.file("a.xml", r#"<root><item id="1"/></root>"#);

    let output = fixture.run(&["compare", "--type", "xml", arg(&expected), arg(&actual)]);
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Comparison Results (XML)"));
    assert!(stdout.contains("MISSED"));
    assert!(stdout.contains("root/gone[0]"));
}

#[test]
fn test_compare_with_highlight() {
    let fixture = Fixture::new();
    let expected = fixture.file("e.txt", "one\ntwo\nthree\n");
    let actual = fixture.file("a.txt", "one\nthree\n");

    let output = fixture.run(&[
        "compare",
        "-t",
        "plain_text",
        arg(&expected),
        arg(&actual),
        "--json",
        "--highlight",
    ]);
    assert_eq!(output.status.code(), Some(2));
    let report = stdout_json(&output);
    let highlight = &report["highlight"];
    assert_eq!(highlight["ar"]["children"][1]["status"], "HIDDEN");
    assert_eq!(
        highlight["er"]["children"].as_array().unwrap().len(),
        highlight["ar"]["children"].as_array().unwrap().len()
    );
    assert!(highlight["combined"]
        .as_array()
        .unwrap()
        .iter()
        .any(|row| row["status"] == "MISSED" && row["expected"] == "two"));
}

#[test]
fn test_malformed_content_fails() {
    let fixture = Fixture::new();
    let expected = fixture.file("e.json", "{");
    let actual = fixture.file("a.json", "{}");

    let output = fixture.run(&["compare", "-t", "json", arg(&expected), arg(&actual)]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not valid JSON"));
    let envelope = stdout_json(&output);
    assert_eq!(envelope["status"], 5001);
    assert!(envelope["message"].as_str().unwrap().contains("not valid JSON"));
}

#[test]
fn test_compare_reports_unreadable_files_and_bad_rules() {
    let fixture = Fixture::new();
    let present = fixture.file("e.json", "{}");
    let missing = fixture.dir.path().join("missing.json");

    let output = fixture.run(&["compare", "-t", "json", arg(&present), arg(&missing), "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let envelope = stdout_json(&output);
    assert_eq!(envelope["status"], 5005);
    assert!(envelope["message"].as_str().unwrap().contains("missing.json"));

    let output = fixture.run(&[
        "compare",
        "-t",
        "json",
        arg(&present),
        arg(&present),
        "--rule",
        "no_equals_sign",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout_json(&output)["status"], 400);
}

#[test]
fn test_unknown_content_type_is_rejected() {
    let fixture = Fixture::new();
    let file = fixture.file("x.txt", "x");
    let output = fixture.run(&["compare", "-t", "yaml", arg(&file), arg(&file)]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown content type"));
}

#[test]
fn test_batch_runs_every_pair() {
    let fixture = Fixture::new();
    // {"a": 1} and {"a": 2}, base64 encoded
    let request = fixture.file(
        "request.json",
        r#"{
            "rules": {},
            "pairs": [
                {
                    "expected": {"name": "n", "content_type": "PRIMITIVES", "content": "42"},
                    "actuals": [{"name": "n", "content_type": "PRIMITIVES", "content": "42"}]
                },
                {
                    "expected": {"name": "doc", "content_type": "JSON", "content": "eyJhIjogMX0="},
                    "actuals": [{"name": "doc", "content_type": "JSON", "content": "eyJhIjogMn0="}]
                }
            ]
        }"#,
    );

    let output = fixture.run(&["batch", arg(&request), "--concurrency", "2"]);
    assert_eq!(output.status.code(), Some(2));
    let entries = stdout_json(&output);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    for entry in entries {
        assert_eq!(entry["session"]["state"], "COMPLETED");
    }
    assert_eq!(entries[0]["results"][0]["result"], "IDENTICAL");
    assert_eq!(entries[1]["results"][0]["result"], "MODIFIED");
    assert_eq!(
        entries[1]["results"][0]["actual_results"][0]["diffs"][0]["path"],
        "$.a"
    );
}

#[test]
fn test_batch_isolates_failing_pairs() {
    let fixture = Fixture::new();
    let request = fixture.file(
        "request.json",
        r#"{
            "pairs": [
                {
                    "expected": {"name": "n", "content_type": "PRIMITIVES", "content": "1"},
                    "actuals": [{"name": "n", "content_type": "PRIMITIVES", "content": "1"}]
                },
                {
                    "expected": {"name": "n", "content_type": "PRIMITIVES", "content": "1"},
                    "actuals": [{"name": "n", "content_type": "PRIMITIVES", "content": "1"}],
                    "rules": {"ignore": ["("]}
                }
            ]
        }"#,
    );

    let output = fixture.run(&["batch", arg(&request)]);
    assert_eq!(output.status.code(), Some(1));
    let entries = stdout_json(&output);
    assert_eq!(entries[0]["results"][0]["result"], "IDENTICAL");
    assert_eq!(entries[1]["results"][0]["error"]["status"], 4001);
    assert_eq!(entries[1]["session"]["state"], "COMPLETED");
    assert_eq!(entries[1]["session"]["pair_errors"].as_array().unwrap().len(), 1);
}

#[test]
fn test_batch_malformed_pair_content_is_reported_per_pair() {
    let fixture = Fixture::new();
    // "{" base64 encoded
    let request = fixture.file(
        "request.json",
        r#"{
            "pairs": [
                {
                    "expected": {"name": "doc", "content_type": "JSON", "content": "ew=="},
                    "actuals": [{"name": "doc", "content_type": "JSON", "content": "ew=="}]
                }
            ]
        }"#,
    );

    let output = fixture.run(&["batch", arg(&request)]);
    assert_eq!(output.status.code(), Some(1));
    let entries = stdout_json(&output);
    assert_eq!(entries[0]["results"][0]["error"]["status"], 5001);
}

#[test]
fn test_batch_bad_request_envelope() {
    let fixture = Fixture::new();
    let request = fixture.file("request.json", r#"{"pairs": "nope"}"#);

    let output = fixture.run(&["batch", arg(&request)]);
    assert_eq!(output.status.code(), Some(1));
    let envelope = stdout_json(&output);
    assert_eq!(envelope["status"], 400);
    assert!(envelope["message"].as_str().unwrap().contains("Bad request"));
}

#[test]
fn test_highlight_subcommand() {
    let fixture = Fixture::new();
    let expected = fixture.file("e.txt", "a\nb\nc");
    let actual = fixture.file("a.txt", "a\nc");
    let diffs = fixture.file(
        "diffs.json",
        r#"[{"order_id": 0, "expected_name": "line[1]", "expected_value": "b", "result": "MISSED", "path": "line[1]"}]"#,
    );

    let output = fixture.run(&[
        "highlight",
        "-t",
        "plain_text",
        "--diffs",
        arg(&diffs),
        arg(&expected),
        arg(&actual),
        "--encode",
    ]);
    assert_eq!(output.status.code(), Some(0));
    let result = stdout_json(&output);
    assert_eq!(result["er"]["children"][1]["status"], "MISSED");
    assert_eq!(result["er"]["children"][1]["value"], "Yg==");
    assert_eq!(result["ar"]["children"][1]["status"], "HIDDEN");
    assert_eq!(result["ar"]["children"][1]["linked_row"], 2);
}

#[test]
fn test_highlight_errors_are_enveloped() {
    let fixture = Fixture::new();
    let expected = fixture.file("e.json", "{");
    let actual = fixture.file("a.json", "{}");
    let diffs = fixture.file("diffs.json", "[]");
    let bad_diffs = fixture.file("bad.json", r#"{"not": "a list"}"#);

    let assert = AssertCommand::cargo_bin("rverify_cli")
        .unwrap()
        .env("XDG_CONFIG_HOME", fixture.config_home.path())
        .env("HOME", fixture.config_home.path())
        .args(["highlight", "-t", "json", "--diffs", arg(&diffs), arg(&expected), arg(&actual)])
        .assert()
        .code(1);
    assert_eq!(stdout_json(assert.get_output())["status"], 5001);

    let output = fixture.run(&[
        "highlight",
        "-t",
        "json",
        "--diffs",
        arg(&bad_diffs),
        arg(&actual),
        arg(&actual),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let envelope = stdout_json(&output);
    assert_eq!(envelope["status"], 400);
    assert!(envelope["message"].as_str().unwrap().starts_with("Bad request"));
}

#[test]
fn test_config_init_writes_file() {
    let fixture = Fixture::new();
    let output = fixture.run(&["config", "--init"]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let path = stdout
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("# "))
        .expect("config path header");
    assert!(Path::new(path).exists());
    assert!(stdout.contains("default_concurrency = 4"));
}
