use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const DUPLICATED: &str = "variables {\n  int x = 0;\n  int x = 0;\n}\n";
const DEDUPED: &str = "variables {\n  int x = 0;\n}\n";

#[allow(deprecated)]
fn cli(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("testgen-clean").expect("binary");
    cmd.current_dir(workdir)
        .env_remove("TESTGEN_CLEAN_CONFIG")
        .env_remove("TESTGEN_CLEAN_JOBS")
        .env_remove("RUST_LOG");
    cmd
}

fn steps(count: u64) -> String {
    let mut text = String::from("testcase TC_Steps()\n{\n");
    for n in 1..=count {
        text.push_str(&format!("  // Step {n}: poll\n  output(msgReq);\n\n"));
    }
    text.push_str("}\n");
    text
}

#[test]
fn clean_single_file_to_stdout() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("gen.can"), DUPLICATED).unwrap();

    cli(temp.path())
        .args(["clean", "gen.can"])
        .assert()
        .success()
        .stdout(DEDUPED);

    assert_eq!(
        fs::read_to_string(temp.path().join("gen.can")).unwrap(),
        DUPLICATED
    );
}

#[test]
fn clean_in_place_writes_backup_first() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("gen.can");
    fs::write(&path, DUPLICATED).unwrap();

    cli(temp.path())
        .args(["clean", "--in-place", "--backup", "gen.can"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cleaned"));

    assert_eq!(fs::read_to_string(&path).unwrap(), DEDUPED);
    assert_eq!(
        fs::read_to_string(temp.path().join("gen.can.backup")).unwrap(),
        DUPLICATED
    );
}

#[test]
fn clean_directory_into_output_with_json_report() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("gen")).unwrap();
    fs::write(root.join("gen/a.can"), DUPLICATED).unwrap();
    fs::write(root.join("gen/b.can"), DEDUPED).unwrap();
    fs::write(root.join("gen/notes.txt"), DUPLICATED).unwrap();
    fs::write(
        root.join("gen/reply.md"),
        format!("Here is the code:\n\n```capl\n{DUPLICATED}```\n\nDone.\n"),
    )
    .unwrap();

    let output = cli(root)
        .args(["clean", "--json", "--output", "out", "gen"])
        .output()
        .expect("command run");
    assert!(output.status.success());

    let body: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(body["summary"]["files"], 3);
    assert_eq!(body["summary"]["cleaned"], 2);
    assert_eq!(body["summary"]["unchanged"], 1);
    assert_eq!(body["summary"]["failed"], 0);

    let files = body["files"].as_array().unwrap();
    assert!(files[0]["path"].as_str().unwrap().ends_with("a.can"));
    assert_eq!(files[0]["status"], "cleaned");
    assert_eq!(
        files[0]["change_log"][0]["kind"],
        "duplicate_declaration_removed"
    );
    assert_eq!(files[1]["status"], "unchanged");
    assert!(files[0].get("cleaned_text").is_none());

    assert_eq!(fs::read_to_string(root.join("out/a.can")).unwrap(), DEDUPED);
    assert_eq!(fs::read_to_string(root.join("out/b.can")).unwrap(), DEDUPED);
    assert_eq!(
        fs::read_to_string(root.join("out/reply.md")).unwrap(),
        format!("Here is the code:\n\n```capl\n{DEDUPED}```\n\nDone.\n")
    );
    assert!(!root.join("out/notes.txt").exists());
}

#[test]
fn several_files_need_a_write_mode() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.can"), DUPLICATED).unwrap();
    fs::write(temp.path().join("b.can"), DUPLICATED).unwrap();

    cli(temp.path())
        .args(["clean", "a.can", "b.can"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("use --in-place or --output"));
}

#[test]
fn step_ceiling_flag_truncates() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("steps.can"), steps(5)).unwrap();

    cli(temp.path())
        .args(["clean", "--step-ceiling", "3", "steps.can"])
        .assert()
        .success()
        .stdout(predicate::str::contains("// Step 3: poll"))
        .stdout(predicate::str::contains("// Step 4").not())
        .stdout(predicate::str::ends_with("}\n"));
}

#[test]
fn toml_config_from_environment() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("steps.can"), steps(4)).unwrap();
    fs::write(temp.path().join("cleaner.toml"), "step_ceiling = 2\n").unwrap();

    cli(temp.path())
        .env("TESTGEN_CLEAN_CONFIG", "cleaner.toml")
        .args(["clean", "steps.can"])
        .assert()
        .success()
        .stdout(predicate::str::contains("// Step 2: poll"))
        .stdout(predicate::str::contains("// Step 3").not());
}

#[test]
fn invalid_config_fails() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("gen.can"), DEDUPED).unwrap();
    fs::write(temp.path().join("bad.json"), r#"{"step_ceiling": 0}"#).unwrap();

    cli(temp.path())
        .args(["clean", "--config", "bad.json", "gen.can"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn missing_input_fails() {
    let temp = tempdir().unwrap();

    cli(temp.path())
        .args(["clean", "missing.can"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input not found"));
}

#[test]
fn analyze_reports_loop_verdict_as_json() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("gen.can"),
        "testcase TC_Loop()\n{\n  // Step 1: start\n  output(msgReq);\n  // Step 500: again\n  output(msgReq);\n}\n",
    )
    .unwrap();

    let output = cli(temp.path())
        .args(["analyze", "--json", "gen.can"])
        .output()
        .expect("command run");
    assert!(output.status.success());

    let body: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    let report = &body[0]["report"];
    assert_eq!(report["max_step"], 500);
    assert_eq!(report["verdict"]["kind"], "step_ceiling_exceeded");
    assert_eq!(report["verdict"]["max_step"], 500);

    // analyze never writes
    assert!(fs::read_to_string(temp.path().join("gen.can"))
        .unwrap()
        .contains("Step 500"));
}

#[test]
fn analyze_text_lists_duplicates() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("gen.can"), DUPLICATED).unwrap();

    cli(temp.path())
        .args(["analyze", "gen.can"])
        .assert()
        .success()
        .stdout(predicate::str::contains("duplicate `x`"))
        .stdout(predicate::str::contains("verdict: no loop detected"));
}

#[test]
fn extract_writes_sibling_can_file() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("reply.md"),
        "Sure.\n\n```capl\nvariables {\n  int x;\n}\n```\n",
    )
    .unwrap();
    fs::write(temp.path().join("empty.md"), "No code here.\n").unwrap();

    cli(temp.path())
        .args(["extract", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("reply.can"));

    assert_eq!(
        fs::read_to_string(temp.path().join("reply.can")).unwrap(),
        "variables {\n  int x;\n}\n"
    );
    assert!(!temp.path().join("empty.can").exists());
}

#[test]
fn extract_failure_reports_its_cause() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("reply.md"),
        "```capl\nvariables {\n  int x;\n}\n```\n",
    )
    .unwrap();
    fs::create_dir_all(temp.path().join("out/reply.can")).unwrap();

    cli(temp.path())
        .args(["extract", "--output", "out", "reply.md"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("Failed to write"))
        .stderr(predicate::str::contains("1 file(s) failed"));
}
