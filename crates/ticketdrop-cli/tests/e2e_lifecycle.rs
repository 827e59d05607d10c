//! End-to-end ticket lifecycle through the `td` binary.
//!
//! Each test runs `td` as a subprocess in an isolated temp directory with the
//! default config: no reference lists, so names are accepted with warnings,
//! and the America/Edmonton dispatch zone.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn td_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("td"));
    cmd.current_dir(dir);
    cmd.env("TICKETDROP_LOG", "error");
    cmd
}

fn init_project(dir: &Path) {
    td_cmd(dir).args(["init"]).assert().success();
}

fn setup() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    init_project(dir.path());
    dir
}

fn json_ok(dir: &Path, args: &[&str]) -> Value {
    let output = td_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("td should not crash");
    assert!(
        output.status.success(),
        "td {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

fn json_err(dir: &Path, args: &[&str]) -> Value {
    let output = td_cmd(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("td should not crash");
    assert!(!output.status.success(), "td {args:?} should have failed");
    let json: Value =
        serde_json::from_slice(&output.stderr).expect("JSON errors go to stderr as JSON");
    json["error"].clone()
}

/// Create and confirm a ticket, returning its id.
fn dispatch(dir: &Path, driver: &str, truck: &str) -> String {
    let json = json_ok(
        dir,
        &[
            "create",
            "--customer",
            "Spur Petroleum Corp",
            "--from",
            "10-15-052-20W4",
            "--to",
            "Rimbey Lease",
            "--product",
            "Crude Oil",
            "--driver",
            driver,
            "--truck",
            truck,
            "--volume",
            "80",
            "--confirm",
        ],
    );
    assert_eq!(json["stage"], "ASSIGNED");
    json["id"].as_str().expect("ticket id").to_string()
}

const HAZARDS: [&str; 10] = [
    "hazard.access=yes",
    "hazard.weather=yes",
    "hazard.wind_direction=yes",
    "hazard.slip_trip=yes",
    "hazard.working_alone=yes",
    "hazard.powerline=yes",
    "hazard.ppe_used=yes",
    "hazard.fire_extinguisher=yes",
    "hazard.communication=yes",
    "hazard.spills=yes",
];

fn record_trip(dir: &Path, id: &str) {
    let json = json_ok(
        dir,
        &[
            "update",
            id,
            "arrive_origin=2026-01-01T15:00:00Z",
            "depart_origin=2026-01-01T15:45:00Z",
            "arrive_destination=2026-01-01T17:00:00Z",
        ],
    );
    assert_eq!(json["stage"], "IN_PROGRESS");

    let mut args = vec!["update", id];
    args.extend(HAZARDS);
    args.push("signature=yes");
    json_ok(dir, &args);
}

fn complete(dir: &Path, id: &str) -> Value {
    json_ok(
        dir,
        &[
            "complete",
            id,
            "volume=85.5",
            "depart_destination=2026-01-01T17:50:00Z",
        ],
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn commands_fail_outside_a_project() {
    let dir = TempDir::new().expect("tempdir");
    let err = json_err(dir.path(), &["list"]);
    assert_eq!(err["error_code"], "E1001");
}

#[test]
fn errors_are_rendered_exactly_once() {
    let dir = TempDir::new().expect("tempdir");
    let output = td_cmd(dir.path())
        .args(["show", "260101001", "--json"])
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("td should not crash");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    let json: Value = serde_json::from_str(&stderr).expect("stderr is one JSON document");
    assert_eq!(json["error"]["error_code"], "E1001");

    td_cmd(dir.path())
        .args(["show", "260101001", "--format", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1001]"))
        .stderr(predicate::str::contains("Error:").not());
}

#[test]
fn init_twice_requires_force() {
    let dir = setup();
    td_cmd(dir.path()).args(["init"]).assert().failure();
    td_cmd(dir.path()).args(["init", "--force"]).assert().success();
    assert!(dir.path().join(".ticketdrop/config.toml").exists());
}

#[test]
fn full_lifecycle_to_export() {
    let dir = setup();
    let root = dir.path();

    let id = dispatch(root, "Brant Fandrey", "Unit 7");
    assert_eq!(id.len(), 9);

    record_trip(root, &id);
    let done = complete(root, &id);
    assert_eq!(done["stage"], "COMPLETED");
    assert_eq!(done["actual_volume"], "85.5");
    assert!(done["completed_at"].is_string());

    let stats = json_ok(root, &["stats"]);
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["unexported_completed"], 1);

    let out = root.join("billing.csv");
    let export = json_ok(
        root,
        &["export", "--all", "--output", out.to_str().expect("utf-8 path")],
    );
    assert_eq!(export["tickets"], serde_json::json!([id]));
    assert_eq!(export["commit"]["status"], "complete");

    let csv = std::fs::read_to_string(&out).expect("export file");
    let mut lines = csv.lines();
    assert!(lines.next().expect("header").contains("Ticket#"));
    let row = lines.next().expect("one record");
    assert!(row.contains(&id));
    assert!(row.contains("Spur Petroleum Corp"));
    assert!(lines.next().is_none());

    let shown = json_ok(root, &["show", &id, "--history"]);
    assert_eq!(shown["stage"], "EXPORTED");
    assert_eq!(shown["export"]["status"], "exported");
    let history = shown["history"].as_array().expect("history");
    assert!(history.len() >= 4, "history: {history:?}");
}

#[test]
fn export_again_without_force_finds_nothing() {
    let dir = setup();
    let root = dir.path();
    let id = dispatch(root, "Brant Fandrey", "Unit 7");
    record_trip(root, &id);
    complete(root, &id);

    json_ok(root, &["export", "--all"]);
    let again = json_ok(root, &["export", "--all"]);
    assert_eq!(again["tickets"], serde_json::json!([]));
    assert!(again.get("file").is_none());

    let forced = json_ok(root, &["export", "--ticket", &id, "--force", "--no-mark"]);
    assert_eq!(forced["tickets"], serde_json::json!([id]));
    assert!(forced.get("commit").is_none());
}

#[test]
fn export_without_scope_is_refused() {
    let dir = setup();
    let err = json_err(dir.path(), &["export"]);
    assert!(err["suggestion"].as_str().expect("suggestion").contains("--all"));
}

#[test]
fn completion_with_missing_fields_is_rejected_with_reasons() {
    let dir = setup();
    let root = dir.path();
    let id = dispatch(root, "Brant Fandrey", "Unit 7");
    json_ok(root, &["update", &id, "arrive_origin=2026-01-01T15:00:00Z"]);

    let err = json_err(root, &["complete", &id]);
    assert_eq!(err["error_code"], "E2003");
    let fields: Vec<&str> = err["issues"]
        .as_array()
        .expect("issues")
        .iter()
        .filter_map(|issue| issue["field"].as_str())
        .collect();
    assert!(fields.contains(&"signature"));
    assert!(fields.contains(&"hazard_checklist"));
    assert!(fields.contains(&"actual_volume"));

    let shown = json_ok(root, &["show", &id]);
    assert_eq!(shown["stage"], "IN_PROGRESS");
}

#[test]
fn out_of_order_timestamps_are_rejected() {
    let dir = setup();
    let root = dir.path();
    let id = dispatch(root, "Brant Fandrey", "Unit 7");
    json_ok(root, &["update", &id, "arrive_origin=2026-01-01T15:00:00Z"]);

    td_cmd(root)
        .args(["update", &id, "depart_origin=2026-01-01T14:00:00Z"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("depart_origin"));
}

#[test]
fn edit_only_while_pending() {
    let dir = setup();
    let root = dir.path();
    let created = json_ok(
        root,
        &[
            "create",
            "--customer",
            "Spur Petroleum Corp",
            "--from",
            "10-15-052-20W4",
            "--to",
            "Rimbey Lease",
            "--product",
            "Crude Oil",
            "--driver",
            "Brant Fandrey",
            "--truck",
            "Unit 7",
        ],
    );
    assert_eq!(created["stage"], "PENDING");
    let id = created["id"].as_str().expect("id").to_string();

    let edited = json_ok(root, &["edit", &id, "truck=Unit 9"]);
    assert_eq!(edited["truck"], "Unit 9");

    let confirmed = json_ok(root, &["confirm", &id]);
    assert_eq!(confirmed["stage"], "ASSIGNED");

    let err = json_err(root, &["edit", &id, "truck=Unit 3"]);
    assert_eq!(err["error_code"], "E2002");

    let amended = json_ok(root, &["amend", &id, "--reviewer", "Rick", "truck=Unit 3"]);
    assert_eq!(amended["truck"], "Unit 3");
}

#[test]
fn ticket_ids_are_sequential_within_a_day() {
    let dir = setup();
    let root = dir.path();
    let first = dispatch(root, "Brant Fandrey", "Unit 7");
    let second = dispatch(root, "Dale Kuntz", "Unit 8");
    assert_eq!(first[..6], second[..6]);
    let a: u32 = first[6..].parse().expect("sequence");
    let b: u32 = second[6..].parse().expect("sequence");
    assert_eq!(b, a + 1);
}

#[test]
fn busy_driver_is_reported_unavailable() {
    let dir = setup();
    let root = dir.path();
    let id = dispatch(root, "Brant Fandrey", "Unit 7");

    let availability = json_ok(root, &["available", "--driver", "brant fandrey"]);
    assert_eq!(availability["driver"]["available"], false);
    assert_eq!(availability["driver"]["busy_with"], serde_json::json!([id]));

    let availability = json_ok(root, &["available", "--truck", "Unit 8"]);
    assert_eq!(availability["truck"]["available"], true);
}

#[test]
fn list_filters_by_stage_and_driver() {
    let dir = setup();
    let root = dir.path();
    let first = dispatch(root, "Brant Fandrey", "Unit 7");
    dispatch(root, "Dale Kuntz", "Unit 8");
    json_ok(root, &["update", &first, "arrive_origin=2026-01-01T15:00:00Z"]);

    let all = json_ok(root, &["list"]);
    assert_eq!(all.as_array().expect("array").len(), 2);

    let active = json_ok(root, &["list", "--stage", "in_progress"]);
    let active = active.as_array().expect("array");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"], first.as_str());

    let by_driver = json_ok(root, &["list", "--driver", "Dale Kuntz"]);
    assert_eq!(by_driver.as_array().expect("array").len(), 1);
}

#[test]
fn offline_queue_replays_and_completes() {
    let dir = setup();
    let root = dir.path();
    let id = dispatch(root, "Brant Fandrey", "Unit 7");

    json_ok(
        root,
        &[
            "queue",
            "enqueue",
            &id,
            "arrive_origin=2026-01-01T15:00:00Z",
            "depart_origin=2026-01-01T15:45:00Z",
            "arrive_destination=2026-01-01T17:00:00Z",
            "depart_destination=2026-01-01T17:50:00Z",
        ],
    );
    let mut finish = vec!["queue", "enqueue", &id, "--complete", "volume=85.5", "signature=yes"];
    finish.extend(HAZARDS);
    json_ok(root, &finish);

    let pending = json_ok(root, &["queue", "list"]);
    assert_eq!(pending.as_array().expect("array").len(), 2);

    let drained = json_ok(root, &["queue", "drain"]);
    assert_eq!(drained["applied"], 2);
    assert_eq!(drained["failed"], 0);

    let shown = json_ok(root, &["show", &id]);
    assert_eq!(shown["stage"], "COMPLETED");
    let pending = json_ok(root, &["queue", "list"]);
    assert_eq!(pending.as_array().expect("array").len(), 0);
}

#[test]
fn batch_create_reports_each_row() {
    let dir = setup();
    let root = dir.path();
    let csv = root.join("jobs.csv");
    std::fs::write(
        &csv,
        "customer,from_lsd,to_lsd,product,driver,truck\n\
         Spur Petroleum Corp,10-15-052-20W4,Rimbey Lease,Crude Oil,Brant Fandrey,Unit 7\n\
         Spur Petroleum Corp,,Rimbey Lease,Crude Oil,Dale Kuntz,Unit 8\n",
    )
    .expect("write csv");

    let report = json_ok(root, &["create", "--batch", csv.to_str().expect("utf-8 path")]);
    assert_eq!(report["created"], 1);
    assert_eq!(report["failed"], 1);
    let rows = report["rows"].as_array().expect("rows");
    assert_eq!(rows[0]["status"], "created");
    assert_eq!(rows[1]["status"], "failed");
}

#[test]
fn validate_stage_lists_failing_tickets_and_exits_nonzero() {
    let dir = setup();
    let root = dir.path();
    let id = dispatch(root, "Brant Fandrey", "Unit 7");
    json_ok(root, &["update", &id, "arrive_origin=2026-01-01T15:00:00Z"]);

    let output = td_cmd(root)
        .args(["validate", "--stage", "completion", "--json"])
        .output()
        .expect("td should not crash");
    assert!(!output.status.success());
    let reports: Value = serde_json::from_slice(&output.stdout).expect("report JSON");
    let report = &reports[0];
    assert_eq!(report["total"], 1);
    assert_eq!(report["failed"][0]["ticket"], id.as_str());

    let single = td_cmd(root)
        .args(["validate", &id, "--format", "text"])
        .assert()
        .failure();
    single.stdout(predicate::str::contains("signature"));
}

#[test]
fn text_output_is_line_oriented() {
    let dir = setup();
    let root = dir.path();
    let id = dispatch(root, "Brant Fandrey", "Unit 7");

    td_cmd(root)
        .args(["list", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&id))
        .stdout(predicate::str::contains("ASSIGNED"));
}

#[test]
fn completions_generate_for_bash() {
    let dir = TempDir::new().expect("tempdir");
    td_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("td"));
}
