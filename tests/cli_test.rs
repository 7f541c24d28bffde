use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("run")
        .arg("tests/fixtures/scenario.jsonl")
        .arg("--catalog")
        .arg("tests/fixtures/catalog.csv")
        .env_remove("SMTP_HOST");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("id,stock,active"))
        .stdout(predicate::str::contains("A,3,true"))
        .stdout(predicate::str::contains("B,10,true"))
        // Row with a negative price is skipped
        .stdout(predicate::str::contains("C,").not())
        .stdout(predicate::str::contains("order,user,status,total"))
        .stdout(predicate::str::contains(",u1,shipped,200"))
        .stdout(predicate::str::contains(",u2,cancelled,75"))
        .stdout(predicate::str::contains("pending_payment").not());

    Ok(())
}

#[test]
fn test_cli_keeps_going_after_bad_lines() -> Result<(), Box<dyn std::error::Error>> {
    let mut script = tempfile::NamedTempFile::new()?;
    writeln!(script, "not json")?;
    writeln!(script, r#"{{"op":"unknown"}}"#)?;
    writeln!(
        script,
        r#"{{"op":"create_order","user":"u1","items":[{{"product_id":"B","quantity":1}}],"shipping":{{"name":"A","phone":"1","address_line":"x","city":"y","zip":"z"}}}}"#
    )?;

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("run")
        .arg(script.path())
        .arg("--catalog")
        .arg("tests/fixtures/catalog.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("B,9,true"))
        .stdout(predicate::str::contains(",u1,pending_payment,25"));

    Ok(())
}

#[test]
fn test_cli_missing_script_fails() {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("run").arg("tests/fixtures/does-not-exist.jsonl");
    cmd.assert().failure();
}

#[test]
fn test_cli_sweep_reports_counts() {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("sweep");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("cart_reminders=0 payment_reminders=0"));
}
