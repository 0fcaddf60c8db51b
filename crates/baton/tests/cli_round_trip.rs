// Feature: Agents coordinate through the baton binary
//
// Background:
//   Given a fresh state database in a temporary directory
//   And no config files apply (HOME and the working directory are isolated)

use assert_cmd::Command;
use predicates::prelude::*;

struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("state.db")
    }

    fn baton(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_baton"));
        // Nothing from the developer's shell may reach the binary.
        cmd.env_clear()
            .current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .arg("--db")
            .arg(self.db_path());
        cmd
    }
}

#[test]
fn bdd_second_agent_is_told_to_wait() {
    // Scenario: Two agents notice the same broken build
    //   When agent-a runs "baton build fix"
    //   Then it is told to fix
    //   When agent-b runs "baton build fix"
    //   Then it exits 3 and names agent-a
    let sandbox = Sandbox::new();

    sandbox
        .baton()
        .args(["build", "fix", "--agent", "agent-a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("You hold the lease"));

    sandbox
        .baton()
        .args(["build", "fix"])
        .env("BATON_AGENT_ID", "agent-b")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("agent-a is fixing the build"));

    sandbox
        .baton()
        .args(["build", "fixed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Build:        passing"));
}

#[test]
fn bdd_fix_without_identity_fails_with_missing_context() {
    // Scenario: No agent identity available
    //   When I run "baton --json build fix" without BATON_AGENT_ID
    //   Then it fails with MISSING_CONTEXT
    let sandbox = Sandbox::new();

    sandbox
        .baton()
        .args(["--json", "build", "fix"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MISSING_CONTEXT"));

    // The identity is checked before the store is opened.
    assert!(!sandbox.db_path().exists());
}

#[test]
fn bdd_sandbox_ignores_inherited_baton_variables() {
    // Scenario: The parent shell exports an unusable busy timeout
    //   When the sandboxed binary runs "baton build status"
    //   Then config loading never sees the variable
    let sandbox = Sandbox::new();

    std::env::set_var("BATON_BUSY_TIMEOUT_MS", "not-a-number");
    let output = sandbox.baton().args(["build", "status"]).output();
    std::env::remove_var("BATON_BUSY_TIMEOUT_MS");

    let output = output.expect("run baton");
    assert!(output.status.success(), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stdout).contains("Build:        passing"));
}

#[test]
fn bdd_queue_hands_out_operations_in_order() {
    // Scenario: Two commits are queued and processed
    let sandbox = Sandbox::new();

    for op in ["git-commit", "git-push"] {
        sandbox
            .baton()
            .args(["queue", "push", op])
            .assert()
            .success();
    }

    sandbox
        .baton()
        .args(["queue", "next"])
        .assert()
        .success()
        .stdout(predicate::str::contains("git-commit"));

    sandbox
        .baton()
        .args(["queue", "fail", "1", "hook rejected"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#1 marked failed"));

    sandbox
        .baton()
        .args(["--json", "queue", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending\": 1"))
        .stdout(predicate::str::contains("\"failed\": 1"));
}

#[test]
fn bdd_done_on_unclaimed_item_fails() {
    let sandbox = Sandbox::new();

    sandbox
        .baton()
        .args(["queue", "push", "git-push"])
        .assert()
        .success();

    sandbox
        .baton()
        .args(["queue", "done", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not claimed"));
}
