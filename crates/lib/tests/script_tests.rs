//! Verb semantics exercised through full script evaluation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use luabox_lib::builder::{BuildConfig, Builder};
use luabox_lib::testutil::{Ledger, RecordingExecutor};
use luabox_lib::{CommitHook, PullCoordinator};

use common::{builder, builder_with};

#[test]
fn from_pulls_and_adopts_the_image() {
    let (b, ledger) = builder();

    let result = b.run_script(r#"from "alpine""#);

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.value_str().as_deref(), Some("img-alpine"));
    assert_eq!(b.image_id(), "img-alpine");
    assert_eq!(ledger.lock().unwrap().pulls, vec!["alpine"]);
}

#[test]
fn from_skips_pull_when_image_is_local() {
    let ledger = Ledger::shared();
    ledger.lock().unwrap().seed_image("alpine");
    let b = builder_with(&ledger);

    let result = b.run_script(r#"from "alpine""#);

    assert!(result.error.is_none());
    assert_eq!(b.image_id(), "img-alpine");
    assert!(ledger.lock().unwrap().pulls.is_empty());
}

#[test]
fn from_enables_tty_and_attachment() {
    let (b, _ledger) = builder();
    b.run_script(r#"from "alpine""#);

    let config = b.container_config();
    assert!(config.tty);
    assert!(config.attach_stdout);
    assert!(config.attach_stderr);
}

#[test]
fn from_without_argument_fails() {
    let (b, _ledger) = builder();
    let result = b.run_script("from()");
    assert!(result.error.is_some());
}

#[test]
fn run_without_from_returns_diagnostic_as_value() {
    let (b, ledger) = builder();

    let result = b.run_script(r#"run "true""#);

    assert!(result.error.is_none());
    assert_eq!(
        result.value_str().as_deref(),
        Some("`from` must precede any `run` statements")
    );
    assert!(ledger.lock().unwrap().commits.is_empty());
}

#[test]
fn from_then_run_commits_one_layer() {
    let (b, ledger) = builder();

    let result = b.run_script("from \"alpine\"\nrun \"true\"");
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.pulls, vec!["alpine"]);
    assert_eq!(ledger.commits.len(), 1);
    assert!(ledger.finalized.is_empty());

    let commit = &ledger.commits[0];
    assert_eq!(commit.parent.as_deref(), Some("img-alpine"));
    assert_eq!(commit.hook, Some(CommitHook::Run));
    assert_eq!(commit.config.entrypoint, vec!["/bin/sh", "-c"]);
    assert_eq!(commit.config.cmd, vec!["true"]);
    assert_eq!(result.value_str().as_deref(), Some(commit.image.as_str()));
    assert_eq!(b.image_id(), commit.image);
}

#[test]
fn run_restores_entrypoint_cmd_and_working_dir() {
    let (b, ledger) = builder();

    let result = b.run_script(
        r#"
from "alpine"
cmd("app")
entrypoint("/entry")
run "true"
"#,
    );
    assert!(result.error.is_none());

    let config = b.container_config();
    assert_eq!(config.cmd, vec!["app"]);
    assert_eq!(config.entrypoint, vec!["/entry"]);
    assert_eq!(config.working_dir, "");

    // The committed layer saw the shell-exec override.
    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.commits[0].config.entrypoint, vec!["/bin/sh", "-c"]);
    assert_eq!(ledger.commits[0].config.cmd, vec!["true"]);
}

#[test]
fn cmd_and_entrypoint_without_arguments_clear_the_fields() {
    let (b, _ledger) = builder();

    let result = b.run_script(
        r#"
from "alpine"
cmd("app")
entrypoint("/entry")
cmd()
entrypoint()
"#,
    );
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let config = b.container_config();
    assert!(config.cmd.is_empty());
    assert!(config.entrypoint.is_empty());
}

#[test]
fn run_variadic_arguments_become_the_command() {
    let (b, ledger) = builder();
    b.run_script("from \"alpine\"\nrun(\"echo\", \"hi\")");
    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.commits[0].config.cmd, vec!["echo", "hi"]);
}

#[test]
fn inside_overrides_working_dir_for_run() {
    let (b, ledger) = builder();

    let result = b.run_script(
        r#"
from "alpine"
inside("/srv", function()
  run "ls"
end)
"#,
    );
    assert!(result.error.is_none());

    {
        let ledger = ledger.lock().unwrap();
        assert_eq!(ledger.commits[0].config.working_dir, "/srv");
    }

    let config = b.container_config();
    assert_eq!(config.inside_dir, "");
    assert_eq!(config.working_dir, "");
}

#[test]
fn inside_clears_override_when_block_fails() {
    let (b, _ledger) = builder();

    let result = b.run_script(
        r#"
from "alpine"
inside("/srv", function()
  error("boom")
end)
"#,
    );
    assert!(result.error.is_some());
    assert_eq!(b.container_config().inside_dir, "");
}

#[test]
fn with_user_scopes_the_user() {
    let (b, ledger) = builder();

    let result = b.run_script(
        r#"
from "alpine"
with_user("root", function()
  run "id"
end)
"#,
    );
    assert!(result.error.is_none());

    {
        let ledger = ledger.lock().unwrap();
        assert_eq!(ledger.commits[0].config.user, "root");
    }
    assert_eq!(b.container_config().user, "");
}

#[test]
fn with_user_clears_user_when_block_fails() {
    let (b, _ledger) = builder();

    let result = b.run_script(
        r#"
from "alpine"
with_user("root", function()
  error("boom")
end)
"#,
    );
    assert!(result.error.is_some());
    assert_eq!(b.container_config().user, "");
}

#[test]
fn env_appends_entries_and_commits_without_hook() {
    let (b, ledger) = builder();

    let result = b.run_script("from \"alpine\"\nenv { A = \"1\", B = \"2\" }");
    assert!(result.error.is_none());

    let config = b.container_config();
    assert_eq!(config.env, vec!["A=1", "B=2"]);

    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.commits.len(), 1);
    assert_eq!(ledger.commits[0].hook, None);
    assert_eq!(ledger.commits[0].config.env, vec!["A=1", "B=2"]);
}

#[test]
fn env_enumerates_keys_sorted() {
    let (b, _ledger) = builder();
    b.run_script("from \"alpine\"\nenv { ZED = \"z\", ALPHA = \"a\" }");
    assert_eq!(b.container_config().env, vec!["ALPHA=a", "ZED=z"]);
}

#[test]
fn env_requires_a_table() {
    let (b, _ledger) = builder();
    let result = b.run_script("from \"alpine\"\nenv(\"A=1\")");
    assert!(result.error.is_some());
}

#[test]
fn copy_packages_the_source_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("hello.txt");
    std::fs::write(&source, b"hello").unwrap();

    let (b, ledger) = builder();
    let script = format!(
        "from \"alpine\"\ncopy({:?}, \"/app/hello.txt\")",
        source.to_str().unwrap()
    );
    let result = b.run_script(&script);
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.commits.len(), 1);
    match &ledger.commits[0].hook {
        Some(CommitHook::CopyInto { dest, archive }) => {
            assert_eq!(dest, "/");
            assert!(!archive.is_empty());
        }
        other => panic!("expected CopyInto hook, got {:?}", other),
    }
}

#[test]
fn copy_targets_the_inside_dir_when_set() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("hello.txt");
    std::fs::write(&source, b"hello").unwrap();

    let (b, ledger) = builder();
    let script = format!(
        r#"
from "alpine"
inside("/srv", function()
  copy({:?}, "hello.txt")
end)
"#,
        source.to_str().unwrap()
    );
    let result = b.run_script(&script);
    assert!(result.error.is_none());

    let ledger = ledger.lock().unwrap();
    match &ledger.commits[0].hook {
        Some(CommitHook::CopyInto { dest, .. }) => assert_eq!(dest, "/srv"),
        other => panic!("expected CopyInto hook, got {:?}", other),
    }
}

#[test]
fn copy_missing_source_fails() {
    let (b, ledger) = builder();
    let result = b.run_script("from \"alpine\"\ncopy(\"/definitely/not/here\", \"/app/x\")");
    assert!(result.error.is_some());
    assert!(ledger.lock().unwrap().commits.is_empty());
}

#[test]
fn warm_cache_rerun_commits_nothing_and_converges() {
    let ledger = Ledger::shared();
    let script = "from \"alpine\"\nenv { A = \"1\" }\nrun \"true\"";

    let first = builder_with(&ledger);
    let r1 = first.run_script(script);
    assert!(r1.error.is_none());
    let commits_after_first = ledger.lock().unwrap().commits.len();
    assert_eq!(commits_after_first, 2);

    let second = builder_with(&ledger);
    let r2 = second.run_script(script);
    assert!(r2.error.is_none());

    let ledger = ledger.lock().unwrap();
    assert_eq!(ledger.commits.len(), commits_after_first);
    assert_eq!(ledger.pulls.len(), 1);
    assert_eq!(r1.value_str(), r2.value_str());
    assert_eq!(first.image_id(), second.image_id());
}

#[test]
fn cache_hit_skips_the_handler() {
    let ledger = Ledger::shared();
    let script = "from \"alpine\"\nenv { A = \"1\" }";

    builder_with(&ledger).run_script(script);

    // On the warm run the env handler is skipped, so nothing is appended to
    // the builder's configuration.
    let second = builder_with(&ledger);
    let result = second.run_script(script);
    assert!(result.error.is_none());
    assert!(second.container_config().env.is_empty());
}

#[test]
fn debug_reports_without_committing() {
    let (b, ledger) = builder();
    let result = b.run_script("from \"alpine\"\ndebug()");
    assert!(result.error.is_none());
    assert_eq!(result.value_str().as_deref(), Some("img-alpine"));
    assert!(ledger.lock().unwrap().commits.is_empty());
}

#[test]
fn concurrent_from_pulls_once_across_builders() {
    let ledger = Ledger::shared();
    let pulls = Arc::new(PullCoordinator::new());
    let barrier = Arc::new(std::sync::Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let pulls = Arc::clone(&pulls);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let config = BuildConfig {
                    file_name: "test.lua".to_string(),
                    tty: false,
                    pulls,
                    ..Default::default()
                };
                let executor = RecordingExecutor::with_ledger(ledger)
                    .with_pull_delay(Duration::from_millis(200));
                let b = Builder::with_executor(config, Box::new(executor)).unwrap();
                barrier.wait();
                let result = b.run_script(r#"from "alpine""#);
                assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
                b.image_id()
            })
        })
        .collect();

    let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids[0], ids[1]);
    assert_eq!(ledger.lock().unwrap().pulls, vec!["alpine"]);
}
