// End-to-end playbook runs against the fixtures directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tachyon::environment::{Config, Environment};
use tachyon::output::TachyonError;
use tachyon::parser::Playbook;
use tachyon::run_capture;
use tachyon::runtime::scope::{NestedScope, Scope};
use tachyon::runtime::value::Value;

fn fixture(name: &str) -> String {
    format!("tests/fixtures/{}", name)
}

fn load_env() -> Environment {
    Environment::new(Arc::new(NestedScope::root()), Config::default())
}

#[tokio::test]
async fn loads_a_simple_playbook() {
    let env = load_env();
    let pb = Playbook::load(&env, fixture("playbook1.yml")).await.unwrap();

    assert_eq!(pb.plays.len(), 2);

    let play = &pb.plays[1];
    assert_eq!(play.hosts, "all");

    assert_eq!(
        play.vars.get("answer"),
        Some(Value::Str("Wuh, I think so".into()))
    );
    assert_eq!(play.vars.get("port"), Some(Value::Int(5150)));

    // string entry imported, first existing candidate imported
    assert_eq!(play.vars.get("common"), Some(Value::Str("here".into())));
    assert_eq!(play.vars.get("os"), Some(Value::Str("generic".into())));

    assert_eq!(play.vars_files.len(), 2);
    assert_eq!(play.tasks.len(), 2);
    assert_eq!(play.tasks[0].args(), "echo {{port}}");
}

#[tokio::test]
async fn runs_tasks_and_expands_templates() {
    let (results, output) = run_capture(fixture("playbook1.yml")).await.unwrap();

    // noop from the include, then the two tasks of the second play
    assert_eq!(results.len(), 3);
    assert_eq!(
        results[1].result.data.get("stdout").unwrap().as_str(),
        Some("5150")
    );
    assert!(output.contains("shell: echo 5150"));
    assert_eq!(
        results[2].result.data.get("stdout").unwrap().as_str(),
        Some("one two")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn futures_run_in_parallel() {
    let start = Instant::now();
    let (results, _) = run_capture(fixture("future.yml")).await.unwrap();
    let total = start.elapsed().as_secs_f64();

    assert!(total >= 2.0, "futures finished impossibly fast: {}", total);
    assert!(total < 3.5, "futures did not run in parallel: {}", total);

    // the sync task plus both resolved futures are recorded
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn notify_runs_handlers_in_order() {
    let (results, output) = run_capture(fixture("notify.yml")).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].task.name(), "trigger");
    assert_eq!(results[1].task.name(), "restart");
    assert_eq!(
        results[1].result.data.get("stdout").unwrap().as_str(),
        Some("hi")
    );

    let task_at = output.find("- trigger").unwrap();
    let handler_at = output.find("- restart").unwrap();
    assert!(task_at < handler_at);

    // a handler nobody notified stays quiet
    assert!(!output.contains("- never"));
}

#[tokio::test]
async fn with_items_aggregates_results() {
    let (results, _) = run_capture(fixture("items.yml")).await.unwrap();

    assert_eq!(results.len(), 1);
    let res = &results[0].result;

    assert!(res.changed);
    assert!(!res.failed);
    assert_eq!(res.data.get("items").unwrap().as_int(), Some(2));

    let per_item = res.data.get("results").unwrap().expect_list().unwrap();
    assert_eq!(per_item.len(), 2);
}

#[tokio::test]
async fn when_skip_runs_nothing_and_notifies_nobody() {
    // the arg-string references an undefined variable, so reaching
    // expansion at all would fail the run
    let (results, output) = run_capture(fixture("when_skip.yml")).await.unwrap();

    assert!(results.is_empty());
    assert!(!output.contains("- skipped"));
    assert!(!output.contains("- restart"));
}

#[tokio::test]
async fn include_vars_override_sub_plays() {
    let env = load_env();
    let pb = Playbook::load(&env, fixture("inc_override.yml"))
        .await
        .unwrap();

    assert_eq!(pb.plays.len(), 2);

    let sub = &pb.plays[0];
    assert_eq!(sub.vars.get("role"), Some(Value::Str("web".into())));
    assert_eq!(sub.vars.get("port"), Some(Value::Int(80)));
}

#[tokio::test]
async fn task_includes_carry_call_site_vars() {
    let (results, _) = run_capture(fixture("inc_parent.yml")).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        Path::new(&results[0].task.file)
            .file_name()
            .and_then(|n| n.to_str()),
        Some("inc_child.yml")
    );
    assert_eq!(
        results[0].result.data.get("stdout").unwrap().as_str(),
        Some("hello")
    );
}

#[tokio::test]
async fn async_tasks_drain_before_handlers() {
    let start = Instant::now();
    let (results, output) = run_capture(fixture("async.yml")).await.unwrap();

    // the barrier waits out the 1s background task
    assert!(start.elapsed().as_secs_f64() >= 1.0);
    assert!(output.contains("(async success)"));

    // async outcomes are reported, not recorded as results
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].task.name(), "foreground");
}

#[tokio::test]
async fn roles_compose_dependencies_tasks_handlers_and_vars() {
    let env = load_env();
    let pb = Playbook::load(&env, fixture("site_roles.yml")).await.unwrap();
    assert_eq!(pb.plays[0].roles, ["web"]);

    let (results, output) = run_capture(fixture("site_roles.yml")).await.unwrap();

    // base (dependency) runs before web, and the cyclic back-edge from
    // base to web is dropped
    assert_eq!(results[0].task.name(), "base task");
    assert_eq!(results[1].task.name(), "web task");
    assert_eq!(
        results[1].result.data.get("stdout").unwrap().as_str(),
        Some("hello from web")
    );

    assert_eq!(results[2].task.name(), "web handler");
    assert!(output.contains("- web handler"));
}

#[tokio::test]
async fn policies_remap_failure_and_change() {
    let (results, _) = run_capture(fixture("policies.yml")).await.unwrap();

    assert_eq!(results.len(), 4);

    // manual_status maps rc 3 to changed
    assert!(results[0].result.changed);
    assert!(!results[0].result.failed);

    // ignore_changed forces the flag off
    assert!(!results[1].result.changed);

    // ignore_errors records the failure without aborting
    assert!(results[2].result.failed);
    assert_eq!(results[3].task.name(), "after failure");
}

#[tokio::test]
async fn policies_apply_to_background_tasks() {
    let (results, output) = run_capture(fixture("policies_background.yml"))
        .await
        .unwrap();

    // both futures resolve at the barrier, in registration order
    assert_eq!(results.len(), 2);

    // manual_status maps rc 3 to changed on a future task
    assert_eq!(results[0].task.name(), "future exits three");
    assert!(results[0].result.changed);
    assert!(!results[0].result.failed);

    // ignore_changed forces the flag off on a future task
    assert_eq!(results[1].task.name(), "future quiet");
    assert!(!results[1].result.changed);
    assert!(!results[1].result.failed);

    // rc 4 remapped to ok keeps the async completion a success
    assert!(output.contains("(async success)"));
}

#[tokio::test]
async fn creates_skips_and_changed_create_stamps() {
    let stamp = Path::new("/tmp/tachyon-fixture-stamp");
    let _ = std::fs::remove_file(stamp);

    let (results, _) = run_capture(fixture("creates.yml")).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].result.changed);
    assert!(stamp.exists(), "changed_create did not write the stamp");

    // the second task sees the stamp and skips without running
    assert!(!results[1].result.changed);
    assert!(results[1]
        .result
        .data
        .get("_result")
        .unwrap()
        .as_str()
        .unwrap()
        .starts_with("skipped"));

    let _ = std::fs::remove_file(stamp);
}

#[tokio::test]
async fn missing_vars_file_fails_the_load() {
    let env = load_env();
    let err = Playbook::load(&env, fixture("bad_vars.yml"))
        .await
        .err();

    // the loader reads vars files eagerly; a named file must exist
    assert!(matches!(err, Some(TachyonError::Io { .. })));
}

#[tokio::test]
async fn unknown_command_aborts_the_run() {
    let err = run_capture(fixture("unknown_cmd.yml")).await.unwrap_err();
    assert!(matches!(err, TachyonError::UnknownCommand(name) if name == "warble"));
}
