use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};
use workplan_core::{Bubbling, Composite, ExecutionState, Node, WorkError, WorkErrorKind};

fn value_job(value: Value) -> Node {
    Node::sync_job(move |_| Ok(value.clone()))
}

fn failing_job(message: &'static str) -> Node {
    Node::sync_job(move |_| Err(WorkError::failed(message)))
}

/// A job that records the arguments it was called with.
fn recording_job(seen: Arc<Mutex<Vec<Vec<Value>>>>, result: Value) -> Node {
    Node::sync_job(move |invocation| {
        seen.lock().unwrap().push(invocation.args.clone());
        Ok(result.clone())
    })
}

#[tokio::test]
async fn fresh_node_is_pending_and_succeeds() {
    let job = value_job(json!(42));
    assert_eq!(job.state(), ExecutionState::Pending);

    let result = job.process(Vec::new()).await.unwrap();

    assert_eq!(result, json!(42));
    assert_eq!(job.state(), ExecutionState::Successful);
}

#[tokio::test]
async fn unhandled_failure_surfaces_the_original_error() {
    let job = failing_job("disk full");

    let error = job.process(Vec::new()).await.unwrap_err();

    assert_eq!(error.kind, WorkErrorKind::Failed);
    assert_eq!(error.message, "disk full");
    assert_eq!(error.node.as_deref(), Some(job.id()));
    assert_eq!(job.state(), ExecutionState::Failed);
}

#[tokio::test]
async fn bare_nodes_cannot_be_processed() {
    let error = Node::new().process(Vec::new()).await.unwrap_err();
    assert_eq!(error.kind, WorkErrorKind::InvalidNode);
}

#[tokio::test]
async fn on_fail_must_be_a_processable_node() {
    let job = failing_job("x").with_on_fail(Node::new());
    let error = job.process(Vec::new()).await.unwrap_err();
    assert_eq!(error.kind, WorkErrorKind::InvalidNode);
    assert_eq!(job.state(), ExecutionState::Pending);
}

#[tokio::test]
async fn call_args_override_args_fn_and_static_args() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let job = recording_job(seen.clone(), json!(null)).with_args(vec![json!("static")]);

    job.process(Vec::new()).await.unwrap();
    job.reset_state();
    job.set_args_fn(Arc::new(|_: Option<&Value>| vec![json!("computed")]));
    job.process(Vec::new()).await.unwrap();
    job.reset_state();
    job.process(vec![json!("call")]).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            vec![json!("static")],
            vec![json!("computed")],
            vec![json!("call")],
        ]
    );
}

#[tokio::test]
async fn on_success_receives_the_result_and_replaces_it() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook = recording_job(seen.clone(), json!("wrapped"));
    let job = value_job(json!(7)).with_name("producer").with_on_success(hook.clone());

    let result = job.process(Vec::new()).await.unwrap();

    assert_eq!(result, json!("wrapped"));
    assert_eq!(job.state(), ExecutionState::Successful);
    assert_eq!(hook.state(), ExecutionState::Successful);
    assert_eq!(hook.parent(), Some(job.clone()));

    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0], json!(7));
    assert_eq!(calls[0][1]["id"], json!(job.id()));
    assert_eq!(calls[0][1]["name"], json!("producer"));
}

#[tokio::test]
async fn failing_on_success_fails_the_node() {
    let job = value_job(json!(1)).with_on_success(failing_job("post-processing broke"));

    let error = job.process(Vec::new()).await.unwrap_err();

    assert_eq!(error.message, "post-processing broke");
    assert_eq!(job.state(), ExecutionState::Failed);
}

#[tokio::test]
async fn matching_on_fail_recovers_and_keeps_failed_state() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recovery = recording_job(seen.clone(), json!("recovered"));
    let job = failing_job("connection timeout")
        .with_on_fail(recovery.clone())
        .with_on_fail_condition(Regex::new("timeout").unwrap());

    let result = job.process(Vec::new()).await.unwrap();

    assert_eq!(result, json!("recovered"));
    assert_eq!(job.state(), ExecutionState::Failed);
    assert_eq!(recovery.state(), ExecutionState::Successful);
    let calls = seen.lock().unwrap();
    assert_eq!(calls[0][0]["message"], json!("connection timeout"));
    assert_eq!(calls[0][0]["kind"], json!("FAILED"));
    assert_eq!(calls[0][1]["state"], json!("failed"));
}

#[tokio::test]
async fn non_matching_on_fail_condition_rethrows() {
    let recovery = value_job(json!("recovered"));
    let job = failing_job("permission denied")
        .with_on_fail(recovery.clone())
        .with_on_fail_condition(Regex::new("^timeout").unwrap());

    let error = job.process(Vec::new()).await.unwrap_err();

    assert_eq!(error.message, "permission denied");
    assert_eq!(recovery.state(), ExecutionState::Pending);
}

#[tokio::test]
async fn finally_runs_after_failure_then_rethrows() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let cleanup = recording_job(seen.clone(), json!("cleaned"));
    let job = failing_job("boom").with_finally(cleanup.clone());

    let error = job.process(Vec::new()).await.unwrap_err();

    assert_eq!(error.message, "boom");
    assert_eq!(cleanup.state(), ExecutionState::Successful);
    let calls = seen.lock().unwrap();
    assert_eq!(calls[0][0], Value::Null);
    assert_eq!(calls[0][1]["state"], json!("failed"));
}

#[tokio::test]
async fn finally_error_wins_over_success() {
    let job = value_job(json!(1)).with_finally(failing_job("cleanup failed"));

    let error = job.process(Vec::new()).await.unwrap_err();

    assert_eq!(error.message, "cleanup failed");
    assert_eq!(job.state(), ExecutionState::Successful);
}

#[tokio::test]
async fn finally_sees_the_recovered_result() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let job = failing_job("x")
        .with_on_fail(value_job(json!("fallback")))
        .with_finally(recording_job(seen.clone(), json!("done")));

    let result = job.process(Vec::new()).await.unwrap();

    assert_eq!(result, json!("done"));
    assert_eq!(seen.lock().unwrap()[0][0], json!("fallback"));
}

#[tokio::test]
async fn skip_if_skips_the_whole_subtree() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let child = Node::sync_job(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!(null))
    });
    let queue = Node::queue_of(1, [child.clone()]).unwrap().with_skip_if(true);

    let result = queue.process(Vec::new()).await.unwrap();

    assert_eq!(result, Value::Null);
    assert_eq!(queue.state(), ExecutionState::Skipped);
    assert_eq!(child.state(), ExecutionState::Skipped);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn illegal_transitions_leave_state_unchanged() {
    let job = value_job(json!(1));

    let error = job.set_state(ExecutionState::Successful).unwrap_err();
    assert_eq!(error.kind, WorkErrorKind::InvalidMove);
    assert_eq!(job.state(), ExecutionState::Pending);

    let unchanged = job.set_state(ExecutionState::Pending).map(|_| job.state());
    assert_eq!(unchanged, Ok(ExecutionState::Pending));
}

#[tokio::test]
async fn reset_restores_pending_and_keeps_scope() {
    let child = value_job(json!(1)).with_scope_value("kept", json!(true));
    let queue = Node::queue_of(1, [child.clone()]).unwrap();
    let resets = Arc::new(AtomicUsize::new(0));
    let counter = resets.clone();
    queue.on("reset", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    queue.process(Vec::new()).await.unwrap();
    queue.reset_state();

    assert_eq!(queue.state(), ExecutionState::Pending);
    assert_eq!(child.state(), ExecutionState::Pending);
    assert_eq!(child.scope_get("kept"), Some(json!(true)));
    assert_eq!(resets.load(Ordering::SeqCst), 2);
    assert_eq!(queue.process(Vec::new()).await.unwrap(), json!([1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_during_work_discards_the_outcome() {
    let hook_ran = Arc::new(AtomicUsize::new(0));
    let counter = hook_ran.clone();
    let hook = Node::sync_job(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!(null))
    });
    let job = Node::async_job(|_| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!("late"))
    })
    .with_on_success(hook);

    let canceller = {
        let job = job.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            job.set_state(ExecutionState::Cancelled).unwrap();
        })
    };

    let error = job.process(Vec::new()).await.unwrap_err();
    canceller.await.unwrap();

    assert_eq!(error.kind, WorkErrorKind::Cancelled);
    assert_eq!(job.state(), ExecutionState::Cancelled);
    assert_eq!(hook_ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scope_reads_fall_through_and_writes_stay_local() {
    let child = value_job(json!(null));
    let parent = Node::queue_of(1, [child.clone()])
        .unwrap()
        .with_scope_value("region", json!("eu"));

    assert_eq!(child.scope_get("region"), Some(json!("eu")));

    child.scope_set("region", json!("us"));
    assert_eq!(child.scope_get("region"), Some(json!("us")));
    assert_eq!(parent.scope_get("region"), Some(json!("eu")));

    child.global_set("shared", json!(1));
    assert_eq!(parent.local_scope().get("shared"), Some(&json!(1)));
    assert_eq!(child.effective_scope().get("region"), Some(&json!("us")));
}

#[tokio::test]
async fn tokens_resolve_against_the_live_scope() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let child = recording_job(seen.clone(), json!(null))
        .with_name("fetch •{target.host}")
        .with_args(vec![json!("•target.port"), json!("plain")]);
    let parent = Node::queue_of(1, [child.clone()])
        .unwrap()
        .with_scope_value("target", json!({ "host": "alpha", "port": 80 }));

    assert_eq!(child.name().as_deref(), Some("fetch alpha"));
    parent.scope_set("target", json!({ "host": "beta", "port": 443 }));
    assert_eq!(child.name().as_deref(), Some("fetch beta"));

    parent.process(Vec::new()).await.unwrap();
    assert_eq!(seen.lock().unwrap()[0], vec![json!(443), json!("plain")]);
}

#[tokio::test]
async fn state_events_bubble_with_the_original_target() {
    let child = value_job(json!(1));
    let root = Node::queue_of(1, [child.clone()]).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    root.on("state", move |event| {
        sink.lock()
            .unwrap()
            .push((event.target.id().to_string(), event.args[0].clone()));
    });

    root.process(Vec::new()).await.unwrap();

    let seen = seen.lock().unwrap();
    let child_moves: Vec<Value> = seen
        .iter()
        .filter(|(target, _)| target == child.id())
        .map(|(_, state)| state.clone())
        .collect();
    assert_eq!(child_moves, vec![json!("in-progress"), json!("successful")]);
    assert_eq!(seen.len(), 4);
}

#[tokio::test]
async fn custom_events_reach_ancestors() {
    let leaf = Node::sync_job(|invocation| {
        invocation.node.emit("progress", vec![json!(50)]);
        Ok(json!(null))
    });
    let root = Node::queue_of(1, [leaf]).unwrap();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    root.on("progress", move |event| sink.lock().unwrap().push(event.args[0].clone()));

    root.process(Vec::new()).await.unwrap();

    assert_eq!(*progress.lock().unwrap(), vec![json!(50)]);
}

#[test]
fn display_and_tree_outline() {
    let child = value_job(json!(1)).with_name("leaf");
    let root = Node::queue_of(1, [child]).unwrap().with_name("root");

    assert_eq!(root.to_string(), "root: pending");
    assert_eq!(root.to_tree(), "- root: pending\n  - leaf: pending\n");
    assert_eq!(root.descendant_count(), 1);
}
