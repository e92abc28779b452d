// action_flow.rs — End-to-end goal execution between two nodes on one bus.
//
// Covers the action contract as a client sees it:
//   - feedback arrives in order, then exactly one SUCCEEDED result
//   - a cancelled goal ends PREEMPTED, once, however often cancel is sent
//   - a cancel sent right behind its goal is never lost
//   - routines that fail, panic or forget to publish end ABORTED
//   - a routine may REJECT a goal it has started
//   - waiting never misses a result that arrives early
//   - the engine releases its goal table entries and client subscriptions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use zrc_node::action::GoalMessage;
use zrc_node::{
    ActionHandle, ActionResult, ActionStatus, GoalCallbacks, Node, NodeConfig, ZrcError,
};
use zrc_transport::MemoryBus;

const WAIT: Duration = Duration::from_secs(5);

fn nodes() -> (MemoryBus, Node, Node) {
    let bus = MemoryBus::new();
    let server = Node::on_bus("server", &bus, NodeConfig::default());
    let client = Node::on_bus("client", &bus, NodeConfig::default());
    (bus, server, client)
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn result_channel() -> (GoalCallbacks, mpsc::Receiver<ActionResult>) {
    let (tx, rx) = mpsc::channel();
    let callbacks = GoalCallbacks::new().on_result(move |result| {
        let _ = tx.send(result);
    });
    (callbacks, rx)
}

/// Five feedback steps, honouring cancellation between steps.
fn five_step_routine(_goal_id: &str, _goal: Value, handle: ActionHandle) -> anyhow::Result<()> {
    for step in 1..=5u32 {
        if handle.is_cancel_requested() {
            handle.publish_result(&json!({"cancelled_at": step}), ActionStatus::Preempted)?;
            return Ok(());
        }
        handle.publish_feedback(&json!({"progress": step * 20}))?;
        thread::sleep(Duration::from_millis(20));
    }
    handle.publish_result(&json!({"completed": true}), ActionStatus::Succeeded)?;
    Ok(())
}

/// Runs until cancelled, polling every few milliseconds.
fn wait_for_cancel_routine(_goal_id: &str, _goal: Value, handle: ActionHandle) -> anyhow::Result<()> {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if handle.is_cancel_requested() {
            handle.publish_result(&json!({"cancelled": true}), ActionStatus::Preempted)?;
            return Ok(());
        }
        thread::sleep(Duration::from_millis(5));
    }
    handle.publish_result(&json!({"completed": true}), ActionStatus::Succeeded)?;
    Ok(())
}

#[test]
fn feedback_then_single_succeeded_result() {
    let (bus, server_node, client_node) = nodes();
    let server = server_node
        .create_action_server("move_robot", five_step_routine)
        .unwrap();
    let client = client_node.create_action_client("move_robot");

    let results_seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&results_seen);
    let _observer = client_node
        .subscriber_on_key(
            "zrc/action/result/move_robot/*",
            zrc_node::CodecKind::Json.codec(),
            move |_: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let (tx, rx) = mpsc::channel();
    let goal_id = client
        .send_goal(
            &json!({"task": "move_forward", "distance": 10}),
            GoalCallbacks::new()
                .on_feedback(move |feedback| {
                    let value = feedback.feedback["progress"].as_u64().unwrap_or(0);
                    sink.lock().unwrap().push(value);
                })
                .on_result(move |result| {
                    let _ = tx.send(result);
                }),
        )
        .unwrap();

    let result = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result.goal_id, goal_id);
    assert_eq!(result.status, ActionStatus::Succeeded);
    assert_eq!(result.result, json!({"completed": true}));

    let progress = progress.lock().unwrap().clone();
    assert!(!progress.is_empty());
    assert!(progress.len() <= 5);
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));

    // Exactly one result on the wire, and no second callback.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(results_seen.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_err());

    // Engine and client bookkeeping released.
    assert!(eventually(|| server.active_goals().is_empty()));
    assert!(client.tracked_goals().is_empty());
    assert_eq!(
        bus.subscribers_matching(&format!("zrc/action/feedback/move_robot/{goal_id}")),
        0
    );
    // Only the wildcard observer is still listening for results.
    assert_eq!(
        bus.subscribers_matching(&format!("zrc/action/result/move_robot/{goal_id}")),
        1
    );
}

#[test]
fn cancelled_goal_ends_preempted() {
    let (_bus, server_node, client_node) = nodes();
    let server = server_node
        .create_action_server("patrol", wait_for_cancel_routine)
        .unwrap();
    let client = client_node.create_action_client("patrol");

    let (callbacks, rx) = result_channel();
    let goal_id = client.send_goal(&json!({"area": "lobby"}), callbacks).unwrap();
    assert!(eventually(|| server.active_goals().contains(&goal_id)));

    client.cancel_goal(&goal_id).unwrap();
    let result = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Preempted);
    assert_eq!(result.result, json!({"cancelled": true}));
}

#[test]
fn repeated_cancel_yields_one_result() {
    let (_bus, server_node, client_node) = nodes();
    let server = server_node
        .create_action_server("patrol", wait_for_cancel_routine)
        .unwrap();
    let client = client_node.create_action_client("patrol");

    let (callbacks, rx) = result_channel();
    let goal_id = client.send_goal(&json!(null), callbacks).unwrap();
    assert!(eventually(|| server.active_goals().contains(&goal_id)));

    client.cancel_goal(&goal_id).unwrap();
    client.cancel_goal(&goal_id).unwrap();
    assert!(server.cancel_goal(&goal_id) || server.active_goals().is_empty());

    assert_eq!(rx.recv_timeout(WAIT).unwrap().status, ActionStatus::Preempted);
    thread::sleep(Duration::from_millis(100));
    assert!(rx.try_recv().is_err());
}

#[test]
fn cancel_request_is_visible_through_server_status() {
    let (_bus, server_node, client_node) = nodes();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let server = server_node
        .create_action_server("hold", move |_id, _goal, handle: ActionHandle| {
            let _ = release_rx.lock().unwrap().recv_timeout(WAIT);
            handle.publish_result(&json!({}), ActionStatus::Preempted)?;
            Ok(())
        })
        .unwrap();
    let client = client_node.create_action_client("hold");

    let goal_id = client.send_goal(&json!(1), GoalCallbacks::new()).unwrap();
    assert!(eventually(|| server.goal_status(&goal_id) == Some(ActionStatus::Active)));
    assert!(server.cancel_goal(&goal_id));
    assert_eq!(server.goal_status(&goal_id), Some(ActionStatus::Preempting));

    release_tx.send(()).unwrap();
    let result = client.wait_for_result(&goal_id, WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Preempted);
}

#[test]
fn cancel_for_unknown_goal_is_ignored() {
    let (_bus, server_node, client_node) = nodes();
    let server = server_node
        .create_action_server("move_robot", five_step_routine)
        .unwrap();
    let client = client_node.create_action_client("move_robot");

    client.cancel_goal("no-such-goal").unwrap();
    assert!(!server.cancel_goal("no-such-goal"));

    let (callbacks, rx) = result_channel();
    client.send_goal(&json!({}), callbacks).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().status, ActionStatus::Succeeded);
}

#[test]
fn failing_routine_ends_aborted_with_message() {
    let (_bus, server_node, client_node) = nodes();
    let _server = server_node
        .create_action_server("fragile", |_id, _goal, _handle| {
            anyhow::bail!("gripper jammed")
        })
        .unwrap();
    let client = client_node.create_action_client("fragile");

    let (callbacks, rx) = result_channel();
    client.send_goal(&json!({}), callbacks).unwrap();
    let result = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Aborted);
    assert_eq!(result.result, json!({"error": "gripper jammed"}));
}

#[test]
fn panicking_routine_ends_aborted() {
    let (_bus, server_node, client_node) = nodes();
    let server = server_node
        .create_action_server("fragile", |_id, _goal, _handle| -> anyhow::Result<()> {
            panic!("motor driver fault")
        })
        .unwrap();
    let client = client_node.create_action_client("fragile");

    let (callbacks, rx) = result_channel();
    client.send_goal(&json!({}), callbacks).unwrap();
    let result = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Aborted);
    assert!(result.result["error"]
        .as_str()
        .unwrap()
        .contains("motor driver fault"));

    // The engine keeps serving after a panic.
    let (callbacks, rx) = result_channel();
    client.send_goal(&json!({}), callbacks).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().status, ActionStatus::Aborted);
    assert!(eventually(|| server.active_goals().is_empty()));
}

#[test]
fn routine_without_result_ends_aborted() {
    let (_bus, server_node, client_node) = nodes();
    let _server = server_node
        .create_action_server("forgetful", |_id, _goal, handle: ActionHandle| {
            handle.publish_feedback(&json!({"progress": 50}))?;
            Ok(())
        })
        .unwrap();
    let client = client_node.create_action_client("forgetful");

    let (callbacks, rx) = result_channel();
    client.send_goal(&json!({}), callbacks).unwrap();
    let result = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Aborted);
    assert!(result.result["error"].is_string());
}

#[test]
fn second_result_is_refused() {
    let (_bus, server_node, client_node) = nodes();
    let (err_tx, err_rx) = mpsc::channel();
    let err_tx = Mutex::new(err_tx);
    let _server = server_node
        .create_action_server("twice", move |_id, _goal, handle: ActionHandle| {
            handle.publish_result(&json!({"n": 1}), ActionStatus::Succeeded)?;
            let second = handle.publish_result(&json!({"n": 2}), ActionStatus::Aborted);
            let _ = err_tx.lock().unwrap().send(second);
            Ok(())
        })
        .unwrap();
    let client = client_node.create_action_client("twice");

    let (callbacks, rx) = result_channel();
    client.send_goal(&json!({}), callbacks).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().result, json!({"n": 1}));
    let second = err_rx.recv_timeout(WAIT).unwrap();
    assert!(matches!(second, Err(ZrcError::GoalFinalized { .. })));
}

#[test]
fn wait_for_result_returns_cached_result() {
    let (_bus, server_node, client_node) = nodes();
    let _server = server_node
        .create_action_server("quick", |_id, goal: Value, handle: ActionHandle| {
            handle.publish_result(&json!({"echo": goal}), ActionStatus::Succeeded)?;
            Ok(())
        })
        .unwrap();
    let client = client_node.create_action_client("quick");

    let (callbacks, rx) = result_channel();
    let goal_id = client.send_goal(&json!("ping"), callbacks).unwrap();
    rx.recv_timeout(WAIT).unwrap();

    // The result arrived before anyone waited for it.
    let started = Instant::now();
    let result = client
        .wait_for_result(&goal_id, Duration::from_millis(200))
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(result.result, json!({"echo": "ping"}));
    assert_eq!(client.result(&goal_id).unwrap(), result);
}

#[test]
fn wait_for_result_blocks_until_the_goal_finishes() {
    let (_bus, server_node, client_node) = nodes();
    let _server = server_node
        .create_action_server("move_robot", five_step_routine)
        .unwrap();
    let client = client_node.create_action_client("move_robot");

    let goal_id = client.send_goal(&json!({}), GoalCallbacks::new()).unwrap();
    let result = client.wait_for_result(&goal_id, WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Succeeded);
}

#[test]
fn wait_for_result_times_out_without_server() {
    let (bus, _server_node, client_node) = nodes();
    let client = client_node.create_action_client("nobody_home");

    let goal_id = client.send_goal(&json!({}), GoalCallbacks::new()).unwrap();
    let timeout = Duration::from_millis(150);
    let started = Instant::now();
    let err = client.wait_for_result(&goal_id, timeout).unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= timeout);

    // Only the client's own result subscription remains; the waiter is gone.
    assert_eq!(
        bus.subscribers_matching(&format!("zrc/action/result/nobody_home/{goal_id}")),
        1
    );
    assert_eq!(client.tracked_goals(), vec![goal_id]);
}

#[test]
fn duplicate_goal_id_is_dropped_while_active() {
    let (_bus, server_node, client_node) = nodes();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let server = server_node
        .create_action_server("dup", move |_id, _goal, handle: ActionHandle| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            handle.publish_result(&json!({}), ActionStatus::Succeeded)?;
            Ok(())
        })
        .unwrap();

    let goals = client_node.publisher_on_key::<GoalMessage>(
        client_node.keys().action_goal("dup"),
        zrc_node::CodecKind::Json.codec(),
    );
    goals.publish(&GoalMessage::new("same-id", json!(1))).unwrap();
    assert!(eventually(|| server.active_goals() == vec!["same-id".to_string()]));
    goals.publish(&GoalMessage::new("same-id", json!(2))).unwrap();

    assert!(eventually(|| server.active_goals().is_empty()));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn invalid_goal_messages_are_dropped() {
    let (_bus, server_node, client_node) = nodes();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let _server = server_node
        .create_action_server("strict", move |_id, _goal, handle: ActionHandle| {
            counter.fetch_add(1, Ordering::SeqCst);
            handle.publish_result(&json!({}), ActionStatus::Succeeded)?;
            Ok(())
        })
        .unwrap();

    let raw = client_node.publisher_on_key::<Value>(
        client_node.keys().action_goal("strict"),
        zrc_node::CodecKind::Json.codec(),
    );
    raw.publish(&json!({"goal_id": "", "data": 1})).unwrap();
    raw.publish(&json!({"goal_id": "g"})).unwrap();
    raw.publish(&json!(["not", "a", "goal"])).unwrap();

    // A valid goal after the junk still runs, and is the only one that does.
    let client = client_node.create_action_client("strict");
    let goal_id = client.send_goal(&json!(null), GoalCallbacks::new()).unwrap();
    client.wait_for_result(&goal_id, WAIT).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn goals_run_concurrently() {
    let (_bus, server_node, client_node) = nodes();
    let _server = server_node
        .create_action_server("slow", |_id, _goal, handle: ActionHandle| {
            thread::sleep(Duration::from_millis(300));
            handle.publish_result(&json!({}), ActionStatus::Succeeded)?;
            Ok(())
        })
        .unwrap();
    let client = client_node.create_action_client("slow");

    let started = Instant::now();
    let ids: Vec<String> = (0..4)
        .map(|_| client.send_goal(&json!({}), GoalCallbacks::new()).unwrap())
        .collect();
    for id in &ids {
        client.wait_for_result(id, WAIT).unwrap();
    }
    // Serial execution would need at least 1.2s.
    assert!(started.elapsed() < Duration::from_millis(1100));
}

#[test]
fn msgpack_nodes_run_actions() {
    let bus = MemoryBus::new();
    let config = NodeConfig::default().with_codec(zrc_node::CodecKind::Msgpack);
    let server_node = Node::on_bus("server", &bus, config.clone());
    let client_node = Node::on_bus("client", &bus, config);
    let _server = server_node
        .create_action_server("move_robot", five_step_routine)
        .unwrap();
    let client = client_node.create_action_client("move_robot");

    let goal_id = client.send_goal(&json!({"distance": 3.5}), GoalCallbacks::new()).unwrap();
    let result = client.wait_for_result(&goal_id, WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Succeeded);
}

#[test]
fn cancel_sent_right_after_the_goal_preempts_it() {
    let (_bus, server_node, client_node) = nodes();
    let server = server_node
        .create_action_server("patrol", wait_for_cancel_routine)
        .unwrap();
    let client = client_node.create_action_client("patrol");

    let mut pending = Vec::new();
    for _ in 0..20 {
        let (callbacks, rx) = result_channel();
        let goal_id = client.send_goal(&json!({"area": "dock"}), callbacks).unwrap();
        client.cancel_goal(&goal_id).unwrap();
        pending.push((goal_id, rx));
    }

    for (goal_id, rx) in &pending {
        let result = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(&result.goal_id, goal_id);
        assert_eq!(result.status, ActionStatus::Preempted);
    }
    thread::sleep(Duration::from_millis(100));
    assert!(pending.iter().all(|(_, rx)| rx.try_recv().is_err()));
    assert!(eventually(|| server.active_goals().is_empty()));
}

#[test]
fn routine_may_reject_a_started_goal() {
    let (_bus, server_node, client_node) = nodes();
    let _server = server_node
        .create_action_server("reach", |_id, goal: Value, handle: ActionHandle| {
            if goal["distance"].as_f64().unwrap_or(0.0) > 100.0 {
                handle.publish_result(&json!({"reason": "out of reach"}), ActionStatus::Rejected)?;
                return Ok(());
            }
            handle.publish_result(&json!({"reached": true}), ActionStatus::Succeeded)?;
            Ok(())
        })
        .unwrap();
    let client = client_node.create_action_client("reach");

    let far = client.send_goal(&json!({"distance": 250.0}), GoalCallbacks::new()).unwrap();
    let result = client.wait_for_result(&far, WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Rejected);
    assert_eq!(result.result, json!({"reason": "out of reach"}));

    let near = client.send_goal(&json!({"distance": 2.0}), GoalCallbacks::new()).unwrap();
    assert_eq!(
        client.wait_for_result(&near, WAIT).unwrap().status,
        ActionStatus::Succeeded
    );
}

#[test]
fn waiting_never_misses_an_immediate_result() {
    let (_bus, server_node, client_node) = nodes();
    let _server = server_node
        .create_action_server("instant", |_id, goal: Value, handle: ActionHandle| {
            handle.publish_result(&goal, ActionStatus::Succeeded)?;
            Ok(())
        })
        .unwrap();
    let client = client_node.create_action_client("instant");

    for n in 0..300u32 {
        let goal_id = client.send_goal(&json!(n), GoalCallbacks::new()).unwrap();
        let result = client.wait_for_result(&goal_id, WAIT).unwrap();
        assert_eq!(result.status, ActionStatus::Succeeded);
        assert_eq!(result.result, json!(n));
    }
}

#[test]
fn unanswered_goal_is_forgotten_after_the_goal_timeout() {
    let bus = MemoryBus::new();
    let mut config = NodeConfig::default();
    config.action.goal_timeout_ms = 100;
    let client_node = Node::on_bus("client", &bus, config);
    let client = client_node.create_action_client("nobody_home");

    let goal_id = client
        .send_goal(&json!({}), GoalCallbacks::new().on_feedback(|_| {}))
        .unwrap();
    assert_eq!(bus.subscriber_count(), 2);

    thread::sleep(Duration::from_millis(150));
    assert!(client.tracked_goals().is_empty());
    assert!(client.result(&goal_id).is_none());
    assert_eq!(bus.subscriber_count(), 0);
}

#[test]
fn raw_nodes_run_actions() {
    let bus = MemoryBus::new();
    let config = NodeConfig::default().with_codec(zrc_node::CodecKind::Raw);
    let server_node = Node::on_bus("server", &bus, config.clone());
    let client_node = Node::on_bus("client", &bus, config);
    let _server = server_node
        .create_action_server("move_robot", five_step_routine)
        .unwrap();
    let client = client_node.create_action_client("move_robot");

    let feedback = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&feedback);
    let goal_id = client
        .send_goal(
            &json!({"distance": 1}),
            GoalCallbacks::new().on_feedback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    let result = client.wait_for_result(&goal_id, WAIT).unwrap();
    assert_eq!(result.status, ActionStatus::Succeeded);
    assert_eq!(result.result, json!({"completed": true}));
    assert!(feedback.load(Ordering::SeqCst) > 0);
}
