// demo.rs — Walk through topics, services and actions on an in-process bus.
//
// Two nodes share one MemoryBus: "demo_server" owns the subscriber, service
// server and action server; "demo_client" publishes, calls and sends goals.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use serde_json::{json, Value};
use zrc_node::{ActionHandle, ActionStatus, GoalCallbacks, MemoryBus, Node, NodeConfig};

const REPLY_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemoTarget {
    Topic,
    Service,
    Action,
    All,
}

pub fn execute(config: &NodeConfig, which: DemoTarget, cancel: bool, step_ms: u64) -> anyhow::Result<()> {
    let bus = MemoryBus::new();
    let server = Node::on_bus("demo_server", &bus, config.clone());
    let client = Node::on_bus("demo_client", &bus, config.clone());

    let outcome = run(&server, &client, which, cancel, Duration::from_millis(step_ms));
    client.close();
    server.close();
    outcome
}

fn run(
    server: &Node,
    client: &Node,
    which: DemoTarget,
    cancel: bool,
    step: Duration,
) -> anyhow::Result<()> {
    if matches!(which, DemoTarget::Topic | DemoTarget::All) {
        topic_demo(server, client)?;
    }
    if matches!(which, DemoTarget::Service | DemoTarget::All) {
        service_demo(server, client)?;
    }
    if matches!(which, DemoTarget::Action | DemoTarget::All) {
        action_demo(server, client, cancel, step)?;
    }
    Ok(())
}

fn topic_demo(server: &Node, client: &Node) -> anyhow::Result<()> {
    println!("== topic ==");
    let (tx, rx) = mpsc::channel();
    let _sub = server.create_subscriber("chatter", move |message: Value| {
        let _ = tx.send(message);
    })?;

    let publisher = client.create_publisher::<Value>("chatter");
    publisher.publish(&json!({"hello": "world"}))?;
    println!("Published on {}", publisher.key());

    let received = rx
        .recv_timeout(REPLY_WAIT)
        .context("no message arrived on the chatter topic")?;
    println!("Received: {received}");
    Ok(())
}

fn service_demo(server: &Node, client: &Node) -> anyhow::Result<()> {
    println!("== service ==");
    let _server = server.create_service_server("greet", |request: Value| {
        let name = request
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("World");
        Ok(json!({ "response": format!("Hello {name}") }))
    })?;

    let greet = client.create_service_client("greet");
    let response: Value = greet.call(&json!({"name": "Zenoh"}), REPLY_WAIT)?;
    println!("Service result: {response}");
    Ok(())
}

fn action_demo(server: &Node, client: &Node, cancel: bool, step: Duration) -> anyhow::Result<()> {
    println!("== action ==");
    let _server = server.create_action_server(
        "move_to_position",
        move |goal_id: &str, goal: Value, handle: ActionHandle| {
            println!("Executing goal {goal_id} with data {goal}");
            for i in 0..5 {
                if handle.is_cancel_requested() {
                    handle.publish_result(&json!({"cancelled": true}), ActionStatus::Preempted)?;
                    return Ok(());
                }
                handle.publish_feedback(&json!({ "progress": i }))?;
                thread::sleep(step);
            }
            handle.publish_result(&json!({"completed": true}), ActionStatus::Succeeded)?;
            Ok(())
        },
    )?;

    let actions = client.create_action_client("move_to_position");
    let (first_feedback_tx, first_feedback_rx) = mpsc::sync_channel(1);
    let goal_id = actions.send_goal(
        &json!({"task": "move_to_position"}),
        GoalCallbacks::new()
            .on_feedback(move |feedback| {
                println!("Feedback: {}", feedback.feedback);
                let _ = first_feedback_tx.try_send(());
            })
            .on_result(|result| {
                println!("Result callback: {} {}", result.status, result.result);
            }),
    )?;
    println!("Sent goal with ID: {goal_id}");

    if cancel {
        first_feedback_rx
            .recv_timeout(REPLY_WAIT)
            .context("goal produced no feedback")?;
        actions.cancel_goal(&goal_id)?;
        println!("Cancel requested for {goal_id}");
    }

    let wait = step * 5 + REPLY_WAIT;
    let result = actions.wait_for_result(&goal_id, wait)?;
    println!("Final status: {}", result.status);
    Ok(())
}
