// topic_flow.rs — Publish/subscribe between nodes sharing one bus.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use zrc_node::{CodecKind, Node, NodeConfig, ZrcError};
use zrc_transport::{MemoryBus, TransportError};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Odometry {
    x: f64,
    y: f64,
    heading: f64,
}

#[test]
fn hello_world_between_nodes() {
    let bus = MemoryBus::new();
    let talker = Node::on_bus("talker", &bus, NodeConfig::default());
    let listener = Node::on_bus("listener", &bus, NodeConfig::default());

    let (tx, rx) = mpsc::channel();
    let _sub = listener
        .create_subscriber("chatter", move |msg: Value| {
            let _ = tx.send(msg);
        })
        .unwrap();
    talker
        .create_publisher::<Value>("chatter")
        .publish(&json!({"message": "Hello, World!"}))
        .unwrap();

    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        json!({"message": "Hello, World!"})
    );
}

#[test]
fn messages_arrive_in_publish_order() {
    let bus = MemoryBus::new();
    let node = Node::on_bus("n", &bus, NodeConfig::default());
    let (tx, rx) = mpsc::channel();
    let _sub = node
        .create_subscriber("odom", move |odom: Odometry| {
            let _ = tx.send(odom.x);
        })
        .unwrap();

    let publisher = node.create_publisher::<Odometry>("odom");
    for i in 0..20 {
        publisher
            .publish(&Odometry {
                x: f64::from(i),
                y: 0.0,
                heading: 0.5,
            })
            .unwrap();
    }
    let received: Vec<f64> = (0..20).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    let expected: Vec<f64> = (0..20).map(f64::from).collect();
    assert_eq!(received, expected);
}

#[test]
fn wildcard_subscription_sees_every_topic() {
    let bus = MemoryBus::new();
    let node = Node::on_bus("n", &bus, NodeConfig::default());
    let (tx, rx) = mpsc::channel();
    let _sub = node
        .subscriber_on_key("zrc/topic/**", CodecKind::Json.codec(), move |v: Value| {
            let _ = tx.send(v);
        })
        .unwrap();

    node.create_publisher::<u32>("a").publish(&1).unwrap();
    node.create_publisher::<u32>("b/c").publish(&2).unwrap();

    let mut seen = vec![
        rx.recv_timeout(WAIT).unwrap(),
        rx.recv_timeout(WAIT).unwrap(),
    ];
    seen.sort_by_key(|v| v.as_u64());
    assert_eq!(seen, vec![json!(1), json!(2)]);
}

#[test]
fn per_endpoint_codec_override() {
    let bus = MemoryBus::new();
    let node = Node::on_bus("n", &bus, NodeConfig::default());
    let (tx, rx) = mpsc::channel();
    let _sub = node
        .create_subscriber_with_codec("pose", CodecKind::Msgpack, move |odom: Odometry| {
            let _ = tx.send(odom);
        })
        .unwrap();

    let pose = Odometry {
        x: 1.5,
        y: -2.0,
        heading: 3.1,
    };
    node.create_publisher_with_codec::<Odometry>("pose", CodecKind::Msgpack)
        .publish(&pose)
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), pose);
}

#[test]
fn raw_codec_carries_byte_blobs() {
    let bus = MemoryBus::new();
    let node = Node::on_bus("n", &bus, NodeConfig::default().with_codec(CodecKind::Raw));
    let (tx, rx) = mpsc::channel();
    let _sub = node
        .create_subscriber("image", move |frame: Vec<u8>| {
            let _ = tx.send(frame);
        })
        .unwrap();

    let frame: Vec<u8> = (0..=255).collect();
    node.create_publisher::<Vec<u8>>("image").publish(&frame).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), frame);
}

#[test]
fn dropped_subscriber_stops_receiving() {
    let bus = MemoryBus::new();
    let node = Node::on_bus("n", &bus, NodeConfig::default());
    let (tx, rx) = mpsc::channel();
    let sub = node
        .create_subscriber("chatter", move |n: u32| {
            let _ = tx.send(n);
        })
        .unwrap();
    let publisher = node.create_publisher::<u32>("chatter");

    publisher.publish(&1).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);

    drop(sub);
    assert_eq!(bus.subscriber_count(), 0);
    publisher.publish(&2).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(rx.try_recv().is_err());
}

#[test]
fn closed_node_rejects_publishing() {
    let bus = MemoryBus::new();
    let node = Node::on_bus("n", &bus, NodeConfig::default());
    let _sub = node.create_subscriber("chatter", |_: Value| {}).unwrap();
    let publisher = node.create_publisher::<u32>("chatter");

    node.close();
    assert_eq!(bus.subscriber_count(), 0);
    let err = publisher.publish(&1).unwrap_err();
    assert!(matches!(
        err,
        ZrcError::Transport(TransportError::SessionClosed)
    ));
    assert!(node.create_subscriber("chatter", |_: Value| {}).is_err());
}

#[test]
fn namespaces_isolate_deployments() {
    let bus = MemoryBus::new();
    let lab = Node::on_bus("lab", &bus, NodeConfig::default().with_namespace("lab"));
    let field = Node::on_bus("field", &bus, NodeConfig::default().with_namespace("field"));

    let (tx, rx) = mpsc::channel();
    let _sub = lab
        .create_subscriber("status", move |s: String| {
            let _ = tx.send(s);
        })
        .unwrap();

    field.create_publisher::<str>("status").publish("field-ok").unwrap();
    lab.create_publisher::<str>("status").publish("lab-ok").unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "lab-ok");
    thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());
}
