//! # zrc-node
//!
//! ROS-style communication patterns over a key-expression bus: topics
//! (publish/subscribe), services (request/reply) and actions (long-running
//! goals with feedback, cancellation and exactly one terminal result).
//!
//! ## Key components
//!
//! - [`Node`] — one bus session plus factories for every endpoint
//! - [`Publisher`] / [`Subscriber`] — typed topic endpoints
//! - [`ServiceServer`] / [`ServiceClient`] — request/reply with timeouts and
//!   remote error propagation
//! - [`ActionServer`] / [`ActionClient`] / [`ActionHandle`] — goal execution
//!   engine driven by the [`ActionStatus`] state machine
//! - [`NodeConfig`] — TOML configuration (namespace, codec, timeouts)
//!
//! ## Quick Example
//!
//! ```rust
//! use std::time::Duration;
//! use zrc_node::Node;
//!
//! let node = Node::in_memory("demo");
//! let _server = node
//!     .create_service_server("add", |(a, b): (i64, i64)| Ok(a + b))
//!     .unwrap();
//! let client = node.create_service_client("add");
//! let sum: i64 = client.call(&(2, 3), Duration::from_secs(1)).unwrap();
//! assert_eq!(sum, 5);
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod keys;
pub mod node;
pub mod pubsub;
pub mod service;

pub use action::{
    ActionClient, ActionFeedback, ActionHandle, ActionResult, ActionServer, ActionStatus,
    GoalCallbacks,
};
pub use config::NodeConfig;
pub use error::{ErrorKind, ZrcError};
pub use keys::{KeyLayout, DEFAULT_NAMESPACE};
pub use node::Node;
pub use pubsub::{Publisher, Subscriber};
pub use service::{ServiceClient, ServiceServer};
pub use zrc_codec::CodecKind;
pub use zrc_transport::{MemoryBus, Transport, TransportError};
