//! # zrc-transport
//!
//! The messaging substrate ZRC is layered on: publish/subscribe on
//! hierarchical string keys plus a query/reply primitive with timeout and
//! multi-reply semantics.
//!
//! The [`Transport`] trait is the seam; [`MemoryBus`] is the in-process
//! implementation used by tests, the CLI demo, and single-process
//! deployments. A network-backed session (e.g. Zenoh) plugs in by
//! implementing the same trait.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::time::Duration;
//! use zrc_transport::{MemoryBus, Transport};
//!
//! let bus = MemoryBus::new();
//! let session = bus.open_session();
//! let (tx, rx) = std::sync::mpsc::channel();
//! let _sub = session
//!     .subscribe("zrc/topic/chatter", Box::new(move |s| { let _ = tx.send(s); }))
//!     .unwrap();
//! session.put("zrc/topic/chatter", b"hi".to_vec()).unwrap();
//! let sample = rx.recv_timeout(Duration::from_secs(1)).unwrap();
//! assert_eq!(sample.payload, b"hi");
//! ```

pub mod error;
pub mod key_expr;
pub mod memory;
pub mod transport;

pub use error::TransportError;
pub use memory::{MemoryBus, MemorySession};
pub use transport::{
    Query, QueryCallback, Queryable, Replies, Reply, Sample, SampleCallback, Subscription,
    Transport,
};
