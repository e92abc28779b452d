//! Goal execution with feedback and cancellation.
//!
//! An [`ActionServer`] accepts goals and runs each on its own thread with an
//! [`ActionHandle`]; an [`ActionClient`] sends goals and receives their
//! feedback and exactly one terminal [`ActionResult`].

pub mod client;
pub mod handle;
pub mod messages;
pub mod server;
pub mod status;

pub use client::{ActionClient, FeedbackCallback, GoalCallbacks, ResultCallback};
pub use handle::ActionHandle;
pub use messages::{ActionFeedback, ActionResult, CancelMessage, GoalMessage};
pub use server::{ActionServer, ExecuteFn};
pub use status::ActionStatus;
