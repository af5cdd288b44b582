//! Domain layer: messages, subscription identity, mailboxes and the
//! pattern table.
//!
//! Nothing in here spawns tasks or talks to a transport; the
//! [`router`](crate::router) drives these types.

pub(crate) mod mailbox;
pub mod message;
pub(crate) mod pattern_table;
pub mod subscription_id;

pub use message::{Envelope, Message};
pub(crate) use pattern_table::PatternTable;
pub use subscription_id::SubscriptionId;
