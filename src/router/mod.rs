//! Router layer: the dispatcher and subscription handles.
//!
//! This is the only layer that spawns tasks. It drives the domain types
//! from [`crate::domain`] and reaches the broker through
//! [`crate::transport::Transport`].

pub mod dispatcher;
pub mod subscription;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use subscription::Subscription;
