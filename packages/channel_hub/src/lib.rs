//! Shared Channel Hub
//!
//! Many independent features (notifications, status badges, live
//! screenshots) read from one socket. The socket only exists while someone
//! holds a [`Listener`]; topics are reference counted through
//! [`TopicSubscription`] guards and replayed after every reconnect.

mod hub;

pub use bench_core::protocol::Envelope;
pub use hub::{HubSettings, Listener, SharedChannelHub, TopicSubscription};
