//! Redis Pub/Sub broker

mod broker;

pub use broker::{RedisBroker, RedisBrokerConfig};
