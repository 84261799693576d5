//! In-process event bus
//!
//! Pattern-matched publish/subscribe used by connections and namespaces.

mod bus;
mod pattern;

pub use bus::{BusError, EventBus, HandlerResult, ListenerId, DEFAULT_MAX_LISTENERS};
pub use pattern::Pattern;
