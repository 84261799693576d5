//! Wire protocol definitions
//!
//! Client envelopes, inter-node broker envelopes, close codes, and broker
//! channel naming.

mod broker;
mod channels;
mod close_codes;
mod envelope;

pub use broker::{BrokerEnvelope, DispatchKind, ALL_NAMESPACES};
pub use channels::{
    namespace_channel, parse_namespace_channel, GLOBAL_CHANNEL, NAMESPACE_CHANNEL_PREFIX,
};
pub use close_codes::CloseCode;
pub use envelope::{Envelope, ERROR_EVENT};

pub(crate) use envelope::EnvelopeRef;
