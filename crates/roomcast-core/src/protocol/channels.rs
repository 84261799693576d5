//! Broker channel naming

/// Channel prefix for namespace fan-out
pub const NAMESPACE_CHANNEL_PREFIX: &str = "roomcast:ns:";
/// Channel for server-wide broadcasts
pub const GLOBAL_CHANNEL: &str = "roomcast:global";

/// Broker channel of a namespace
#[must_use]
pub fn namespace_channel(namespace: &str) -> String {
    format!("{NAMESPACE_CHANNEL_PREFIX}{namespace}")
}

/// Namespace name carried by a namespace channel
#[must_use]
pub fn parse_namespace_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix(NAMESPACE_CHANNEL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(namespace_channel("/chat"), "roomcast:ns:/chat");
        assert_eq!(namespace_channel("/"), "roomcast:ns:/");
        assert_eq!(parse_namespace_channel("roomcast:ns:/chat"), Some("/chat"));
        assert_eq!(parse_namespace_channel(GLOBAL_CHANNEL), None);
    }
}
