use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A provider-native message that the agent replays without inspecting.
///
/// Tool-calling turns only make sense to most providers when the exact
/// assistant message that requested the tools is sent back alongside the
/// tool results. Providers wrap that message in an `OpaqueMessage`, the
/// agent keeps it in the turn's scratchpad, and the provider unwraps it
/// again when serializing the next request.
pub struct OpaqueMessage(Arc<dyn OpaqueMessageObject>);

impl OpaqueMessage {
    /// Creates a new `OpaqueMessage`.
    ///
    /// The `id` identifies the message and should be unique within a
    /// conversation. Two opaque messages are equal iff their ids are.
    #[inline]
    pub fn new<ID: Into<String>, T: Send + Sync + 'static>(
        id: ID,
        value: T,
    ) -> Self {
        Self(Arc::new(OpaqueMessageInner {
            id: id.into(),
            value,
        }))
    }

    /// Returns the id of the message.
    #[inline]
    pub fn id(&self) -> &str {
        self.0.id()
    }

    /// Borrows the wrapped value if it has type `T`.
    #[inline]
    pub fn to_raw<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl Clone for OpaqueMessage {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Debug for OpaqueMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueMessage").field(&self.0.id()).finish()
    }
}

impl PartialEq for OpaqueMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for OpaqueMessage {}

impl Hash for OpaqueMessage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

trait OpaqueMessageObject: Send + Sync {
    fn id(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

struct OpaqueMessageInner<T> {
    id: String,
    value: T,
}

impl<T: Send + Sync + 'static> OpaqueMessageObject for OpaqueMessageInner<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn Any {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct NativeToolCallMessage {
        function: &'static str,
    }

    #[test]
    fn test_unwrap_native_message() {
        let opaque = OpaqueMessage::new(
            "chatcmpl-1",
            NativeToolCallMessage {
                function: "roll_a_dice",
            },
        );
        assert_eq!(opaque.id(), "chatcmpl-1");
        let native = opaque.to_raw::<NativeToolCallMessage>().unwrap();
        assert_eq!(native.function, "roll_a_dice");
        assert!(opaque.to_raw::<String>().is_none());
    }

    #[test]
    fn test_identity_is_the_id() {
        let first = OpaqueMessage::new("chatcmpl-1", "a".to_owned());
        let same_id = OpaqueMessage::new("chatcmpl-1", "b".to_owned());
        let other = OpaqueMessage::new("chatcmpl-2", "a".to_owned());
        assert_eq!(first, same_id);
        assert_ne!(first, other);

        let set: HashSet<_> = [first.clone(), same_id, other].into();
        assert_eq!(set.len(), 2);
    }
}
