//! Typed multi-part messages.
//!
//! A message is a list of parts, each a map from string keys to typed
//! values. Part 0 is the header (type, sender, timestamps, delivery status);
//! the remaining parts carry content. The bridge only ever produces and
//! accepts messages with exactly one `text/plain` body part.

use std::collections::BTreeMap;

use crate::handle::Handle;

/// Header key: [`MessageType`] code.
pub const KEY_MESSAGE_TYPE: &str = "message-type";
/// Header key: sender contact handle.
pub const KEY_MESSAGE_SENDER: &str = "message-sender";
/// Header key: time the message was sent, Unix seconds.
pub const KEY_MESSAGE_SENT: &str = "message-sent";
/// Header key: time the message was received, Unix seconds.
pub const KEY_MESSAGE_RECEIVED: &str = "message-received";
/// Header key: id assigned when the message is queued as pending.
pub const KEY_PENDING_MESSAGE_ID: &str = "pending-message-id";
/// Header key: [`DeliveryStatus`] code of a delivery report.
pub const KEY_DELIVERY_STATUS: &str = "delivery-status";
/// Header key: human readable error carried by a delivery report.
pub const KEY_DELIVERY_ERROR_MESSAGE: &str = "delivery-error-message";
/// Body key: MIME type of the part.
pub const KEY_CONTENT_TYPE: &str = "content-type";
/// Body key: the content itself.
pub const KEY_CONTENT: &str = "content";

/// The only content type the bridge accepts or produces.
pub const TEXT_PLAIN: &str = "text/plain";

/// Value stored under a message part key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartValue {
    /// UTF-8 string.
    Str(String),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Boolean.
    Bool(bool),
}

/// One message part.
pub type MessagePart = BTreeMap<String, PartValue>;

/// Message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Plain message.
    Normal = 0,
    /// Action ("/me waves").
    Action = 1,
    /// Notice.
    Notice = 2,
    /// Automatic reply, such as an away message.
    AutoReply = 3,
    /// Report about the delivery of an earlier message.
    DeliveryReport = 4,
}

impl MessageType {
    /// Decode a message type code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Action),
            2 => Some(Self::Notice),
            3 => Some(Self::AutoReply),
            4 => Some(Self::DeliveryReport),
            _ => None,
        }
    }
}

/// Delivery status codes carried by delivery reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DeliveryStatus {
    /// Status unknown.
    Unknown = 0,
    /// Delivered to the recipient.
    Delivered = 1,
    /// Delivery failed; retrying may succeed.
    TemporarilyFailed = 2,
    /// Delivery failed for good.
    PermanentlyFailed = 3,
    /// Accepted by an intermediate server.
    Accepted = 4,
}

/// A typed multi-part message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    parts: Vec<MessagePart>,
}

impl Message {
    /// Message with `n_parts` empty parts.
    pub fn with_parts(n_parts: usize) -> Self {
        Self { parts: vec![MessagePart::new(); n_parts] }
    }

    /// Build from raw parts, as received from the protocol layer.
    pub fn from_parts(parts: Vec<MessagePart>) -> Self {
        Self { parts }
    }

    /// Plain text message with a header and a single `text/plain` body.
    pub fn text(message_type: MessageType, content: &str) -> Self {
        let mut message = Self::with_parts(2);
        message.set_u32(0, KEY_MESSAGE_TYPE, message_type as u32);
        message.set_str(1, KEY_CONTENT_TYPE, TEXT_PLAIN);
        message.set_str(1, KEY_CONTENT, content);
        message
    }

    /// All parts.
    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    /// Number of parts, header included.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Check if the message has no parts at all.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Header part. `None` if the message has no parts.
    pub fn header(&self) -> Option<&MessagePart> {
        self.parts.first()
    }

    /// Value at `part`/`key`.
    pub fn get(&self, part: usize, key: &str) -> Option<&PartValue> {
        self.parts.get(part)?.get(key)
    }

    /// String at `part`/`key`. `None` if absent or not a string.
    pub fn get_str(&self, part: usize, key: &str) -> Option<&str> {
        match self.get(part, key)? {
            PartValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer at `part`/`key`. `None` if absent or not a `U32`.
    pub fn get_u32(&self, part: usize, key: &str) -> Option<u32> {
        match self.get(part, key)? {
            PartValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer at `part`/`key`. `None` if absent or not an `I64`.
    pub fn get_i64(&self, part: usize, key: &str) -> Option<i64> {
        match self.get(part, key)? {
            PartValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Message type from the header. Absent type means [`MessageType::Normal`].
    pub fn message_type(&self) -> Option<MessageType> {
        match self.get_u32(0, KEY_MESSAGE_TYPE) {
            Some(code) => MessageType::from_code(code),
            None => Some(MessageType::Normal),
        }
    }

    /// Sender handle from the header.
    pub fn sender(&self) -> Option<Handle> {
        Handle::new(self.get_u32(0, KEY_MESSAGE_SENDER)?)
    }

    /// Pending message id from the header.
    pub fn pending_id(&self) -> Option<u32> {
        self.get_u32(0, KEY_PENDING_MESSAGE_ID)
    }

    /// Content of the first body part.
    pub fn body_text(&self) -> Option<&str> {
        self.get_str(1, KEY_CONTENT)
    }

    /// Set the sender handle.
    pub fn set_sender(&mut self, sender: Handle) {
        self.set_u32(0, KEY_MESSAGE_SENDER, sender.get());
    }

    /// Store a string at `part`/`key`.
    ///
    /// # Panics
    ///
    /// Panics if `part` does not exist.
    pub fn set_str(&mut self, part: usize, key: &str, value: &str) {
        self.set(part, key, PartValue::Str(value.to_owned()));
    }

    /// Store an unsigned integer at `part`/`key`.
    pub fn set_u32(&mut self, part: usize, key: &str, value: u32) {
        self.set(part, key, PartValue::U32(value));
    }

    /// Store a signed integer at `part`/`key`.
    pub fn set_i64(&mut self, part: usize, key: &str, value: i64) {
        self.set(part, key, PartValue::I64(value));
    }

    fn set(&mut self, part: usize, key: &str, value: PartValue) {
        assert!(part < self.parts.len(), "invariant: message part {part} out of range");
        self.parts[part].insert(key.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_layout() {
        let message = Message::text(MessageType::Action, "waves");

        assert_eq!(message.len(), 2);
        assert_eq!(message.message_type(), Some(MessageType::Action));
        assert_eq!(message.get_str(1, KEY_CONTENT_TYPE), Some(TEXT_PLAIN));
        assert_eq!(message.body_text(), Some("waves"));
        assert_eq!(message.sender(), None);
    }

    #[test]
    fn missing_type_is_normal() {
        let message = Message::with_parts(2);
        assert_eq!(message.message_type(), Some(MessageType::Normal));
    }

    #[test]
    fn unknown_type_code() {
        let mut message = Message::with_parts(1);
        message.set_u32(0, KEY_MESSAGE_TYPE, 42);
        assert_eq!(message.message_type(), None);
    }

    #[test]
    fn typed_getters_reject_other_types() {
        let mut message = Message::with_parts(1);
        message.set_str(0, KEY_MESSAGE_TYPE, "action");

        assert_eq!(message.get_u32(0, KEY_MESSAGE_TYPE), None);
        assert_eq!(message.get_i64(0, KEY_MESSAGE_TYPE), None);
    }

    #[test]
    #[should_panic(expected = "invariant: message part 3 out of range")]
    fn setting_missing_part_panics() {
        Message::with_parts(2).set_u32(3, KEY_MESSAGE_TYPE, 0);
    }
}
